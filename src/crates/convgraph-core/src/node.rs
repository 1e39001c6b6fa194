//! Node functions and their outcomes
//!
//! A node is an async function from the current [`State`] to a
//! [`NodeOutcome`]. It either continues with a partial update or suspends
//! the run:
//!
//! ```rust
//! use convgraph_core::{Message, NodeOutcome, State, StateUpdate};
//! use convgraph_core::error::NodeError;
//!
//! async fn handle_refund(state: State) -> Result<NodeOutcome, NodeError> {
//!     if state.get_bool("refund_authorized") != Some(true) {
//!         return Ok(NodeOutcome::suspend("Refund requires authorization"));
//!     }
//!     Ok(StateUpdate::new().message(Message::assistant("Refund processed!")).into())
//! }
//! ```
//!
//! A suspended node is re-invoked from scratch when the thread resumes, so
//! side effects belong behind the same condition that caused the suspension.

use crate::error::NodeError;
use crate::messages::HistoryView;
use crate::retry::RetryPolicy;
use crate::state::{State, StateUpdate};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Request to pause the run at the current node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interrupt {
    pub reason: String,
}

impl Interrupt {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// What a node did
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutcome {
    /// Merge the update and follow the node's outgoing edge
    Continue(StateUpdate),
    /// Persist and return control to the caller; the node runs again on resume
    Suspend(Interrupt),
}

impl NodeOutcome {
    pub fn suspend(reason: impl Into<String>) -> Self {
        Self::Suspend(Interrupt::new(reason))
    }

    /// Continue without changing any field
    pub fn unchanged() -> Self {
        Self::Continue(StateUpdate::new())
    }
}

impl From<StateUpdate> for NodeOutcome {
    fn from(update: StateUpdate) -> Self {
        Self::Continue(update)
    }
}

impl From<Interrupt> for NodeOutcome {
    fn from(interrupt: Interrupt) -> Self {
        Self::Suspend(interrupt)
    }
}

pub type NodeResult = Result<NodeOutcome, NodeError>;

pub type NodeFuture = Pin<Box<dyn Future<Output = NodeResult> + Send>>;

/// Stored form of a node function
pub type NodeFn = Arc<dyn Fn(State) -> NodeFuture + Send + Sync>;

pub(crate) fn boxed<F, Fut>(f: F) -> NodeFn
where
    F: Fn(State) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = NodeResult> + Send + 'static,
{
    Arc::new(move |state| Box::pin(f(state)))
}

/// Per-node declarations, fixed at definition time
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeOptions {
    /// Fields the node sees; `None` means the whole state
    pub reads: Option<Vec<String>>,

    /// Fields the node may write; `None` means any schema field
    pub writes: Option<Vec<String>>,

    /// Overrides the engine's default retry policy
    pub retry: Option<RetryPolicy>,

    pub history: HistoryView,
}

impl NodeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reads<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reads = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn writes<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.writes = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn history(mut self, view: HistoryView) -> Self {
        self.history = view;
        self
    }

    /// The state as this node should see it
    pub(crate) fn input_view(&self, state: &State) -> State {
        let state = self.history.apply(state);
        match &self.reads {
            Some(fields) => state.project(fields),
            None => state,
        }
    }

    pub(crate) fn may_write(&self, field: &str) -> bool {
        self.writes
            .as_ref()
            .map_or(true, |fields| fields.iter().any(|f| f == field))
    }
}
