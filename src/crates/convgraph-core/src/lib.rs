//! # convgraph-core - Stateful conversation graphs
//!
//! Build multi-step conversational workflows as directed graphs of async
//! nodes that share a typed-by-schema state, persist a checkpoint after
//! every step, and can pause for human input and pick up later, possibly in
//! another process.
//!
//! ## Overview
//!
//! - **Graph definition** - [`StateGraph`] registers nodes, static edges,
//!   conditional edges and static interrupts, and validates the structure
//!   when compiled.
//! - **State and reducers** - every field of the [`StateSchema`] has a
//!   [`Reducer`]; nodes return partial [`StateUpdate`]s that are merged, never
//!   whole states.
//! - **Execution** - [`CompiledGraph::run`] drives one thread at a time
//!   through a FIFO queue of nodes and streams a [`RunEvent`] per step.
//! - **Checkpointing** - every step, interrupt, input and external update
//!   writes an immutable, versioned checkpoint through a
//!   [`CheckpointSaver`](convgraph_checkpoint::CheckpointSaver).
//! - **Interrupts** - a node returns [`NodeOutcome::Suspend`] to pause the
//!   run; the caller inspects or patches the state and resumes with
//!   `run(thread, None)`.
//! - **Tool loops** - [`tools::ToolNode`] answers an assistant message's
//!   [`ToolCall`]s and [`tools::tools_condition`] routes between the agent
//!   and the tools.
//!
//! ## Quick Start
//!
//! A two-tier support flow: the first node triages, billing may escalate to
//! a refund that needs a human sign-off.
//!
//! ```rust
//! use convgraph_core::error::NodeError;
//! use convgraph_core::{
//!     Message, NodeOutcome, OverwriteReducer, RunStatus, State, StateGraph, StateSchema,
//!     StateUpdate, END, START,
//! };
//!
//! async fn triage(_state: State) -> Result<NodeOutcome, NodeError> {
//!     Ok(StateUpdate::new()
//!         .message(Message::assistant("Let me get billing to help."))
//!         .set("next_representative", "BILLING")
//!         .into())
//! }
//!
//! async fn billing(_state: State) -> Result<NodeOutcome, NodeError> {
//!     Ok(StateUpdate::new()
//!         .message(Message::assistant("I'll process your refund."))
//!         .set("next_representative", "REFUND")
//!         .into())
//! }
//!
//! async fn handle_refund(state: State) -> Result<NodeOutcome, NodeError> {
//!     if state.get_bool("refund_authorized") != Some(true) {
//!         return Ok(NodeOutcome::suspend("Refund requires authorization"));
//!     }
//!     Ok(StateUpdate::new().message(Message::assistant("Refund processed!")).into())
//! }
//!
//! # async fn example() -> convgraph_core::Result<()> {
//! let schema = StateSchema::messages()
//!     .with_field("next_representative", OverwriteReducer)
//!     .with_field("refund_authorized", OverwriteReducer);
//!
//! let mut graph = StateGraph::new(schema);
//! graph.add_node("initial_support", triage)?;
//! graph.add_node("billing_support", billing)?;
//! graph.add_node("handle_refund", handle_refund)?;
//! graph.add_edge(START, "initial_support")?;
//! graph.add_conditional_edge(
//!     "initial_support",
//!     |s: &State| match s.get_str("next_representative") {
//!         Some("BILLING") => "billing_support",
//!         _ => END,
//!     },
//!     ["billing_support", END],
//! )?;
//! graph.add_conditional_edge(
//!     "billing_support",
//!     |s: &State| match s.get_str("next_representative") {
//!         Some("REFUND") => "handle_refund",
//!         _ => END,
//!     },
//!     ["handle_refund", END],
//! )?;
//! graph.add_edge("handle_refund", END)?;
//! let app = graph.compile()?;
//!
//! let input = StateUpdate::new().message(Message::user("I was overcharged"));
//! let outcome = app.invoke("thread-1", Some(input)).await?;
//! assert!(matches!(outcome.status, RunStatus::Interrupted { .. }));
//!
//! app.update_state("thread-1", StateUpdate::new().set("refund_authorized", true))
//!     .await?;
//! let outcome = app.invoke("thread-1", None).await?;
//! assert_eq!(outcome.status, RunStatus::Completed);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`builder`] / [`graph`] / [`routing`] - graph definition and validation
//! - [`state`] / [`messages`] - state, updates, reducers, chat messages
//! - [`node`] / [`retry`] - node outcomes, per-node options, retry policy
//! - [`compiled`] - the execution engine
//! - [`config`] - YAML and environment configuration
//! - [`visualization`] - Mermaid rendering
//! - [`checkpoint`] - re-export of `convgraph-checkpoint`
//!
//! ## Logging
//!
//! The crate emits [`tracing`] events and spans and never installs a
//! subscriber. Node retries and torn checkpoint frames log at `warn`,
//! exhausted retries and routing failures at `error`.

pub mod builder;
pub mod compiled;
pub mod config;
pub mod error;
pub mod graph;
pub mod messages;
pub mod node;
pub mod retry;
pub mod routing;
pub mod state;
pub mod tools;
pub mod visualization;

pub use convgraph_checkpoint as checkpoint;

pub use builder::StateGraph;
pub use compiled::{
    CompiledGraph, PendingTask, RunEvent, RunOutcome, RunStatus, RunStream, StateSnapshot,
    StateSnapshotStream, StepDelta,
};
pub use config::{CheckpointBackend, CheckpointFormat, EngineConfig};
pub use error::{DefinitionError, GraphError, NodeError, Result};
pub use graph::{Edge, Graph, NodeId, END, START};
pub use messages::{add_messages, HistoryView, Message, MessageRole, ToolCall};
pub use node::{Interrupt, NodeOptions, NodeOutcome};
pub use retry::RetryPolicy;
pub use routing::{Branch, Target};
pub use state::{
    AddMessagesReducer, AppendReducer, OverwriteReducer, Reducer, State, StateError, StateSchema,
    StateUpdate, MESSAGES,
};
