//! Conditional routing
//!
//! After a node's update is merged, a conditional edge asks its router where
//! to go next. Two router shapes are supported:
//!
//! - **String routers** return a node name (or [`END`]) and are registered
//!   with the full list of targets they may return. Anything else fails the
//!   run with [`GraphError::Routing`].
//! - **Branch routers** return a closed enum implementing [`Branch`]. Every
//!   variant maps to a [`Target`], so the valid set is known when the edge is
//!   added and a router cannot invent a destination.
//!
//! ```rust
//! use convgraph_core::{Branch, Target};
//!
//! #[derive(Debug, Clone, Copy)]
//! enum Representative {
//!     Billing,
//!     Technical,
//!     Respond,
//! }
//!
//! impl Branch for Representative {
//!     fn variants() -> Vec<Self> {
//!         vec![Self::Billing, Self::Technical, Self::Respond]
//!     }
//!
//!     fn target(&self) -> Target {
//!         match self {
//!             Self::Billing => Target::node("billing_support"),
//!             Self::Technical => Target::node("technical_support"),
//!             Self::Respond => Target::End,
//!         }
//!     }
//! }
//! ```

use crate::error::{GraphError, Result};
use crate::graph::END;
use crate::state::State;
use std::fmt;
use std::sync::Arc;

/// Destination of a routing decision
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    Node(String),
    End,
}

impl Target {
    pub fn node(name: impl Into<String>) -> Self {
        Self::Node(name.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Node(name) => name,
            Self::End => END,
        }
    }
}

impl From<&str> for Target {
    fn from(name: &str) -> Self {
        if name == END {
            Self::End
        } else {
            Self::Node(name.to_string())
        }
    }
}

/// Closed set of routing decisions for one decision point
///
/// `variants` is written by hand, so the compiler cannot check that it lists
/// every variant. A variant left out of it is not a valid target: returning
/// it fails the run with [`GraphError::Routing`] when the router picks it.
/// Keep `variants` next to the enum and update both together.
pub trait Branch: Sized + Send + Sync + 'static {
    /// Every variant, used to derive the valid targets
    fn variants() -> Vec<Self>;

    fn target(&self) -> Target;
}

pub(crate) type RouteFn = Arc<dyn Fn(&State) -> String + Send + Sync>;

/// Router plus the targets it is allowed to pick
#[derive(Clone)]
pub struct Router {
    route: RouteFn,
    valid: Vec<String>,
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("route", &"<function>")
            .field("valid", &self.valid)
            .finish()
    }
}

impl Router {
    pub(crate) fn from_fn<F, R>(route: F, valid: Vec<String>) -> Self
    where
        F: Fn(&State) -> R + Send + Sync + 'static,
        R: Into<String>,
    {
        Self {
            route: Arc::new(move |state| route(state).into()),
            valid: dedup(valid),
        }
    }

    pub(crate) fn from_branch<B, F>(route: F) -> Self
    where
        B: Branch,
        F: Fn(&State) -> B + Send + Sync + 'static,
    {
        let valid: Vec<String> = B::variants()
            .iter()
            .map(|variant| variant.target().as_str().to_string())
            .collect();
        debug_assert!(!valid.is_empty(), "Branch::variants returned no variants");
        Self {
            route: Arc::new(move |state| route(state).target().as_str().to_string()),
            valid: dedup(valid),
        }
    }

    /// Targets this router may return, in declaration order
    pub fn valid_targets(&self) -> &[String] {
        &self.valid
    }

    /// Evaluate the router against the merged state of node `from`
    pub fn route(&self, from: &str, state: &State) -> Result<String> {
        let target = (self.route)(state);
        if self.valid.iter().any(|v| *v == target) {
            Ok(target)
        } else {
            Err(GraphError::routing(from, target, &self.valid))
        }
    }
}

fn dedup(targets: Vec<String>) -> Vec<String> {
    let mut unique: Vec<String> = Vec::with_capacity(targets.len());
    for target in targets {
        if !unique.contains(&target) {
            unique.push(target);
        }
    }
    unique
}
