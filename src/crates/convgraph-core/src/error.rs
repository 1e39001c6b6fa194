//! Error types for graph definition and execution
//!
//! ```text
//! GraphError
//! ├── Definition(DefinitionError)  - rejected while building or compiling
//! ├── Routing                      - router picked an undeclared target
//! ├── NodeExecution                - node returned Err after all retries
//! ├── State(StateError)            - update could not be merged
//! ├── Checkpoint(CheckpointError)  - storage failure or version conflict
//! ├── ThreadNotFound
//! ├── PendingTasks
//! ├── RecursionLimit
//! └── Configuration
//! ```
//!
//! Interrupts are deliberately absent: a suspended run ends normally with
//! [`RunEvent::Interrupted`](crate::RunEvent::Interrupted).
//!
//! Whenever a run yields an error, nothing is persisted for the failing step
//! and the last successful checkpoint stays authoritative.

use crate::state::StateError;
use convgraph_checkpoint::CheckpointError;
use thiserror::Error;

/// Convenience result type using [`GraphError`]
pub type Result<T> = std::result::Result<T, GraphError>;

/// Error type returned by node functions
pub type NodeError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Graph structure rejected by [`StateGraph`](crate::StateGraph)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("Node '{0}' is already registered")]
    DuplicateNode(String),

    #[error("'{0}' is reserved and cannot be used as a node name")]
    ReservedName(String),

    #[error("Unknown node '{0}'")]
    UnknownNode(String),

    /// `from` already has an outgoing specification of another kind
    #[error("Node '{node}' already has {existing} outgoing edge; cannot add {attempted} edge")]
    ConflictingEdges {
        node: String,
        existing: &'static str,
        attempted: &'static str,
    },

    #[error("Node '{0}' cannot be reached from __start__")]
    UnreachableNode(String),

    #[error("No edge leaves __start__")]
    MissingStartEdge,

    #[error("Node '{0}' has no outgoing edge")]
    MissingOutgoingEdge(String),

    /// A node declares a read or write of a field the schema does not know
    #[error("Node '{node}' declares field '{field}', which is not in the state schema")]
    UnknownField { node: String, field: String },
}

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Invalid graph definition: {0}")]
    Definition(#[from] DefinitionError),

    #[error("Router after node '{node}' chose '{target}', expected one of {valid:?}")]
    Routing {
        node: String,
        target: String,
        valid: Vec<String>,
    },

    #[error("Node '{node}' failed after {attempts} attempt(s): {source}")]
    NodeExecution {
        node: String,
        attempts: usize,
        #[source]
        source: NodeError,
    },

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Thread '{0}' has no checkpoint")]
    ThreadNotFound(String),

    /// Input was supplied while the thread still has queued nodes
    #[error("Thread '{thread_id}' has pending tasks {pending:?}; resume it without input")]
    PendingTasks {
        thread_id: String,
        pending: Vec<String>,
    },

    #[error("Thread '{thread_id}' reached the recursion limit of {limit} node executions")]
    RecursionLimit { thread_id: String, limit: usize },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl GraphError {
    pub fn routing(node: impl Into<String>, target: impl Into<String>, valid: &[String]) -> Self {
        Self::Routing {
            node: node.into(),
            target: target.into(),
            valid: valid.to_vec(),
        }
    }

    pub fn node_execution(node: impl Into<String>, attempts: usize, source: NodeError) -> Self {
        Self::NodeExecution {
            node: node.into(),
            attempts,
            source,
        }
    }

    /// True for the optimistic-concurrency rejection of a checkpoint write
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::Checkpoint(CheckpointError::VersionConflict { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_execution_keeps_source() {
        let err = GraphError::node_execution("llm", 3, "timeout".into());
        assert_eq!(err.to_string(), "Node 'llm' failed after 3 attempt(s): timeout");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_definition_error_wraps() {
        let err: GraphError = DefinitionError::MissingStartEdge.into();
        assert!(matches!(err, GraphError::Definition(DefinitionError::MissingStartEdge)));
    }

    #[test]
    fn test_routing_message_lists_targets() {
        let err = GraphError::routing(
            "initial_support",
            "SALES",
            &["billing_support".to_string(), "__end__".to_string()],
        );
        let text = err.to_string();
        assert!(text.contains("SALES"));
        assert!(text.contains("billing_support"));
    }

    #[test]
    fn test_version_conflict_detection() {
        let err: GraphError = CheckpointError::VersionConflict {
            thread_id: "t".into(),
            expected: 3,
            found: 2,
        }
        .into();
        assert!(err.is_version_conflict());
        assert!(!GraphError::ThreadNotFound("t".into()).is_version_conflict());
    }
}
