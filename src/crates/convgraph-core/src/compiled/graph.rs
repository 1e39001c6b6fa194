//! CompiledGraph struct and builder methods

use crate::graph::Graph;
use crate::retry::RetryPolicy;
use convgraph_checkpoint::{CheckpointSaver, InMemoryCheckpointSaver};
use std::fmt;
use std::sync::Arc;

/// Default cap on node executions per `run` call
pub const DEFAULT_RECURSION_LIMIT: usize = 25;

/// Compiled graph ready for execution
///
/// Cloning is cheap: the graph definition and the checkpointer are shared.
#[derive(Clone)]
pub struct CompiledGraph {
    pub(crate) graph: Arc<Graph>,
    pub(crate) checkpointer: Arc<dyn CheckpointSaver>,
    pub(crate) recursion_limit: usize,
    pub(crate) default_retry: Option<RetryPolicy>,
}

impl fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("graph", &self.graph)
            .field("recursion_limit", &self.recursion_limit)
            .field("default_retry", &self.default_retry)
            .finish_non_exhaustive()
    }
}

impl CompiledGraph {
    pub(crate) fn new(graph: Graph) -> Self {
        Self {
            graph: Arc::new(graph),
            checkpointer: Arc::new(InMemoryCheckpointSaver::new()),
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            default_retry: None,
        }
    }

    /// Replace the checkpoint saver
    pub fn with_checkpointer(mut self, saver: Arc<dyn CheckpointSaver>) -> Self {
        self.checkpointer = saver;
        self
    }

    /// Maximum node executions in a single `run` call
    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    /// Retry policy for nodes that do not declare their own
    pub fn with_default_retry(mut self, policy: RetryPolicy) -> Self {
        self.default_retry = Some(policy);
        self
    }

    pub fn checkpointer(&self) -> Arc<dyn CheckpointSaver> {
        Arc::clone(&self.checkpointer)
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn recursion_limit(&self) -> usize {
        self.recursion_limit
    }

    /// Mermaid flowchart of the graph structure
    pub fn to_mermaid(&self) -> String {
        crate::visualization::to_mermaid(&self.graph)
    }
}
