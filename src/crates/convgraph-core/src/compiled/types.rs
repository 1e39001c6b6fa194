//! Type definitions for compiled graph execution

use crate::error::Result;
use crate::graph::NodeId;
use crate::state::{State, StateUpdate};
use chrono::{DateTime, Utc};
use convgraph_checkpoint::{Checkpoint, CheckpointMetadata};
use futures::stream::Stream;
use std::pin::Pin;

/// Result of one node execution, emitted after its checkpoint is durable
#[derive(Debug, Clone, PartialEq)]
pub struct StepDelta {
    pub node: NodeId,
    /// The update exactly as the node returned it, before merging
    pub update: StateUpdate,
    /// Version of the checkpoint that recorded this step
    pub version: u64,
    /// Queue after routing
    pub next: Vec<NodeId>,
}

/// Events emitted by [`CompiledGraph::run`](crate::CompiledGraph::run)
///
/// A run yields zero or more `Step`s and ends either when the queue drains,
/// right after an `Interrupted`, or with an error.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    Step(StepDelta),
    Interrupted {
        node: NodeId,
        reason: String,
        version: u64,
    },
}

impl RunEvent {
    pub fn version(&self) -> u64 {
        match self {
            Self::Step(delta) => delta.version,
            Self::Interrupted { version, .. } => *version,
        }
    }

    pub fn node(&self) -> &str {
        match self {
            Self::Step(delta) => &delta.node,
            Self::Interrupted { node, .. } => node,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    /// The queue drained; the thread is idle
    Completed,
    /// A node suspended; resume with `run(thread, None)`
    Interrupted { node: NodeId, reason: String },
}

/// Final result of [`CompiledGraph::invoke`](crate::CompiledGraph::invoke)
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub values: State,
    pub status: RunStatus,
    /// Version of the thread's latest checkpoint
    pub version: u64,
}

impl RunOutcome {
    pub fn is_interrupted(&self) -> bool {
        matches!(self.status, RunStatus::Interrupted { .. })
    }
}

/// A queued node, with the interrupt reason when it is suspended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTask {
    pub node: NodeId,
    pub interrupt: Option<String>,
}

/// Read-only view of one checkpoint
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    pub values: State,
    /// Nodes scheduled to run next, front first
    pub next: Vec<NodeId>,
    pub tasks: Vec<PendingTask>,
    pub version: u64,
    pub checkpoint_id: String,
    pub parent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub metadata: CheckpointMetadata,
}

impl StateSnapshot {
    pub(crate) fn from_checkpoint(checkpoint: Checkpoint) -> Self {
        let interrupted = checkpoint.metadata.interrupt.as_ref();
        let tasks = checkpoint
            .next_nodes
            .iter()
            .map(|node| PendingTask {
                node: node.clone(),
                interrupt: interrupted
                    .filter(|pending| pending.node == *node)
                    .map(|pending| pending.reason.clone()),
            })
            .collect();

        Self {
            values: State::from(checkpoint.values),
            next: checkpoint.next_nodes,
            tasks,
            version: checkpoint.version,
            checkpoint_id: checkpoint.id,
            parent_id: checkpoint.parent_id,
            created_at: checkpoint.ts,
            metadata: checkpoint.metadata,
        }
    }

    /// True when nothing is scheduled
    pub fn is_idle(&self) -> bool {
        self.next.is_empty()
    }
}

/// Stream of run events
pub type RunStream = Pin<Box<dyn Stream<Item = Result<RunEvent>> + Send>>;

/// Stream of snapshots, newest first
pub type StateSnapshotStream = Pin<Box<dyn Stream<Item = Result<StateSnapshot>> + Send>>;

#[cfg(test)]
mod tests {
    use super::*;
    use convgraph_checkpoint::{CheckpointSource, PendingInterrupt};
    use serde_json::Map;

    #[test]
    fn test_snapshot_marks_suspended_task() {
        let checkpoint = Checkpoint::first(
            "t",
            Map::new(),
            vec!["handle_refund".into(), "notify".into()],
            CheckpointMetadata::new(CheckpointSource::Loop).with_interrupt(PendingInterrupt::new(
                "handle_refund",
                "Refund requires authorization",
            )),
        );

        let snapshot = StateSnapshot::from_checkpoint(checkpoint);
        assert_eq!(
            snapshot.tasks,
            vec![
                PendingTask {
                    node: "handle_refund".into(),
                    interrupt: Some("Refund requires authorization".into()),
                },
                PendingTask {
                    node: "notify".into(),
                    interrupt: None,
                },
            ]
        );
        assert!(!snapshot.is_idle());
    }
}
