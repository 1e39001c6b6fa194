//! State management methods (get_state, update_state, get_state_history)

use super::{CompiledGraph, StateSnapshot, StateSnapshotStream};
use crate::error::{GraphError, Result};
use crate::state::{State, StateUpdate};
use convgraph_checkpoint::{CheckpointMetadata, CheckpointSource};
use futures::StreamExt;
use tracing::{info, instrument};

impl CompiledGraph {
    /// Latest snapshot of a thread, `None` if it has no checkpoint
    pub async fn get_state(&self, thread_id: &str) -> Result<Option<StateSnapshot>> {
        let head = self.checkpointer.load(thread_id).await?;
        Ok(head.map(StateSnapshot::from_checkpoint))
    }

    /// Merge `update` into a thread's state outside of a run
    ///
    /// Uses the same reducers as node updates. The new checkpoint keeps the
    /// queue and any pending interrupt, so a suspended thread stays
    /// suspended until it is resumed with `run(thread, None)`.
    ///
    /// Returns the version of the written checkpoint.
    #[instrument(skip(self, update))]
    pub async fn update_state(&self, thread_id: &str, update: StateUpdate) -> Result<u64> {
        let head = self
            .checkpointer
            .load(thread_id)
            .await?
            .ok_or_else(|| GraphError::ThreadNotFound(thread_id.to_string()))?;

        let mut state = State::from(head.values.clone());
        self.graph.schema.apply(&mut state, &update)?;

        let mut metadata = CheckpointMetadata::new(CheckpointSource::Update)
            .with_step(head.metadata.step)
            .with_writes(update.into_map());
        metadata.interrupt = head.metadata.interrupt.clone();

        let checkpoint = head.successor(state.into_values(), head.next_nodes.clone(), metadata);
        let version = checkpoint.version;
        self.checkpointer.save(checkpoint).await?;

        info!(version, next = ?head.next_nodes, "State updated");
        Ok(version)
    }

    /// Every snapshot of a thread, newest first, optionally capped at `limit`
    pub async fn get_state_history(
        &self,
        thread_id: &str,
        limit: Option<usize>,
    ) -> Result<StateSnapshotStream> {
        let history = self.checkpointer.list(thread_id, limit).await?;
        let snapshots = history.map(|checkpoint| {
            checkpoint
                .map(StateSnapshot::from_checkpoint)
                .map_err(GraphError::from)
        });
        Ok(Box::pin(snapshots))
    }
}
