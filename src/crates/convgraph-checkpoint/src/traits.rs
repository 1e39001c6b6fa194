//! Storage contract for checkpoint backends
//!
//! [`CheckpointSaver`] is the seam between the execution engine and whatever
//! holds thread histories. Every implementation must honor the same contract:
//!
//! - **Total order per thread** - a thread's checkpoints are ordered by
//!   `version`, and `save` only accepts `latest + 1` (or
//!   [`Checkpoint::FIRST_VERSION`] for a new thread). Anything else is a
//!   [`CheckpointError::VersionConflict`], which is how concurrent writers on
//!   the same thread are serialized.
//! - **Append-only** - a successful `save` never removes or rewrites an earlier
//!   checkpoint. Only [`delete_thread`](CheckpointSaver::delete_thread) drops
//!   history, and only when asked to.
//! - **Explicit absence** - `load` of an unknown thread is `Ok(None)`. Data
//!   that exists but cannot be read is an error, never a fresh default.
//!
//! ```rust,ignore
//! use convgraph_checkpoint::{CheckpointSaver, InMemoryCheckpointSaver};
//!
//! let saver = InMemoryCheckpointSaver::new();
//! saver.save(checkpoint).await?;
//! let latest = saver.load("thread-1").await?;
//! ```
//!
//! [`CheckpointError::VersionConflict`]: crate::CheckpointError::VersionConflict

use crate::checkpoint::Checkpoint;
use crate::error::{CheckpointError, Result};
use async_trait::async_trait;
use futures::stream::Stream;
use futures::StreamExt;
use std::pin::Pin;

/// Stream of checkpoints, newest first
pub type CheckpointStream = Pin<Box<dyn Stream<Item = Result<Checkpoint>> + Send + 'static>>;

#[async_trait]
pub trait CheckpointSaver: Send + Sync {
    /// Append a checkpoint to its thread's lineage
    async fn save(&self, checkpoint: Checkpoint) -> Result<()>;

    /// Latest checkpoint of a thread, `None` for an unknown thread
    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>>;

    /// History of a thread, newest first, optionally capped at `limit` entries
    async fn list(&self, thread_id: &str, limit: Option<usize>) -> Result<CheckpointStream>;

    /// A specific version of a thread
    async fn load_version(&self, thread_id: &str, version: u64) -> Result<Option<Checkpoint>> {
        let mut history = self.list(thread_id, None).await?;
        while let Some(checkpoint) = history.next().await {
            let checkpoint = checkpoint?;
            if checkpoint.version == version {
                return Ok(Some(checkpoint));
            }
        }
        Ok(None)
    }

    /// Drop a thread's entire history
    async fn delete_thread(&self, thread_id: &str) -> Result<()>;
}

/// Check that `checkpoint` extends a lineage whose head is `latest`
pub fn check_next_version(latest: Option<&Checkpoint>, checkpoint: &Checkpoint) -> Result<()> {
    let expected = latest
        .map(|head| head.version + 1)
        .unwrap_or(Checkpoint::FIRST_VERSION);

    if checkpoint.version != expected {
        return Err(CheckpointError::VersionConflict {
            thread_id: checkpoint.thread_id.clone(),
            expected,
            found: checkpoint.version,
        });
    }

    if let Some(head) = latest {
        if checkpoint.parent_id.as_deref() != Some(head.id.as_str()) {
            return Err(CheckpointError::Invalid(format!(
                "checkpoint {} does not descend from head {} of thread '{}'",
                checkpoint.id, head.id, checkpoint.thread_id
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{CheckpointMetadata, CheckpointSource};
    use serde_json::Map;

    fn first() -> Checkpoint {
        Checkpoint::first(
            "t",
            Map::new(),
            vec![],
            CheckpointMetadata::new(CheckpointSource::Input),
        )
    }

    #[test]
    fn test_first_version_required_for_new_thread() {
        let cp = first();
        assert!(check_next_version(None, &cp).is_ok());

        let second = cp.successor(Map::new(), vec![], CheckpointMetadata::new(CheckpointSource::Loop));
        let err = check_next_version(None, &second).unwrap_err();
        assert!(matches!(
            err,
            CheckpointError::VersionConflict { expected: 1, found: 2, .. }
        ));
    }

    #[test]
    fn test_stale_successor_rejected() {
        let head = first();
        let a = head.successor(Map::new(), vec![], CheckpointMetadata::new(CheckpointSource::Loop));
        let b = head.successor(Map::new(), vec![], CheckpointMetadata::new(CheckpointSource::Update));

        assert!(check_next_version(Some(&head), &a).is_ok());
        // b was derived from the same head and lost the race
        assert!(matches!(
            check_next_version(Some(&a), &b),
            Err(CheckpointError::VersionConflict { expected: 3, found: 2, .. })
        ));
    }

    #[test]
    fn test_foreign_parent_rejected() {
        let head = first();
        let other = first();
        let forged = other.successor(Map::new(), vec![], CheckpointMetadata::new(CheckpointSource::Loop));

        assert!(matches!(
            check_next_version(Some(&head), &forged),
            Err(CheckpointError::Invalid(_))
        ));
    }
}
