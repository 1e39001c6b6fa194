//! In-memory checkpoint storage for development and testing
//!
//! [`InMemoryCheckpointSaver`] is the reference implementation of
//! [`CheckpointSaver`]. It keeps every thread's lineage in a `Vec` for the
//! lifetime of the process.
//!
//! ```text
//! RwLock<HashMap<thread_id, Lane>>
//!   "refund-42"  -> Mutex<[v1, v2, v3, v4]>
//!   "smalltalk"  -> Mutex<[v1, v2]>
//! ```
//!
//! The outer map lock is held only long enough to find or create a lane.
//! Appends take the lane's own mutex, so writers on different threads never
//! wait on each other, while writers on the same thread are serialized and
//! checked against the lane head. A save that raced with `delete_thread`
//! notices its lane was detached and retries on a fresh one.

use crate::{
    checkpoint::Checkpoint,
    error::Result,
    traits::{check_next_version, CheckpointSaver, CheckpointStream},
};
use async_trait::async_trait;
use futures::stream;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

type Lane = Arc<Mutex<Vec<Checkpoint>>>;

/// Process-lifetime checkpoint saver
///
/// Cloning is cheap and clones share storage.
///
/// ```rust
/// use convgraph_checkpoint::{CheckpointSaver, InMemoryCheckpointSaver};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let saver = InMemoryCheckpointSaver::new();
///     assert!(saver.load("unknown").await?.is_none());
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryCheckpointSaver {
    lanes: Arc<RwLock<HashMap<String, Lane>>>,
}

impl InMemoryCheckpointSaver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of threads with at least one checkpoint
    pub async fn thread_count(&self) -> usize {
        self.lanes.read().await.len()
    }

    /// Total number of checkpoints across all threads
    pub async fn checkpoint_count(&self) -> usize {
        let lanes: Vec<Lane> = self.lanes.read().await.values().cloned().collect();
        let mut total = 0;
        for lane in lanes {
            total += lane.lock().await.len();
        }
        total
    }

    async fn lane(&self, thread_id: &str) -> Option<Lane> {
        self.lanes.read().await.get(thread_id).cloned()
    }

    async fn lane_or_create(&self, thread_id: &str) -> Lane {
        if let Some(lane) = self.lane(thread_id).await {
            return lane;
        }
        self.lanes
            .write()
            .await
            .entry(thread_id.to_string())
            .or_default()
            .clone()
    }
}

#[async_trait]
impl CheckpointSaver for InMemoryCheckpointSaver {
    async fn save(&self, checkpoint: Checkpoint) -> Result<()> {
        loop {
            let lane = self.lane_or_create(&checkpoint.thread_id).await;
            let mut entries = lane.lock().await;

            let attached = self
                .lane(&checkpoint.thread_id)
                .await
                .is_some_and(|current| Arc::ptr_eq(&current, &lane));
            if !attached {
                continue;
            }

            check_next_version(entries.last(), &checkpoint)?;
            entries.push(checkpoint);
            return Ok(());
        }
    }

    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let Some(lane) = self.lane(thread_id).await else {
            return Ok(None);
        };
        let entries = lane.lock().await;
        Ok(entries.last().cloned())
    }

    async fn list(&self, thread_id: &str, limit: Option<usize>) -> Result<CheckpointStream> {
        let entries = match self.lane(thread_id).await {
            Some(lane) => lane.lock().await.clone(),
            None => Vec::new(),
        };

        let limit = limit.unwrap_or(usize::MAX);
        let newest_first: Vec<Result<Checkpoint>> =
            entries.into_iter().rev().take(limit).map(Ok).collect();

        Ok(Box::pin(stream::iter(newest_first)))
    }

    async fn load_version(&self, thread_id: &str, version: u64) -> Result<Option<Checkpoint>> {
        let Some(lane) = self.lane(thread_id).await else {
            return Ok(None);
        };
        let entries = lane.lock().await;
        // versions are dense and start at 1, so the index is known
        let found = version
            .checked_sub(Checkpoint::FIRST_VERSION)
            .and_then(|index| entries.get(index as usize))
            .cloned();
        Ok(found)
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        self.lanes.write().await.remove(thread_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{CheckpointMetadata, CheckpointSource};
    use crate::error::CheckpointError;
    use futures::StreamExt;
    use serde_json::{json, Map};

    fn first(thread_id: &str) -> Checkpoint {
        Checkpoint::first(
            thread_id,
            Map::new(),
            vec!["agent".to_string()],
            CheckpointMetadata::new(CheckpointSource::Input),
        )
    }

    fn loop_step(parent: &Checkpoint, count: i64) -> Checkpoint {
        let values = json!({ "count": count }).as_object().cloned().unwrap();
        parent.successor(values, vec![], CheckpointMetadata::new(CheckpointSource::Loop))
    }

    #[tokio::test]
    async fn test_save_racing_delete_lands_in_new_lane() {
        let saver = InMemoryCheckpointSaver::new();
        saver.save(first("thread-1")).await.unwrap();

        let stale = saver.lane("thread-1").await.unwrap();
        let held = stale.lock().await;

        let writer = saver.clone();
        let pending = tokio::spawn(async move { writer.save(first("thread-1")).await });
        // let the save pick up the old lane and block on it
        tokio::task::yield_now().await;

        saver.delete_thread("thread-1").await.unwrap();
        drop(held);

        pending.await.unwrap().unwrap();
        let latest = saver.load("thread-1").await.unwrap().unwrap();
        assert_eq!(latest.version, 1);
        assert_eq!(saver.checkpoint_count().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_thread_loads_none() {
        let saver = InMemoryCheckpointSaver::new();
        assert!(saver.load("missing").await.unwrap().is_none());
        assert!(saver.load_version("missing", 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_and_load_latest() {
        let saver = InMemoryCheckpointSaver::new();
        let v1 = first("thread-1");
        let v2 = loop_step(&v1, 1);
        let v3 = loop_step(&v2, 2);

        for cp in [v1.clone(), v2.clone(), v3.clone()] {
            saver.save(cp).await.unwrap();
        }

        let latest = saver.load("thread-1").await.unwrap().unwrap();
        assert_eq!(latest.version, 3);
        assert_eq!(latest.values["count"], json!(2));

        let middle = saver.load_version("thread-1", 2).await.unwrap().unwrap();
        assert_eq!(middle.id, v2.id);
    }

    #[tokio::test]
    async fn test_conflicting_save_keeps_history() {
        let saver = InMemoryCheckpointSaver::new();
        let v1 = first("thread-1");
        saver.save(v1.clone()).await.unwrap();

        let winner = loop_step(&v1, 1);
        let loser = loop_step(&v1, 99);
        saver.save(winner.clone()).await.unwrap();

        let err = saver.save(loser).await.unwrap_err();
        assert!(matches!(err, CheckpointError::VersionConflict { .. }));

        let latest = saver.load("thread-1").await.unwrap().unwrap();
        assert_eq!(latest.id, winner.id);
        assert_eq!(saver.checkpoint_count().await, 2);
    }

    #[tokio::test]
    async fn test_list_newest_first_with_limit() {
        let saver = InMemoryCheckpointSaver::new();
        let mut head = first("thread-1");
        saver.save(head.clone()).await.unwrap();
        for i in 0..4 {
            head = loop_step(&head, i);
            saver.save(head.clone()).await.unwrap();
        }

        let all: Vec<_> = saver.list("thread-1", None).await.unwrap().collect().await;
        let versions: Vec<u64> = all.into_iter().map(|r| r.unwrap().version).collect();
        assert_eq!(versions, vec![5, 4, 3, 2, 1]);

        let limited: Vec<_> = saver.list("thread-1", Some(2)).await.unwrap().collect().await;
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn test_threads_are_isolated() {
        let saver = InMemoryCheckpointSaver::new();
        saver.save(first("a")).await.unwrap();
        saver.save(first("b")).await.unwrap();

        assert_eq!(saver.thread_count().await, 2);
        saver.delete_thread("a").await.unwrap();
        assert!(saver.load("a").await.unwrap().is_none());
        assert!(saver.load("b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_concurrent_threads() {
        let saver = InMemoryCheckpointSaver::new();
        let mut handles = Vec::new();

        for t in 0..8 {
            let saver = saver.clone();
            handles.push(tokio::spawn(async move {
                let thread_id = format!("thread-{t}");
                let mut head = first(&thread_id);
                saver.save(head.clone()).await.unwrap();
                for i in 0..10 {
                    head = loop_step(&head, i);
                    saver.save(head.clone()).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(saver.thread_count().await, 8);
        assert_eq!(saver.checkpoint_count().await, 88);
    }
}
