//! Durable checkpoint storage in append-only files
//!
//! Every thread gets one log file under the saver's directory. The file name
//! is the hex encoding of the thread id, so arbitrary ids (slashes, spaces,
//! unicode) map to safe names. Ids longer than [`MAX_HEX_ID_LEN`] bytes would
//! overflow the file system's name limit once hex-encoded; they are named by
//! a UUIDv5 digest of the id instead (`id-<uuid>.log`). Every frame carries
//! the full thread id, so nothing is lost. The log is a sequence of frames:
//!
//! ```text
//! +-----------+----------------------------+-----------+------------------
//! | len (u32) | checkpoint v1 (serializer) | len (u32) | checkpoint v2 ...
//! +-----------+----------------------------+-----------+------------------
//! ```
//!
//! Frames are only ever appended, and each append is followed by
//! `sync_data`. A crash in the middle of an append leaves a short final frame;
//! readers ignore it with a warning and the next `save` truncates it away. A
//! complete frame that fails to decode is reported as
//! [`CheckpointError::Corrupt`].

use crate::{
    checkpoint::Checkpoint,
    error::{CheckpointError, Result},
    serializer::{JsonSerializer, SerializerProtocol},
    traits::{check_next_version, CheckpointSaver, CheckpointStream},
};
use async_trait::async_trait;
use futures::stream;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

const HEADER_LEN: usize = 4;

/// Longest thread id stored under its hex encoding
pub const MAX_HEX_ID_LEN: usize = 100;

/// Result of reading one thread log
struct LogScan {
    checkpoints: Vec<Checkpoint>,
    /// Byte length of the well-formed prefix
    valid_len: u64,
    torn: bool,
}

/// Checkpoint saver writing one append-only log per thread
#[derive(Debug, Clone)]
pub struct FileCheckpointSaver<S: SerializerProtocol = JsonSerializer> {
    dir: PathBuf,
    serializer: S,
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl FileCheckpointSaver<JsonSerializer> {
    /// JSON-encoded logs under `dir`
    pub fn json(dir: impl Into<PathBuf>) -> Self {
        Self::new(dir, JsonSerializer)
    }
}

impl<S: SerializerProtocol> FileCheckpointSaver<S> {
    /// The directory is created on first save
    pub fn new(dir: impl Into<PathBuf>, serializer: S) -> Self {
        Self {
            dir: dir.into(),
            serializer,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Log file backing `thread_id`
    pub fn log_path(&self, thread_id: &str) -> PathBuf {
        if thread_id.len() > MAX_HEX_ID_LEN {
            let digest = Uuid::new_v5(&Uuid::NAMESPACE_OID, thread_id.as_bytes());
            return self.dir.join(format!("id-{}.log", digest.simple()));
        }
        let encoded: String = thread_id.bytes().map(|b| format!("{b:02x}")).collect();
        self.dir.join(format!("{encoded}.log"))
    }

    async fn thread_lock(&self, thread_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(thread_id.to_string())
            .or_default()
            .clone()
    }

    /// Drop the map's entry for `thread_id` unless another task holds it
    async fn release_lock(&self, thread_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        // one reference in the map, one in `lock`
        if Arc::strong_count(&lock) == 2 {
            locks.remove(thread_id);
        }
    }

    #[cfg(test)]
    async fn tracked_locks(&self) -> usize {
        self.locks.lock().await.len()
    }

    async fn scan(&self, thread_id: &str) -> Result<LogScan> {
        let path = self.log_path(thread_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let mut checkpoints = Vec::new();
        let mut offset = 0usize;
        let mut torn = false;

        while offset < bytes.len() {
            let Some(header) = bytes.get(offset..offset + HEADER_LEN) else {
                torn = true;
                break;
            };
            let mut len = [0u8; HEADER_LEN];
            len.copy_from_slice(header);
            let len = u32::from_le_bytes(len) as usize;

            let start = offset + HEADER_LEN;
            let Some(frame) = bytes.get(start..start + len) else {
                torn = true;
                break;
            };

            let checkpoint: Checkpoint = self.serializer.loads(frame).map_err(|e| {
                CheckpointError::corrupt(
                    thread_id,
                    format!("frame at byte {offset} of {}: {e}", path.display()),
                )
            })?;
            checkpoints.push(checkpoint);
            offset = start + len;
        }

        if torn {
            warn!(
                thread_id,
                path = %path.display(),
                valid_len = offset,
                file_len = bytes.len(),
                "Ignoring torn checkpoint frame at end of log"
            );
        }

        Ok(LogScan {
            checkpoints,
            valid_len: offset as u64,
            torn,
        })
    }

    /// Append one frame; the caller holds the thread's lock
    async fn append(&self, checkpoint: &Checkpoint) -> Result<()> {
        let scan = self.scan(&checkpoint.thread_id).await?;
        check_next_version(scan.checkpoints.last(), checkpoint)?;

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.log_path(&checkpoint.thread_id);

        if scan.torn {
            let file = tokio::fs::OpenOptions::new().write(true).open(&path).await?;
            file.set_len(scan.valid_len).await?;
            file.sync_data().await?;
        }

        let frame = self.frame(checkpoint)?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(&frame).await?;
        file.sync_data().await?;

        debug!(
            thread_id = %checkpoint.thread_id,
            version = checkpoint.version,
            format = self.serializer.name(),
            bytes = frame.len(),
            "Appended checkpoint"
        );
        Ok(())
    }

    fn frame(&self, checkpoint: &Checkpoint) -> Result<Vec<u8>> {
        let payload = self.serializer.dumps(checkpoint)?;
        let len = u32::try_from(payload.len()).map_err(|_| {
            CheckpointError::Invalid(format!(
                "checkpoint {} encodes to {} bytes, above the frame limit",
                checkpoint.id,
                payload.len()
            ))
        })?;

        let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&payload);
        Ok(frame)
    }
}

#[async_trait]
impl<S: SerializerProtocol> CheckpointSaver for FileCheckpointSaver<S> {
    async fn save(&self, checkpoint: Checkpoint) -> Result<()> {
        let lock = self.thread_lock(&checkpoint.thread_id).await;
        let guard = lock.lock().await;
        let saved = self.append(&checkpoint).await;
        drop(guard);
        self.release_lock(&checkpoint.thread_id, lock).await;
        saved
    }

    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let mut scan = self.scan(thread_id).await?;
        Ok(scan.checkpoints.pop())
    }

    async fn list(&self, thread_id: &str, limit: Option<usize>) -> Result<CheckpointStream> {
        let scan = self.scan(thread_id).await?;
        let limit = limit.unwrap_or(usize::MAX);
        let newest_first: Vec<Result<Checkpoint>> = scan
            .checkpoints
            .into_iter()
            .rev()
            .take(limit)
            .map(Ok)
            .collect();
        Ok(Box::pin(stream::iter(newest_first)))
    }

    async fn load_version(&self, thread_id: &str, version: u64) -> Result<Option<Checkpoint>> {
        let scan = self.scan(thread_id).await?;
        Ok(scan.checkpoints.into_iter().find(|cp| cp.version == version))
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        let lock = self.thread_lock(thread_id).await;
        let guard = lock.lock().await;
        let removed = match tokio::fs::remove_file(self.log_path(thread_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        };
        drop(guard);
        self.release_lock(thread_id, lock).await;
        removed
    }
}
