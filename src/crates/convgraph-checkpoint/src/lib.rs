//! # convgraph-checkpoint - Durable conversation thread history
//!
//! Checkpoint data model and storage backends for the convgraph engine. A
//! conversation thread is persisted as an append-only lineage of immutable
//! [`Checkpoint`]s. Each one holds the merged state values, the queue of nodes
//! still to run, and metadata about the step that produced it.
//!
//! ## Storage contract
//!
//! Backends implement [`CheckpointSaver`]:
//!
//! - `save` accepts only the next version of a thread (`latest + 1`), which
//!   serializes concurrent writers on one thread through
//!   [`CheckpointError::VersionConflict`]
//! - `load` returns the highest version, or `None` for an unknown thread
//! - `list` walks the history newest first
//!
//! ## Backends
//!
//! | Backend | Durability | Use |
//! |---------|------------|-----|
//! | [`InMemoryCheckpointSaver`] | process lifetime | tests, development |
//! | [`FileCheckpointSaver`] | fsync per append | single-node deployments |
//!
//! The file backend encodes frames through a [`SerializerProtocol`]:
//! [`JsonSerializer`] for inspectable logs, [`BincodeSerializer`] for compact
//! ones.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use convgraph_checkpoint::{
//!     Checkpoint, CheckpointMetadata, CheckpointSaver, CheckpointSource, InMemoryCheckpointSaver,
//! };
//! use serde_json::Map;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let saver = InMemoryCheckpointSaver::new();
//!
//!     let checkpoint = Checkpoint::first(
//!         "thread-123",
//!         Map::new(),
//!         vec!["agent".to_string()],
//!         CheckpointMetadata::new(CheckpointSource::Input),
//!     );
//!     saver.save(checkpoint).await?;
//!
//!     if let Some(latest) = saver.load("thread-123").await? {
//!         println!("thread at version {}", latest.version);
//!     }
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod error;
pub mod file;
pub mod memory;
pub mod serializer;
pub mod traits;

pub use checkpoint::{
    Checkpoint, CheckpointId, CheckpointMetadata, CheckpointSource, PendingInterrupt, ThreadId,
};
pub use error::{CheckpointError, Result};
pub use file::FileCheckpointSaver;
pub use memory::InMemoryCheckpointSaver;
pub use serializer::{BincodeSerializer, JsonSerializer, SerializerProtocol};
pub use traits::{check_next_version, CheckpointSaver, CheckpointStream};
