//! Checkpoint data structures
//!
//! A [`Checkpoint`] is an immutable snapshot of one conversation thread: the
//! merged state values, the queue of nodes scheduled next, and metadata about
//! what produced the snapshot. Checkpoints of a thread form an append-only
//! lineage ordered by [`Checkpoint::version`]; the highest version is the
//! authoritative one for execution.
//!
//! ```text
//! thread "refund-42"
//!   v1  source=input   next=[initial_support]
//!   v2  source=loop    next=[billing_support]   writer=initial_support
//!   v3  source=loop    next=[handle_refund]     writer=billing_support
//!   v4  source=loop    next=[handle_refund]     interrupt="authorization required"
//!   v5  source=update  next=[handle_refund]     interrupt carried over
//!   v6  source=loop    next=[]                  writer=handle_refund
//! ```
//!
//! Nothing in this module mutates a checkpoint after construction; new
//! snapshots are derived with [`Checkpoint::successor`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Unique identifier of a single checkpoint
pub type CheckpointId = String;

/// Opaque conversation thread identifier
pub type ThreadId = String;

/// How a checkpoint came to exist
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointSource {
    /// Caller-provided input starting a new turn
    Input,
    /// A node finished or suspended during a run
    Loop,
    /// External state mutation between runs
    Update,
}

/// Suspension recorded on a checkpoint whose queue starts with `node`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingInterrupt {
    pub node: String,
    pub reason: String,
}

impl PendingInterrupt {
    pub fn new(node: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            reason: reason.into(),
        }
    }
}

/// Metadata describing the origin of a checkpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointMetadata {
    pub source: CheckpointSource,

    /// Number of node executions recorded in the lineage up to this snapshot
    pub step: u64,

    /// Node whose update produced this snapshot, if any
    pub writer: Option<String>,

    /// Partial update applied on top of the parent snapshot
    #[serde(with = "json_map")]
    pub writes: Map<String, Value>,

    /// Set while the head of the queue is suspended
    pub interrupt: Option<PendingInterrupt>,
}

impl CheckpointMetadata {
    pub fn new(source: CheckpointSource) -> Self {
        Self {
            source,
            step: 0,
            writer: None,
            writes: Map::new(),
            interrupt: None,
        }
    }

    pub fn with_step(mut self, step: u64) -> Self {
        self.step = step;
        self
    }

    pub fn with_writer(mut self, node: impl Into<String>) -> Self {
        self.writer = Some(node.into());
        self
    }

    pub fn with_writes(mut self, writes: Map<String, Value>) -> Self {
        self.writes = writes;
        self
    }

    pub fn with_interrupt(mut self, interrupt: PendingInterrupt) -> Self {
        self.interrupt = Some(interrupt);
        self
    }
}

/// Immutable snapshot of a thread's state and pending node queue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub id: CheckpointId,

    pub thread_id: ThreadId,

    /// Position in the thread lineage, starting at [`Checkpoint::FIRST_VERSION`]
    pub version: u64,

    pub parent_id: Option<CheckpointId>,

    pub ts: DateTime<Utc>,

    #[serde(with = "json_map")]
    pub values: Map<String, Value>,

    /// Ordered queue of nodes to run next; empty once the terminal marker is reached
    pub next_nodes: Vec<String>,

    pub metadata: CheckpointMetadata,
}

impl Checkpoint {
    pub const FIRST_VERSION: u64 = 1;

    /// First snapshot of a new thread
    pub fn first(
        thread_id: impl Into<ThreadId>,
        values: Map<String, Value>,
        next_nodes: Vec<String>,
        metadata: CheckpointMetadata,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            thread_id: thread_id.into(),
            version: Self::FIRST_VERSION,
            parent_id: None,
            ts: Utc::now(),
            values,
            next_nodes,
            metadata,
        }
    }

    /// Derive the next snapshot in this lineage
    pub fn successor(
        &self,
        values: Map<String, Value>,
        next_nodes: Vec<String>,
        metadata: CheckpointMetadata,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            thread_id: self.thread_id.clone(),
            version: self.version + 1,
            parent_id: Some(self.id.clone()),
            ts: Utc::now(),
            values,
            next_nodes,
            metadata,
        }
    }

    /// True when no node is scheduled
    pub fn is_idle(&self) -> bool {
        self.next_nodes.is_empty()
    }
}

/// JSON maps round-trip natively through self-describing formats; compact
/// binary formats (bincode) cannot drive `serde_json::Value`, so those get the
/// map as an embedded JSON string.
mod json_map {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use serde_json::{Map, Value};

    pub fn serialize<S: Serializer>(map: &Map<String, Value>, s: S) -> Result<S::Ok, S::Error> {
        if s.is_human_readable() {
            map.serialize(s)
        } else {
            let text = serde_json::to_string(map).map_err(serde::ser::Error::custom)?;
            text.serialize(s)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Map<String, Value>, D::Error> {
        if d.is_human_readable() {
            Map::deserialize(d)
        } else {
            let text = String::deserialize(d)?;
            serde_json::from_str(&text).map_err(D::Error::custom)
        }
    }
}
