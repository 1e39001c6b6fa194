//! CompiledGraph execution engine
//!
//! Once a [`StateGraph`](crate::StateGraph) is compiled it becomes a
//! [`CompiledGraph`]: an immutable, cheaply clonable runtime that drives any
//! number of independent threads. Each thread is a conversation whose
//! history lives in the configured checkpointer.
//!
//! # Execution model
//!
//! ```text
//!            ┌──────────────── run(thread, input) ────────────────┐
//!            │                                                    │
//!  load head ─► queue = head.next_nodes ─► pop front ─► node(state)
//!                     ▲                                    │
//!                     │              Continue(update)      │  Suspend(reason)
//!                     │         merge ─► route ─► save     │  save (queue kept)
//!                     └──────────── emit Step ◄────────────┘  emit Interrupted, stop
//! ```
//!
//! Nodes run one at a time in queue order. A checkpoint is written after
//! every node, so a run can be abandoned at any point (drop the stream) and
//! picked up later with `run(thread, None)`.
//!
//! # Entry points
//!
//! - [`CompiledGraph::run`] - lazy stream of [`RunEvent`]s
//! - [`CompiledGraph::invoke`] - drive the stream to the end, return a [`RunOutcome`]
//! - [`CompiledGraph::get_state`] / [`CompiledGraph::update_state`] - inspect
//!   and patch a thread between runs
//! - [`CompiledGraph::get_state_history`] - every checkpoint of a thread, newest first

mod execution;
mod graph;
mod state;
mod types;

pub use graph::{CompiledGraph, DEFAULT_RECURSION_LIMIT};
pub use types::{
    PendingTask, RunEvent, RunOutcome, RunStatus, RunStream, StateSnapshot, StateSnapshotStream,
    StepDelta,
};
