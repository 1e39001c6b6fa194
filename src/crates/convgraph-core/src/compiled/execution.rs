//! Run loop: invoke, run and the per-node step

use super::{CompiledGraph, RunEvent, RunOutcome, RunStatus, RunStream, StepDelta};
use crate::error::{DefinitionError, GraphError, Result};
use crate::graph::{Edge, NodeId, NodeSpec, END, START};
use crate::node::{Interrupt, NodeOutcome};
use crate::retry::RetryPolicy;
use crate::state::{State, StateError, StateUpdate};
use convgraph_checkpoint::{Checkpoint, CheckpointMetadata, CheckpointSource, PendingInterrupt};
use futures::StreamExt;
use std::collections::VecDeque;
use tracing::{debug, error, info, instrument, warn};

impl CompiledGraph {
    /// Run a thread until its queue drains, a node suspends, or an error
    ///
    /// | thread state | `input` | behavior |
    /// |--------------|---------|----------|
    /// | unknown | `Some` | merge input into an empty state, start at `__start__` |
    /// | unknown | `None` | [`GraphError::ThreadNotFound`] |
    /// | pending nodes | `None` | resume at the front of the queue |
    /// | pending nodes | `Some` | [`GraphError::PendingTasks`] |
    /// | idle | `Some` | new turn: merge input, start at `__start__` |
    /// | idle | `None` | nothing to do, the stream is empty |
    ///
    /// The stream is lazy: nothing is loaded or executed until it is polled.
    /// Dropping it abandons the run after the last persisted step.
    pub fn run(&self, thread_id: impl Into<String>, input: Option<StateUpdate>) -> RunStream {
        let graph = self.clone();
        let thread_id = thread_id.into();

        Box::pin(async_stream::stream! {
            let mut run = match graph.open_run(&thread_id, input).await {
                Ok(run) => run,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            loop {
                match run.advance().await {
                    Ok(Some(event)) => {
                        let suspended = matches!(event, RunEvent::Interrupted { .. });
                        yield Ok(event);
                        if suspended {
                            return;
                        }
                    }
                    Ok(None) => return,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        })
    }

    /// Drive [`run`](Self::run) to the end and report where the thread stands
    pub async fn invoke(
        &self,
        thread_id: impl Into<String>,
        input: Option<StateUpdate>,
    ) -> Result<RunOutcome> {
        let thread_id = thread_id.into();
        let mut events = self.run(thread_id.clone(), input);
        while let Some(event) = events.next().await {
            event?;
        }

        let head = self
            .checkpointer
            .load(&thread_id)
            .await?
            .ok_or_else(|| GraphError::ThreadNotFound(thread_id.clone()))?;

        let status = match head.metadata.interrupt {
            Some(PendingInterrupt { node, reason }) if !head.next_nodes.is_empty() => {
                RunStatus::Interrupted { node, reason }
            }
            _ => RunStatus::Completed,
        };

        Ok(RunOutcome {
            values: State::from(head.values),
            status,
            version: head.version,
        })
    }

    /// Load the thread and apply `input`, persisting an input checkpoint
    #[instrument(skip(self, input), fields(has_input = input.is_some()))]
    async fn open_run(&self, thread_id: &str, input: Option<StateUpdate>) -> Result<RunLoop> {
        let head = self.checkpointer.load(thread_id).await?;

        let head = match (head, input) {
            (None, None) => return Err(GraphError::ThreadNotFound(thread_id.to_string())),
            (Some(head), None) => {
                if head.is_idle() {
                    debug!(version = head.version, "Thread is idle, nothing to resume");
                } else {
                    info!(version = head.version, next = ?head.next_nodes, "Resuming thread");
                }
                head
            }
            (Some(head), Some(_)) if !head.is_idle() => {
                return Err(GraphError::PendingTasks {
                    thread_id: thread_id.to_string(),
                    pending: head.next_nodes,
                });
            }
            (head, Some(input)) => {
                let mut state = head
                    .as_ref()
                    .map(|h| State::from(h.values.clone()))
                    .unwrap_or_default();
                self.graph.schema.apply(&mut state, &input)?;
                let mut queue = VecDeque::new();
                enqueue(&mut queue, self.successors(START, &state)?);
                let next: Vec<NodeId> = queue.into_iter().collect();

                let step = head.as_ref().map_or(0, |h| h.metadata.step + 1);
                let metadata = CheckpointMetadata::new(CheckpointSource::Input)
                    .with_step(step)
                    .with_writes(input.into_map());
                let checkpoint = match &head {
                    Some(head) => head.successor(state.into_values(), next, metadata),
                    None => Checkpoint::first(thread_id, state.into_values(), next, metadata),
                };
                self.checkpointer.save(checkpoint.clone()).await?;

                info!(
                    version = checkpoint.version,
                    next = ?checkpoint.next_nodes,
                    "Starting turn"
                );
                checkpoint
            }
        };

        Ok(RunLoop::new(self.clone(), head))
    }

    /// Targets of `from`'s outgoing edge, evaluated against `state`
    pub(crate) fn successors(&self, from: &str, state: &State) -> Result<Vec<NodeId>> {
        match self.graph.edge(from) {
            Some(Edge::Static(targets)) => Ok(targets.clone()),
            Some(Edge::Conditional(router)) => match router.route(from, state) {
                Ok(target) => {
                    debug!(node = from, target = %target, "Routing decision");
                    Ok(vec![target])
                }
                Err(e) => {
                    error!(node = from, error = %e, "Routing failed");
                    Err(e)
                }
            },
            None => Err(DefinitionError::MissingOutgoingEdge(from.to_string()).into()),
        }
    }

    /// Invoke a node with its retry policy; only `Err` results are retried
    #[instrument(skip(self, spec, state), fields(node = %spec.name))]
    async fn execute_node(&self, spec: &NodeSpec, state: &State) -> Result<NodeOutcome> {
        let policy = spec
            .options
            .retry
            .clone()
            .or_else(|| self.default_retry.clone())
            .unwrap_or_else(RetryPolicy::single_attempt);
        let input = spec.options.input_view(state);

        let mut attempts = 0;
        loop {
            attempts += 1;
            debug!(
                attempt = attempts,
                max_attempts = policy.max_attempts,
                "Executing node"
            );

            match (spec.executor)(input.clone()).await {
                Ok(outcome) => {
                    if attempts > 1 {
                        info!(attempts, "Node succeeded after retry");
                    }
                    return Ok(outcome);
                }
                Err(e) if policy.should_retry(attempts) => {
                    let delay = policy.delay_after(attempts);
                    warn!(
                        attempt = attempts,
                        max_attempts = policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Node failed, retrying after delay"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(attempts, error = %e, "Node failed after all retry attempts");
                    return Err(GraphError::node_execution(&spec.name, attempts, e));
                }
            }
        }
    }
}

/// Append routed targets, skipping `END` and nodes already queued
fn enqueue(queue: &mut VecDeque<NodeId>, targets: Vec<NodeId>) {
    for target in targets {
        if target != END && !queue.contains(&target) {
            queue.push_back(target);
        }
    }
}

/// State of one `run` call; owns the in-memory copy of the thread head
struct RunLoop {
    graph: CompiledGraph,
    head: Checkpoint,
    state: State,
    queue: VecDeque<NodeId>,
    executed: usize,
    /// Node whose pending interrupt this run is resuming
    resuming: Option<NodeId>,
}

impl RunLoop {
    fn new(graph: CompiledGraph, head: Checkpoint) -> Self {
        let resuming = head
            .metadata
            .interrupt
            .as_ref()
            .filter(|pending| head.next_nodes.first() == Some(&pending.node))
            .map(|pending| pending.node.clone());

        Self {
            state: State::from(head.values.clone()),
            queue: head.next_nodes.iter().cloned().collect(),
            graph,
            head,
            executed: 0,
            resuming,
        }
    }

    /// Execute the front of the queue; `None` once the queue is empty
    async fn advance(&mut self) -> Result<Option<RunEvent>> {
        let Some(node) = self.queue.front().cloned() else {
            info!(
                thread_id = %self.head.thread_id,
                version = self.head.version,
                "Run completed"
            );
            return Ok(None);
        };

        let resuming = self.resuming.take();
        if self.graph.graph.interrupt_before.contains(&node) && resuming.as_ref() != Some(&node) {
            let reason = format!("interrupt before '{node}'");
            return self.suspend(node, Interrupt::new(reason)).await.map(Some);
        }

        if self.executed >= self.graph.recursion_limit {
            error!(
                thread_id = %self.head.thread_id,
                limit = self.graph.recursion_limit,
                "Recursion limit reached"
            );
            return Err(GraphError::RecursionLimit {
                thread_id: self.head.thread_id.clone(),
                limit: self.graph.recursion_limit,
            });
        }

        let graph = self.graph.clone();
        let spec = graph
            .graph
            .node(&node)
            .ok_or_else(|| DefinitionError::UnknownNode(node.clone()))?;

        self.executed += 1;
        match graph.execute_node(spec, &self.state).await? {
            NodeOutcome::Continue(update) => self.commit(spec, update).await.map(Some),
            NodeOutcome::Suspend(interrupt) => self.suspend(node, interrupt).await.map(Some),
        }
    }

    /// Merge, route and persist a successful node; nothing is kept on error
    async fn commit(&mut self, spec: &NodeSpec, update: StateUpdate) -> Result<RunEvent> {
        if let Some(field) = update.fields().find(|f| !spec.options.may_write(f)) {
            return Err(StateError::UndeclaredWrite {
                node: spec.name.clone(),
                field: field.clone(),
            }
            .into());
        }

        let mut merged = self.state.clone();
        self.graph.graph.schema.apply(&mut merged, &update)?;

        let mut queue = self.queue.clone();
        queue.pop_front();
        enqueue(&mut queue, self.graph.successors(&spec.name, &merged)?);
        let next: Vec<NodeId> = queue.iter().cloned().collect();

        let metadata = CheckpointMetadata::new(CheckpointSource::Loop)
            .with_step(self.head.metadata.step + 1)
            .with_writer(spec.name.as_str())
            .with_writes(update.as_map().clone());
        let checkpoint = self
            .head
            .successor(merged.values().clone(), next.clone(), metadata);
        self.graph.checkpointer.save(checkpoint.clone()).await?;

        debug!(
            node = %spec.name,
            version = checkpoint.version,
            next = ?next,
            "Node finished"
        );

        let version = checkpoint.version;
        self.state = merged;
        self.queue = queue;
        self.head = checkpoint;

        Ok(RunEvent::Step(StepDelta {
            node: spec.name.clone(),
            update,
            version,
            next,
        }))
    }

    /// Persist the current state with `node` still at the front of the queue
    async fn suspend(&mut self, node: NodeId, interrupt: Interrupt) -> Result<RunEvent> {
        let metadata = CheckpointMetadata::new(CheckpointSource::Loop)
            .with_step(self.head.metadata.step)
            .with_writer(node.as_str())
            .with_interrupt(PendingInterrupt::new(node.as_str(), interrupt.reason.as_str()));
        let checkpoint = self.head.successor(
            self.state.values().clone(),
            self.queue.iter().cloned().collect(),
            metadata,
        );
        self.graph.checkpointer.save(checkpoint.clone()).await?;

        info!(
            thread_id = %checkpoint.thread_id,
            node = %node,
            reason = %interrupt.reason,
            version = checkpoint.version,
            "Run interrupted"
        );

        let version = checkpoint.version;
        self.head = checkpoint;

        Ok(RunEvent::Interrupted {
            node,
            reason: interrupt.reason,
            version,
        })
    }
}
