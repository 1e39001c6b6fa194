//! StateGraph builder API for conversation workflows
//!
//! [`StateGraph`] collects nodes, edges and static interrupts over a
//! [`StateSchema`], then compiles into an executable
//! [`CompiledGraph`](crate::CompiledGraph). Every mutating call validates
//! what it can immediately; whole-graph checks (reachability, missing edges,
//! declared fields) run in [`compile`](StateGraph::compile).
//!
//! # Quick Start
//!
//! ```rust
//! use convgraph_core::{Message, StateGraph, StateSchema, StateUpdate, END, START};
//! use convgraph_core::error::NodeError;
//! use convgraph_core::{NodeOutcome, State};
//!
//! async fn respond(_state: State) -> Result<NodeOutcome, NodeError> {
//!     Ok(StateUpdate::new().message(Message::assistant("Hello!")).into())
//! }
//!
//! # async fn example() -> convgraph_core::Result<()> {
//! let mut graph = StateGraph::new(StateSchema::messages());
//! graph.add_node("respond", respond)?;
//! graph.add_edge(START, "respond")?;
//! graph.add_edge("respond", END)?;
//!
//! let compiled = graph.compile()?;
//! let outcome = compiled
//!     .invoke("thread-1", Some(StateUpdate::new().message(Message::user("hi"))))
//!     .await?;
//! assert_eq!(outcome.values.messages()?.len(), 2);
//! # Ok(())
//! # }
//! ```
//!
//! # Edges
//!
//! A node has either static edges (one or more targets, executed in the
//! order they were added) or a single conditional edge. Mixing the two on
//! the same source is rejected with
//! [`DefinitionError::ConflictingEdges`]. Conditional edges always declare
//! the full set of targets they may pick, either as a list of names
//! ([`add_conditional_edge`](StateGraph::add_conditional_edge)) or through a
//! [`Branch`] enum ([`add_branch`](StateGraph::add_branch)).

use crate::compiled::CompiledGraph;
use crate::config::EngineConfig;
use crate::error::{DefinitionError, Result};
use crate::graph::{Graph, NodeSpec};
use crate::node::{boxed, NodeOptions, NodeResult};
use crate::routing::{Branch, Router};
use crate::state::{State, StateSchema};
use crate::tools::ToolNode;
use std::future::Future;
use std::sync::Arc;

/// Builder for a conversation graph over a fixed state schema
#[derive(Debug, Clone)]
pub struct StateGraph {
    graph: Graph,
}

impl StateGraph {
    pub fn new(schema: StateSchema) -> Self {
        Self {
            graph: Graph::new(schema),
        }
    }

    /// Register a node with default options
    ///
    /// Fails with [`DefinitionError::DuplicateNode`] if the name is taken and
    /// [`DefinitionError::ReservedName`] for `__start__` / `__end__`.
    pub fn add_node<F, Fut>(
        &mut self,
        name: impl Into<String>,
        node: F,
    ) -> std::result::Result<&mut Self, DefinitionError>
    where
        F: Fn(State) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = NodeResult> + Send + 'static,
    {
        self.add_node_with(name, NodeOptions::default(), node)
    }

    /// Register a node with declared reads/writes, retry policy or history view
    pub fn add_node_with<F, Fut>(
        &mut self,
        name: impl Into<String>,
        options: NodeOptions,
        node: F,
    ) -> std::result::Result<&mut Self, DefinitionError>
    where
        F: Fn(State) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = NodeResult> + Send + 'static,
    {
        self.graph.add_node(NodeSpec {
            name: name.into(),
            executor: boxed(node),
            options,
        })?;
        Ok(self)
    }

    /// Register a [`ToolNode`] answering the last message's tool calls
    pub fn add_tool_node(
        &mut self,
        name: impl Into<String>,
        tools: ToolNode,
    ) -> std::result::Result<&mut Self, DefinitionError> {
        let tools = Arc::new(tools);
        self.add_node(name, move |state: State| {
            let tools = Arc::clone(&tools);
            async move { tools.execute(state).await }
        })
    }

    /// Add a static edge; repeated calls on the same source fan out
    pub fn add_edge(
        &mut self,
        from: &str,
        to: &str,
    ) -> std::result::Result<&mut Self, DefinitionError> {
        self.graph.add_static_edge(from, to)?;
        Ok(self)
    }

    /// Add a conditional edge whose router returns a node name
    ///
    /// `valid_targets` must list every name the router can return, `END`
    /// included; anything else fails the run with a routing error.
    pub fn add_conditional_edge<F, R, I, S>(
        &mut self,
        from: &str,
        router: F,
        valid_targets: I,
    ) -> std::result::Result<&mut Self, DefinitionError>
    where
        F: Fn(&State) -> R + Send + Sync + 'static,
        R: Into<String>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let valid = valid_targets.into_iter().map(Into::into).collect();
        self.graph
            .add_conditional_edge(from, Router::from_fn(router, valid))?;
        Ok(self)
    }

    /// Add a conditional edge whose router returns a [`Branch`] variant
    pub fn add_branch<B, F>(
        &mut self,
        from: &str,
        router: F,
    ) -> std::result::Result<&mut Self, DefinitionError>
    where
        B: Branch,
        F: Fn(&State) -> B + Send + Sync + 'static,
    {
        self.graph
            .add_conditional_edge(from, Router::from_branch(router))?;
        Ok(self)
    }

    /// Suspend before these nodes run, as if they had interrupted themselves
    pub fn interrupt_before<I, S>(&mut self, nodes: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for node in nodes {
            let node = node.into();
            if !self.graph.interrupt_before.contains(&node) {
                self.graph.interrupt_before.push(node);
            }
        }
        self
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Validate and compile with an in-memory checkpointer
    ///
    /// Performs no I/O and can be called repeatedly; each call yields an
    /// independent [`CompiledGraph`].
    pub fn compile(&self) -> Result<CompiledGraph> {
        self.graph.validate()?;
        Ok(CompiledGraph::new(self.graph.clone()))
    }

    /// Compile with the recursion limit, default retry policy and
    /// checkpoint backend of `config`
    pub fn compile_with_config(&self, config: &EngineConfig) -> Result<CompiledGraph> {
        config.validate()?;
        let compiled = self
            .compile()?
            .with_checkpointer(config.build_checkpointer()?)
            .with_recursion_limit(config.recursion_limit);

        Ok(match &config.default_retry {
            Some(policy) => compiled.with_default_retry(policy.clone()),
            None => compiled,
        })
    }
}
