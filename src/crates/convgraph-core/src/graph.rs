//! Graph structure: nodes, edges, and definition-time validation
//!
//! [`Graph`] is the plain data behind a [`StateGraph`](crate::StateGraph)
//! builder and a [`CompiledGraph`](crate::CompiledGraph). Every node has
//! exactly one outgoing [`Edge`]:
//!
//! ```text
//! __start__ ──> initial_support ──?──> billing_support ──?──> handle_refund ──> __end__
//!                      │                     │
//!                      ├──?──> technical_support ──> __end__
//!                      └──?──> __end__       └──?──> __end__
//! ```
//!
//! `──>` is a static edge (several static targets form a fan-out), `──?──>`
//! a conditional edge whose possible targets are declared up front.

use crate::error::DefinitionError;
use crate::node::{NodeFn, NodeOptions};
use crate::routing::Router;
use crate::state::StateSchema;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

/// Node identifier
pub type NodeId = String;

/// Virtual entry node; its outgoing edge picks the first node(s) of a turn
pub const START: &str = "__start__";

/// Terminal marker; routing here ends the run
pub const END: &str = "__end__";

pub(crate) fn is_reserved(name: &str) -> bool {
    name == START || name == END
}

/// Outgoing edge specification of one node
#[derive(Debug, Clone)]
pub enum Edge {
    /// Always proceed to every listed target, in order
    Static(Vec<NodeId>),
    /// Let a router pick one of its declared targets
    Conditional(Router),
}

impl Edge {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::Static(_) => "a static",
            Self::Conditional(_) => "a conditional",
        }
    }

    /// Every node this edge can lead to, `END` included
    pub fn targets(&self) -> &[String] {
        match self {
            Self::Static(targets) => targets,
            Self::Conditional(router) => router.valid_targets(),
        }
    }
}

/// A registered node
#[derive(Clone)]
pub struct NodeSpec {
    pub name: NodeId,
    pub executor: NodeFn,
    pub options: NodeOptions,
}

impl fmt::Debug for NodeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeSpec")
            .field("name", &self.name)
            .field("executor", &"<function>")
            .field("options", &self.options)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Graph {
    pub(crate) schema: StateSchema,
    pub(crate) nodes: HashMap<NodeId, NodeSpec>,
    /// Registration order, for deterministic validation and rendering
    pub(crate) order: Vec<NodeId>,
    pub(crate) edges: HashMap<NodeId, Edge>,
    pub(crate) interrupt_before: Vec<NodeId>,
}

impl Graph {
    pub fn new(schema: StateSchema) -> Self {
        Self {
            schema,
            nodes: HashMap::new(),
            order: Vec::new(),
            edges: HashMap::new(),
            interrupt_before: Vec::new(),
        }
    }

    pub fn schema(&self) -> &StateSchema {
        &self.schema
    }

    pub fn node(&self, name: &str) -> Option<&NodeSpec> {
        self.nodes.get(name)
    }

    /// Node names in registration order
    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Outgoing edge of a node or of [`START`]
    pub fn edge(&self, from: &str) -> Option<&Edge> {
        self.edges.get(from)
    }

    pub fn interrupt_before(&self) -> &[NodeId] {
        &self.interrupt_before
    }

    pub(crate) fn add_node(&mut self, spec: NodeSpec) -> Result<(), DefinitionError> {
        if is_reserved(&spec.name) {
            return Err(DefinitionError::ReservedName(spec.name));
        }
        if self.nodes.contains_key(&spec.name) {
            return Err(DefinitionError::DuplicateNode(spec.name));
        }
        self.order.push(spec.name.clone());
        self.nodes.insert(spec.name.clone(), spec);
        Ok(())
    }

    fn check_source(&self, from: &str) -> Result<(), DefinitionError> {
        if from == START || self.nodes.contains_key(from) {
            Ok(())
        } else {
            Err(DefinitionError::UnknownNode(from.to_string()))
        }
    }

    fn check_target(&self, to: &str) -> Result<(), DefinitionError> {
        if to == END || self.nodes.contains_key(to) {
            Ok(())
        } else {
            Err(DefinitionError::UnknownNode(to.to_string()))
        }
    }

    pub(crate) fn add_static_edge(&mut self, from: &str, to: &str) -> Result<(), DefinitionError> {
        self.check_source(from)?;
        self.check_target(to)?;

        match self.edges.get_mut(from) {
            None => {
                self.edges
                    .insert(from.to_string(), Edge::Static(vec![to.to_string()]));
                Ok(())
            }
            Some(Edge::Static(targets)) => {
                if !targets.iter().any(|t| t == to) {
                    targets.push(to.to_string());
                }
                Ok(())
            }
            Some(existing) => Err(DefinitionError::ConflictingEdges {
                node: from.to_string(),
                existing: existing.kind(),
                attempted: "a static",
            }),
        }
    }

    pub(crate) fn add_conditional_edge(
        &mut self,
        from: &str,
        router: Router,
    ) -> Result<(), DefinitionError> {
        self.check_source(from)?;
        for target in router.valid_targets() {
            self.check_target(target)?;
        }

        if let Some(existing) = self.edges.get(from) {
            return Err(DefinitionError::ConflictingEdges {
                node: from.to_string(),
                existing: existing.kind(),
                attempted: "a conditional",
            });
        }
        self.edges.insert(from.to_string(), Edge::Conditional(router));
        Ok(())
    }

    /// Structural checks run by `compile`
    pub fn validate(&self) -> Result<(), DefinitionError> {
        if !self.edges.contains_key(START) {
            return Err(DefinitionError::MissingStartEdge);
        }

        if let Some(node) = self.order.iter().find(|n| !self.edges.contains_key(*n)) {
            return Err(DefinitionError::MissingOutgoingEdge(node.clone()));
        }

        let reachable = self.reachable_from_start();
        if let Some(node) = self.order.iter().find(|n| !reachable.contains(n.as_str())) {
            return Err(DefinitionError::UnreachableNode(node.clone()));
        }

        for name in &self.order {
            let options = &self.nodes[name].options;
            let declared = options.reads.iter().chain(options.writes.iter()).flatten();
            if let Some(field) = declared.into_iter().find(|f| !self.schema.contains(f)) {
                return Err(DefinitionError::UnknownField {
                    node: name.clone(),
                    field: field.clone(),
                });
            }
        }

        if let Some(node) = self
            .interrupt_before
            .iter()
            .find(|n| !self.nodes.contains_key(*n))
        {
            return Err(DefinitionError::UnknownNode(node.clone()));
        }

        Ok(())
    }

    fn reachable_from_start(&self) -> HashSet<&str> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut frontier: VecDeque<&str> = VecDeque::from([START]);

        while let Some(current) = frontier.pop_front() {
            let Some(edge) = self.edges.get(current) else {
                continue;
            };
            for target in edge.targets() {
                if target != END && seen.insert(target.as_str()) {
                    frontier.push_back(target.as_str());
                }
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{boxed, NodeOptions, NodeOutcome};
    use crate::state::{OverwriteReducer, State};

    fn spec(name: &str) -> NodeSpec {
        NodeSpec {
            name: name.to_string(),
            executor: boxed(|_state: State| async { Ok(NodeOutcome::unchanged()) }),
            options: NodeOptions::default(),
        }
    }

    fn graph_with(nodes: &[&str]) -> Graph {
        let mut graph = Graph::new(StateSchema::messages());
        for name in nodes {
            graph.add_node(spec(name)).unwrap();
        }
        graph
    }

    #[test]
    fn test_reserved_and_duplicate_names() {
        let mut graph = graph_with(&["agent"]);
        assert_eq!(
            graph.add_node(spec(START)),
            Err(DefinitionError::ReservedName(START.into()))
        );
        assert_eq!(
            graph.add_node(spec("agent")),
            Err(DefinitionError::DuplicateNode("agent".into()))
        );
    }

    #[test]
    fn test_edges_need_known_endpoints() {
        let mut graph = graph_with(&["agent"]);
        assert_eq!(
            graph.add_static_edge("agent", "tools"),
            Err(DefinitionError::UnknownNode("tools".into()))
        );
        assert_eq!(
            graph.add_static_edge(END, "agent"),
            Err(DefinitionError::UnknownNode(END.into()))
        );
        assert!(graph.add_static_edge(START, "agent").is_ok());
    }

    #[test]
    fn test_static_edges_fan_out() {
        let mut graph = graph_with(&["a", "b", "c"]);
        graph.add_static_edge("a", "b").unwrap();
        graph.add_static_edge("a", "c").unwrap();
        graph.add_static_edge("a", "b").unwrap();

        assert_eq!(graph.edge("a").unwrap().targets(), ["b", "c"]);
    }

    #[test]
    fn test_mixed_edges_conflict() {
        let mut graph = graph_with(&["a", "b"]);
        graph.add_static_edge("a", "b").unwrap();

        let router = Router::from_fn(|_: &State| END, vec![END.to_string()]);
        let err = graph.add_conditional_edge("a", router).unwrap_err();
        assert!(matches!(err, DefinitionError::ConflictingEdges { ref node, .. } if node == "a"));
    }

    #[test]
    fn test_validate_reports_missing_and_unreachable() {
        let graph = graph_with(&["a"]);
        assert_eq!(graph.validate(), Err(DefinitionError::MissingStartEdge));

        let mut graph = graph_with(&["a", "b"]);
        graph.add_static_edge(START, "a").unwrap();
        graph.add_static_edge("a", END).unwrap();
        assert_eq!(
            graph.validate(),
            Err(DefinitionError::MissingOutgoingEdge("b".into()))
        );

        graph.add_static_edge("b", END).unwrap();
        assert_eq!(graph.validate(), Err(DefinitionError::UnreachableNode("b".into())));
    }

    #[test]
    fn test_validate_checks_declared_fields() {
        let mut graph = Graph::new(StateSchema::messages().with_field("flag", OverwriteReducer));
        let mut node = spec("a");
        node.options = NodeOptions::new().writes(["flag", "missing"]);
        graph.add_node(node).unwrap();
        graph.add_static_edge(START, "a").unwrap();
        graph.add_static_edge("a", END).unwrap();

        assert_eq!(
            graph.validate(),
            Err(DefinitionError::UnknownField {
                node: "a".into(),
                field: "missing".into()
            })
        );
    }

    #[test]
    fn test_cycles_are_allowed() {
        let mut graph = graph_with(&["agent", "tools"]);
        graph.add_static_edge(START, "agent").unwrap();
        let router = Router::from_fn(
            |s: &State| if s.contains("done") { END } else { "tools" },
            vec!["tools".to_string(), END.to_string()],
        );
        graph.add_conditional_edge("agent", router).unwrap();
        graph.add_static_edge("tools", "agent").unwrap();

        assert!(graph.validate().is_ok());
    }
}
