//! `Graph`: a node registry plus the edges between them (spec §4.3, §9
//! "Cyclic pipeline graphs" — represented as a registry and a transition
//! function, not a tree, since the developer/reviewer loop is a true
//! cycle).

use std::collections::HashMap;
use std::sync::Arc;

use amelia_db::models::PipelineState;

use super::node::Node;

/// An edge out of a node: either always go to the named next node, or
/// decide dynamically from the current state (spec §4.3's "conditional
/// edge" used for the reviewer's approve/reject/iterate branch).
pub enum Edge {
    Unconditional(String),
    Conditional(Box<dyn Fn(&PipelineState) -> String + Send + Sync>),
}

impl Edge {
    pub fn resolve(&self, state: &PipelineState) -> String {
        match self {
            Edge::Unconditional(next) => next.clone(),
            Edge::Conditional(f) => f(state),
        }
    }
}

impl std::fmt::Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Edge::Unconditional(next) => write!(f, "Unconditional({next:?})"),
            Edge::Conditional(_) => write!(f, "Conditional(<fn>)"),
        }
    }
}

/// The name of the pseudo-node a graph's edges point to when the pipeline
/// has reached a successful or failed terminal state. The engine recognizes
/// these names specially and does not look them up in the node registry.
pub const TERMINAL_SUCCESS: &str = "__terminal_success__";
pub const TERMINAL_FAILURE: &str = "__terminal_failure__";

/// A directed graph of [`Node`]s. May contain cycles — the engine enforces
/// a maximum step count as the safety net (spec §4.3, §9).
pub struct Graph {
    pub(crate) entry: String,
    pub(crate) nodes: HashMap<String, Arc<dyn Node>>,
    pub(crate) edges: HashMap<String, Edge>,
}

impl Graph {
    pub fn builder(entry: impl Into<String>) -> GraphBuilder {
        GraphBuilder {
            entry: entry.into(),
            nodes: HashMap::new(),
            edges: HashMap::new(),
        }
    }

    pub fn node(&self, name: &str) -> Option<&Arc<dyn Node>> {
        self.nodes.get(name)
    }

    pub fn edge(&self, name: &str) -> Option<&Edge> {
        self.edges.get(name)
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }
}

/// Builds a [`Graph`] from named nodes and the edges between them.
pub struct GraphBuilder {
    entry: String,
    nodes: HashMap<String, Arc<dyn Node>>,
    edges: HashMap<String, Edge>,
}

impl GraphBuilder {
    pub fn with_node(mut self, node: Arc<dyn Node>) -> Self {
        self.nodes.insert(node.name().to_string(), node);
        self
    }

    pub fn with_edge(mut self, from: impl Into<String>, edge: Edge) -> Self {
        self.edges.insert(from.into(), edge);
        self
    }

    pub fn build(self) -> Graph {
        Graph {
            entry: self.entry,
            nodes: self.nodes,
            edges: self.edges,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::node::{ResumePayload, StepResult};
    use async_trait::async_trait;

    struct StubNode(&'static str);

    #[async_trait]
    impl Node for StubNode {
        fn name(&self) -> &str {
            self.0
        }

        async fn run(
            &self,
            _state: &PipelineState,
            _resume: Option<ResumePayload>,
        ) -> anyhow::Result<StepResult> {
            Ok(StepResult::Continue(Default::default()))
        }
    }

    #[test]
    fn unconditional_edge_resolves_to_fixed_target() {
        let edge = Edge::Unconditional("developer".into());
        let state = PipelineState::new(uuid::Uuid::new_v4(), None, "t".into(), "d".into(), None, 3);
        assert_eq!(edge.resolve(&state), "developer");
    }

    #[test]
    fn conditional_edge_branches_on_state() {
        let edge = Edge::Conditional(Box::new(|state: &PipelineState| {
            if state.iteration >= state.max_iterations {
                TERMINAL_FAILURE.to_string()
            } else {
                "developer".to_string()
            }
        }));
        let mut state =
            PipelineState::new(uuid::Uuid::new_v4(), None, "t".into(), "d".into(), None, 1);
        assert_eq!(edge.resolve(&state), "developer");
        state.iteration = 1;
        assert_eq!(edge.resolve(&state), TERMINAL_FAILURE);
    }

    #[test]
    fn builder_registers_nodes_by_name() {
        let graph = Graph::builder("architect")
            .with_node(Arc::new(StubNode("architect")))
            .with_node(Arc::new(StubNode("developer")))
            .with_edge("architect", Edge::Unconditional("developer".into()))
            .build();

        assert_eq!(graph.entry(), "architect");
        assert!(graph.node("architect").is_some());
        assert!(graph.node("developer").is_some());
        assert!(graph.node("reviewer").is_none());
        assert_eq!(graph.edge("architect").unwrap().resolve(
            &PipelineState::new(uuid::Uuid::new_v4(), None, "t".into(), "d".into(), None, 3)
        ), "developer");
    }
}
