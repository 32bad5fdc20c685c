//! Declarative state graphs over agents and functions.
//!
//! A graph is a finite set of named nodes (pure functions of the state, or
//! agents wrapped in [`AgentNode`]) plus edges: unconditional, or
//! conditional with a router evaluated on the live state. `compile()`
//! validates the shape and produces an executable schedule; parallel node
//! outputs merge through per-field reducers.

mod executor;
mod node;

pub use executor::{CompiledGraph, GraphEvent};
pub use node::AgentNode;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use serde_json::Value;

pub const START: &str = "__start__";
pub const END: &str = "__end__";

/// The state value flowing through the graph.
pub type GraphState = HashMap<String, Value>;

/// A node's partial-state output.
pub type StateUpdate = HashMap<String, Value>;

/// How concurrent writes to one field fold together.
#[derive(Clone)]
pub enum Reducer {
    /// Last write wins. Two concurrent writers with this reducer are a
    /// scheduling error.
    Replace,
    /// Arrays concatenate; a non-array write appends as a single element.
    Append,
    Custom(Arc<dyn Fn(Value, Value) -> Value + Send + Sync>),
}

impl Reducer {
    pub fn apply(&self, old: Option<Value>, new: Value) -> Value {
        match self {
            Self::Replace => new,
            Self::Append => {
                let mut items = match old {
                    Some(Value::Array(items)) => items,
                    Some(other) => vec![other],
                    None => Vec::new(),
                };
                match new {
                    Value::Array(new_items) => items.extend(new_items),
                    other => items.push(other),
                }
                Value::Array(items)
            }
            Self::Custom(f) => f(old.unwrap_or(Value::Null), new),
        }
    }

    pub fn is_replace(&self) -> bool {
        matches!(self, Self::Replace)
    }
}

pub(crate) type NodeFn =
    Arc<dyn Fn(GraphState) -> BoxFuture<'static, Result<StateUpdate>> + Send + Sync>;

pub(crate) type RouterFn = Arc<dyn Fn(&GraphState) -> Vec<String> + Send + Sync>;

pub(crate) enum NodeKind {
    Func(NodeFn),
    Agent(AgentNode),
}

pub(crate) struct EdgeSet {
    pub direct: Vec<String>,
    pub conditional: Vec<(RouterFn, Vec<String>)>,
}

impl EdgeSet {
    fn new() -> Self {
        Self {
            direct: Vec::new(),
            conditional: Vec::new(),
        }
    }

    /// Every node this edge set could ever fire into.
    pub fn potential_targets(&self) -> impl Iterator<Item = &String> {
        self.direct
            .iter()
            .chain(self.conditional.iter().flat_map(|(_, c)| c.iter()))
    }
}

/// Graph builder.
#[derive(Default)]
pub struct StateGraph {
    nodes: HashMap<String, NodeKind>,
    edges: HashMap<String, EdgeSet>,
    reducers: HashMap<String, Reducer>,
}

impl StateGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pure-function node `state -> partial_state`.
    pub fn add_node<F, Fut>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(GraphState) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<StateUpdate>> + Send + 'static,
    {
        let func: NodeFn = Arc::new(move |state| Box::pin(f(state)));
        self.nodes.insert(name.to_string(), NodeKind::Func(func));
        self
    }

    /// Add an agent-backed node.
    pub fn add_agent_node(mut self, name: &str, node: AgentNode) -> Self {
        self.nodes.insert(name.to_string(), NodeKind::Agent(node));
        self
    }

    /// Add an unconditional edge.
    pub fn add_edge(mut self, source: &str, target: &str) -> Self {
        self.edges
            .entry(source.to_string())
            .or_insert_with(EdgeSet::new)
            .direct
            .push(target.to_string());
        self
    }

    /// Add a conditional edge: `router` picks the successor(s) from
    /// `candidates` based on the live state. Candidates bound the layering;
    /// at runtime the chosen set is a subset.
    pub fn add_conditional_edges<F>(mut self, source: &str, router: F, candidates: &[&str]) -> Self
    where
        F: Fn(&GraphState) -> Vec<String> + Send + Sync + 'static,
    {
        self.edges
            .entry(source.to_string())
            .or_insert_with(EdgeSet::new)
            .conditional
            .push((
                Arc::new(router),
                candidates.iter().map(|c| c.to_string()).collect(),
            ));
        self
    }

    /// Declare how a field merges under concurrent writes.
    pub fn set_reducer(mut self, field: &str, reducer: Reducer) -> Self {
        self.reducers.insert(field.to_string(), reducer);
        self
    }

    /// Validate and produce an executable graph.
    pub fn compile(self) -> Result<CompiledGraph> {
        // START must lead somewhere.
        let start_edges = self
            .edges
            .get(START)
            .ok_or_else(|| anyhow!("START has no outgoing edges"))?;
        if start_edges.direct.is_empty() && start_edges.conditional.is_empty() {
            return Err(anyhow!("START has no outgoing edges"));
        }

        // Every referenced target must exist; nothing may target START.
        for (source, edges) in &self.edges {
            if source.as_str() != START && !self.nodes.contains_key(source) {
                return Err(anyhow!("edge source '{source}' is not a node"));
            }
            for target in edges.potential_targets() {
                if target.as_str() == START {
                    return Err(anyhow!("edge from '{source}' targets START"));
                }
                if target == source {
                    return Err(anyhow!("self-loop on '{source}'"));
                }
                if target.as_str() != END && !self.nodes.contains_key(target) {
                    return Err(anyhow!("edge from '{source}' targets unknown node '{target}'"));
                }
            }
        }

        // Every non-END node needs a way out.
        for name in self.nodes.keys() {
            let has_exit = self
                .edges
                .get(name)
                .map(|e| e.potential_targets().next().is_some())
                .unwrap_or(false);
            if !has_exit {
                return Err(anyhow!("node '{name}' has no outgoing edges"));
            }
        }

        // Reachability from START over potential edges.
        let mut reachable: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([START]);
        while let Some(current) = queue.pop_front() {
            if let Some(edges) = self.edges.get(current) {
                for target in edges.potential_targets() {
                    if target.as_str() != END && reachable.insert(target.clone()) {
                        queue.push_back(target);
                    }
                }
            }
        }
        for name in self.nodes.keys() {
            if !reachable.contains(name) {
                return Err(anyhow!("node '{name}' is unreachable from START"));
            }
        }

        // Longest-path layering over potential edges; rejects cycles.
        let layers = self.compute_layers()?;

        Ok(CompiledGraph::new(
            self.nodes,
            self.edges,
            self.reducers,
            layers,
        ))
    }

    /// Longest-path topological layering from START, treating every
    /// conditional candidate as a potential edge.
    fn compute_layers(&self) -> Result<HashMap<String, usize>> {
        let mut indegree: HashMap<&str, usize> = self.nodes.keys().map(|n| (n.as_str(), 0)).collect();
        for edges in self.edges.values() {
            for target in edges.potential_targets() {
                if target.as_str() != END {
                    *indegree.entry(target.as_str()).or_insert(0) += 1;
                }
            }
        }

        let mut layers: HashMap<String, usize> = HashMap::new();
        let mut queue: VecDeque<&str> = VecDeque::new();

        // Nodes fed only by START sit in layer 0.
        for target in self
            .edges
            .get(START)
            .map(|e| e.potential_targets().collect::<Vec<_>>())
            .unwrap_or_default()
        {
            if target.as_str() != END {
                if let Some(degree) = indegree.get_mut(target.as_str()) {
                    *degree -= 1;
                }
                layers.entry(target.clone()).or_insert(0);
            }
        }
        for (node, degree) in &indegree {
            if *degree == 0 {
                queue.push_back(*node);
            }
        }

        let mut processed = 0;
        while let Some(current) = queue.pop_front() {
            processed += 1;
            let layer = layers.get(current).copied().unwrap_or(0);
            if let Some(edges) = self.edges.get(current) {
                for target in edges.potential_targets() {
                    if target.as_str() == END {
                        continue;
                    }
                    let entry = layers.entry(target.clone()).or_insert(0);
                    *entry = (*entry).max(layer + 1);
                    let degree = indegree
                        .get_mut(target.as_str())
                        .ok_or_else(|| anyhow!("unknown node '{target}' in layering"))?;
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(target.as_str());
                    }
                }
            }
        }

        if processed != self.nodes.len() {
            return Err(anyhow!("graph contains a cycle"));
        }
        Ok(layers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(state: GraphState) -> impl std::future::Future<Output = Result<StateUpdate>> {
        let _ = state;
        async { Ok(StateUpdate::new()) }
    }

    #[test]
    fn append_reducer_concatenates() {
        let reducer = Reducer::Append;
        let merged = reducer.apply(
            Some(serde_json::json!(["a"])),
            serde_json::json!(["b", "c"]),
        );
        assert_eq!(merged, serde_json::json!(["a", "b", "c"]));
        let fresh = reducer.apply(None, serde_json::json!("x"));
        assert_eq!(fresh, serde_json::json!(["x"]));
    }

    #[test]
    fn compile_rejects_missing_start() {
        let graph = StateGraph::new().add_node("a", noop).add_edge("a", END);
        assert!(graph.compile().is_err());
    }

    #[test]
    fn compile_rejects_unreachable_node() {
        let graph = StateGraph::new()
            .add_node("a", noop)
            .add_node("orphan", noop)
            .add_edge(START, "a")
            .add_edge("a", END)
            .add_edge("orphan", END);
        let err = graph.compile().unwrap_err();
        assert!(err.to_string().contains("unreachable"));
    }

    #[test]
    fn compile_rejects_dead_end_node() {
        let graph = StateGraph::new()
            .add_node("a", noop)
            .add_node("sink", noop)
            .add_edge(START, "a")
            .add_edge("a", "sink")
            .add_edge("a", END);
        let err = graph.compile().unwrap_err();
        assert!(err.to_string().contains("no outgoing edges"));
    }

    #[test]
    fn compile_rejects_edges_into_start_and_self_loops() {
        let graph = StateGraph::new()
            .add_node("a", noop)
            .add_edge(START, "a")
            .add_edge("a", START);
        assert!(graph.compile().unwrap_err().to_string().contains("START"));

        let graph = StateGraph::new()
            .add_node("a", noop)
            .add_edge(START, "a")
            .add_edge("a", "a");
        assert!(graph.compile().unwrap_err().to_string().contains("self-loop"));
    }

    #[test]
    fn compile_rejects_cycles() {
        let graph = StateGraph::new()
            .add_node("a", noop)
            .add_node("b", noop)
            .add_edge(START, "a")
            .add_edge("a", "b")
            .add_edge("b", "a");
        assert!(graph.compile().unwrap_err().to_string().contains("cycle"));
    }

    #[test]
    fn layers_follow_longest_path() {
        let graph = StateGraph::new()
            .add_node("a", noop)
            .add_node("b", noop)
            .add_node("join", noop)
            .add_edge(START, "a")
            .add_edge(START, "join") // short path
            .add_edge("a", "b")
            .add_edge("b", "join") // long path wins
            .add_edge("join", END);
        let layers = graph.compute_layers().unwrap();
        assert_eq!(layers["a"], 0);
        assert_eq!(layers["b"], 1);
        assert_eq!(layers["join"], 2);
    }

    #[test]
    fn conditional_candidates_contribute_to_layering() {
        let graph = StateGraph::new()
            .add_node("decide", noop)
            .add_node("x", noop)
            .add_node("y", noop)
            .add_edge(START, "decide")
            .add_conditional_edges("decide", |_s| vec!["x".to_string()], &["x", "y"])
            .add_edge("x", END)
            .add_edge("y", END);
        let layers = graph.compute_layers().unwrap();
        assert_eq!(layers["x"], 1);
        assert_eq!(layers["y"], 1);
    }
}
