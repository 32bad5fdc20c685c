//! Compiled graph execution.
//!
//! Fired nodes are processed in static layer order (longest path from
//! START); everything in one layer runs in parallel against the same
//! pre-layer state snapshot. Partial outputs fold into the live state
//! through each field's reducer, and a field written by two nodes of the
//! same layer must not carry the default replace reducer. Routers see the
//! state as merged so far. A node error cancels the run; END is simply
//! where scheduling stops.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use anyhow::{anyhow, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::mpsc;
use tracing::debug;

use std::sync::Arc;

use super::{EdgeSet, GraphState, NodeKind, Reducer, StateUpdate, END, START};
use crate::tools::registry::CancellationFlag;

/// Streaming execution events, in node completion order.
#[derive(Debug)]
pub enum GraphEvent {
    NodeComplete {
        node: String,
        delta: StateUpdate,
    },
    Done {
        state: GraphState,
    },
    Error {
        message: String,
    },
}

pub struct CompiledGraph {
    nodes: HashMap<String, NodeKind>,
    edges: HashMap<String, EdgeSet>,
    reducers: HashMap<String, Reducer>,
    layers: HashMap<String, usize>,
}

impl std::fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .field("edges", &self.edges.keys().collect::<Vec<_>>())
            .field("layers", &self.layers)
            .finish()
    }
}

impl CompiledGraph {
    pub(crate) fn new(
        nodes: HashMap<String, NodeKind>,
        edges: HashMap<String, EdgeSet>,
        reducers: HashMap<String, Reducer>,
        layers: HashMap<String, usize>,
    ) -> Self {
        Self {
            nodes,
            edges,
            reducers,
            layers,
        }
    }

    /// Run to completion and return the final state.
    pub async fn invoke(&self, initial: GraphState) -> Result<GraphState> {
        self.run(initial, CancellationFlag::new(), None).await
    }

    /// Run with a cancellation flag honored between layers and inside agent
    /// nodes.
    pub async fn invoke_with_cancellation(
        &self,
        initial: GraphState,
        cancel: CancellationFlag,
    ) -> Result<GraphState> {
        self.run(initial, cancel, None).await
    }

    /// Streaming variant: yields `NodeComplete { node, delta }` as each node
    /// finishes, then `Done` (or `Error`).
    pub fn stream(self: &Arc<Self>, initial: GraphState) -> mpsc::UnboundedReceiver<GraphEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let graph = Arc::clone(self);
        tokio::spawn(async move {
            match graph
                .run(initial, CancellationFlag::new(), Some(tx.clone()))
                .await
            {
                Ok(state) => {
                    let _ = tx.send(GraphEvent::Done { state });
                }
                Err(e) => {
                    let _ = tx.send(GraphEvent::Error {
                        message: format!("{e:#}"),
                    });
                }
            }
        });
        rx
    }

    async fn run(
        &self,
        initial: GraphState,
        cancel: CancellationFlag,
        events: Option<mpsc::UnboundedSender<GraphEvent>>,
    ) -> Result<GraphState> {
        let mut state = initial;
        let default_reducer = Reducer::Replace;
        let mut completed: HashSet<String> = HashSet::new();
        // Fired-but-not-yet-run nodes, keyed by static layer so a node
        // fired early still waits for its whole layer cohort.
        let mut pending: BTreeMap<usize, BTreeSet<String>> = BTreeMap::new();

        self.fire_successors(START, &state, &mut pending, &completed)?;

        loop {
            let Some(layer) = pending.keys().next().copied() else {
                break;
            };
            if cancel.is_cancelled() {
                return Err(anyhow!("graph run cancelled"));
            }

            let batch: Vec<String> = pending
                .remove(&layer)
                .unwrap_or_default()
                .into_iter()
                .filter(|n| !completed.contains(n))
                .collect();
            if batch.is_empty() {
                continue;
            }
            debug!(layer, nodes = ?batch, "executing graph layer");

            // All nodes of a layer see the same pre-layer snapshot.
            let snapshot = state.clone();
            let mut running: FuturesUnordered<_> = batch
                .iter()
                .map(|name| {
                    let node = self
                        .nodes
                        .get(name)
                        .expect("compile() validated node names");
                    let state = snapshot.clone();
                    let cancel = cancel.clone();
                    let name = name.clone();
                    async move {
                        let result = match node {
                            NodeKind::Func(f) => f(state).await,
                            NodeKind::Agent(agent_node) => agent_node.run(state, cancel).await,
                        };
                        (name, result)
                    }
                })
                .collect();

            // Merge in completion order; reducers are associative and
            // commutative, so the interleaving does not change the result.
            let mut writers: HashMap<String, usize> = HashMap::new();
            let mut failure: Option<anyhow::Error> = None;
            while let Some((name, result)) = running.next().await {
                let update = match result {
                    Ok(update) => update,
                    Err(e) => {
                        // Cancel siblings cooperatively and drain them.
                        cancel.cancel();
                        failure.get_or_insert(e.context(format!("node '{name}' failed")));
                        continue;
                    }
                };

                for field in update.keys() {
                    let count = writers.entry(field.clone()).or_insert(0);
                    *count += 1;
                    let reducer = self.reducers.get(field).unwrap_or(&default_reducer);
                    if *count > 1 && reducer.is_replace() {
                        cancel.cancel();
                        failure.get_or_insert(anyhow!(
                            "field '{field}' written by concurrent nodes without a reducer"
                        ));
                    }
                }
                if failure.is_some() {
                    continue;
                }

                for (field, value) in update.clone() {
                    let reducer = self.reducers.get(&field).unwrap_or(&default_reducer);
                    let old = state.remove(&field);
                    state.insert(field, reducer.apply(old, value));
                }

                if let Some(events) = &events {
                    let _ = events.send(GraphEvent::NodeComplete {
                        node: name.clone(),
                        delta: update,
                    });
                }
                completed.insert(name);
            }

            if let Some(e) = failure {
                return Err(e);
            }

            // Routers evaluate on the merged state.
            for name in &batch {
                if completed.contains(name) {
                    self.fire_successors(name, &state, &mut pending, &completed)?;
                }
            }
        }

        Ok(state)
    }

    /// Evaluate `source`'s edges against the current state and queue the
    /// chosen successors. END is never queued; unreached branches are
    /// simply skipped.
    fn fire_successors(
        &self,
        source: &str,
        state: &GraphState,
        pending: &mut BTreeMap<usize, BTreeSet<String>>,
        completed: &HashSet<String>,
    ) -> Result<()> {
        let Some(edges) = self.edges.get(source) else {
            return Ok(());
        };

        let mut fired: Vec<String> = edges.direct.clone();
        for (router, candidates) in &edges.conditional {
            for choice in router(state) {
                if choice != END && !candidates.contains(&choice) {
                    return Err(anyhow!(
                        "router on '{source}' chose '{choice}', not among its candidates"
                    ));
                }
                fired.push(choice);
            }
        }

        for target in fired {
            if target == END || completed.contains(&target) {
                continue;
            }
            let layer = *self
                .layers
                .get(&target)
                .ok_or_else(|| anyhow!("no layer for node '{target}'"))?;
            pending.entry(layer).or_default().insert(target);
        }
        Ok(())
    }
}
