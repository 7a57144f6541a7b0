// src/ordering/graph.rs

use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::debug;

use crate::errors::{Result, ShepherdError};
use crate::model::RoleCommandKey;
use crate::ordering::table::StackDefinition;

/// Compiled role command order of one stack version.
///
/// Edge direction: blocker -> blocked. For
///
/// ```toml
/// "DATANODE-START" = ["NAMENODE-START"]
/// ```
///
/// we add the edge `NAMENODE-START -> DATANODE-START`.
///
/// The graph is checked for cycles once, at build time. Afterwards it is
/// read-only and only consulted when a Request's Stages are planned.
#[derive(Debug, Clone)]
pub struct RoleCommandOrder {
    stack: String,
    graph: DiGraph<RoleCommandKey, ()>,
    index: HashMap<RoleCommandKey, NodeIndex>,
    /// Direct blockers of each constrained key.
    blockers: HashMap<RoleCommandKey, BTreeSet<RoleCommandKey>>,
    /// Rank of every constrained key in one topological order.
    topo_rank: HashMap<RoleCommandKey, usize>,
}

impl RoleCommandOrder {
    /// Build the order for a stack definition, failing fast on cycles.
    pub fn build(def: &StackDefinition) -> Result<Self> {
        let stack = def.id();
        let mut graph: DiGraph<RoleCommandKey, ()> = DiGraph::new();
        let mut index: HashMap<RoleCommandKey, NodeIndex> = HashMap::new();
        let mut blockers: HashMap<RoleCommandKey, BTreeSet<RoleCommandKey>> = HashMap::new();

        let mut node_for = |graph: &mut DiGraph<RoleCommandKey, ()>, key: &RoleCommandKey| {
            *index
                .entry(key.clone())
                .or_insert_with(|| graph.add_node(key.clone()))
        };

        for (blocked, deps) in def.order_entries()? {
            let to = node_for(&mut graph, &blocked);
            for dep in deps {
                if dep == blocked {
                    return Err(ShepherdError::OrderingCycle {
                        stack,
                        detail: format!("{blocked} cannot block itself"),
                    });
                }
                let from = node_for(&mut graph, &dep);
                graph.update_edge(from, to, ());
                blockers.entry(blocked.clone()).or_default().insert(dep);
            }
        }

        // A topological sort will fail if there is a cycle.
        let order = toposort(&graph, None).map_err(|cycle| ShepherdError::OrderingCycle {
            stack: stack.clone(),
            detail: format!(
                "cycle detected in role command order involving {}",
                graph[cycle.node_id()]
            ),
        })?;

        let topo_rank = order
            .iter()
            .enumerate()
            .map(|(rank, idx)| (graph[*idx].clone(), rank))
            .collect();

        debug!(
            stack = %stack,
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "compiled role command order"
        );

        Ok(Self {
            stack,
            graph,
            index,
            blockers,
            topo_rank,
        })
    }

    pub fn stack(&self) -> &str {
        &self.stack
    }

    /// Role commands that must complete before `key` may run.
    pub fn blocking_role_commands(&self, key: &RoleCommandKey) -> BTreeSet<RoleCommandKey> {
        self.blockers.get(key).cloned().unwrap_or_default()
    }

    /// Whether `first` directly blocks `second`.
    pub fn blocks(&self, first: &RoleCommandKey, second: &RoleCommandKey) -> bool {
        self.blockers
            .get(second)
            .is_some_and(|set| set.contains(first))
    }

    /// All `(blocker, blocked)` edges, for diagnostics.
    pub fn edges(&self) -> Vec<(RoleCommandKey, RoleCommandKey)> {
        let mut edges: Vec<_> = self
            .graph
            .edge_indices()
            .filter_map(|e| self.graph.edge_endpoints(e))
            .map(|(a, b)| (self.graph[a].clone(), self.graph[b].clone()))
            .collect();
        edges.sort();
        edges
    }

    pub fn contains(&self, key: &RoleCommandKey) -> bool {
        self.index.contains_key(key)
    }

    /// Assign each key a layer such that every key sits strictly after all
    /// of its blockers that are present in `keys`.
    ///
    /// Only direct edges between present keys count; keys without a
    /// relationship share a layer. Layers are returned in execution order
    /// and each layer is sorted.
    pub fn stage_layers(&self, keys: &BTreeSet<RoleCommandKey>) -> Vec<Vec<RoleCommandKey>> {
        // Visit constrained keys in topological order so every blocker's
        // layer is known before its dependents are placed.
        let mut ordered: Vec<&RoleCommandKey> = keys.iter().collect();
        ordered.sort_by_key(|k| self.topo_rank.get(*k).copied().unwrap_or(0));

        let mut layer_of: BTreeMap<&RoleCommandKey, usize> = BTreeMap::new();
        for key in ordered {
            let layer = self
                .blockers
                .get(key)
                .into_iter()
                .flatten()
                .filter_map(|b| layer_of.get(b))
                .map(|l| l + 1)
                .max()
                .unwrap_or(0);
            layer_of.insert(key, layer);
        }

        let depth = layer_of.values().copied().max().map_or(0, |d| d + 1);
        let mut layers: Vec<Vec<RoleCommandKey>> = vec![Vec::new(); depth];
        for (key, layer) in layer_of {
            layers[layer].push(key.clone());
        }
        layers
    }

    /// Stable order of `keys` (by index) that respects the role command order
    /// between them. Unrelated entries keep their relative position.
    pub fn stable_order(&self, keys: &[RoleCommandKey]) -> Vec<usize> {
        let n = keys.len();
        let mut indegree = vec![0usize; n];
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];

        for (i, a) in keys.iter().enumerate() {
            for (j, b) in keys.iter().enumerate() {
                if i != j && self.blocks(a, b) {
                    successors[i].push(j);
                    indegree[j] += 1;
                }
            }
        }

        let mut ready: BTreeSet<usize> = (0..n).filter(|i| indegree[*i] == 0).collect();
        let mut out = Vec::with_capacity(n);

        while let Some(next) = ready.pop_first() {
            out.push(next);
            for succ in &successors[next] {
                indegree[*succ] -= 1;
                if indegree[*succ] == 0 {
                    ready.insert(*succ);
                }
            }
        }

        out
    }
}
