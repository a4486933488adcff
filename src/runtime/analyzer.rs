//! Graph Analyzer
//!
//! Builds a petgraph view over the filtered part of a network, then detects cycles and
//! computes connected components on it.

use crate::error::SchedulingError;
use crate::network::{ConnectionId, ModuleId, Network};
use crate::runtime::filter::ModuleFilter;
use petgraph::{
    algo::tarjan_scc,
    graph::{DiGraph, NodeIndex},
    unionfind::UnionFind,
    visit::{depth_first_search, Control, DfsEvent, EdgeRef},
};
use std::collections::HashMap;

/// Directed graph over the modules that pass a filter
///
/// Edges exist only between two filtered modules. Node order follows module id order, so
/// building twice from the same network yields the same indices.
#[derive(Debug)]
pub struct ModuleGraph {
    /// The petgraph DiGraph structure
    pub graph: DiGraph<ModuleId, ConnectionId>,
    /// Mapping from module id to graph node index
    pub index_of: HashMap<ModuleId, NodeIndex>,
}

impl ModuleGraph {
    pub fn build(network: &Network, filter: &ModuleFilter) -> Self {
        let mut graph = DiGraph::new();
        let mut index_of = HashMap::new();

        for id in network.module_ids().filter(|id| filter.accepts(id)) {
            let index = graph.add_node(id.clone());
            index_of.insert(id.clone(), index);
        }

        for connection in network.connections() {
            let (Some(&from), Some(&to)) = (
                index_of.get(&connection.out.module),
                index_of.get(&connection.input.module),
            ) else {
                continue;
            };
            graph.add_edge(from, to, connection.id.clone());
        }

        tracing::debug!(
            "📊 Built module graph: {} node(s), {} edge(s)",
            graph.node_count(),
            graph.edge_count()
        );

        Self { graph, index_of }
    }

    pub fn module(&self, index: NodeIndex) -> &ModuleId {
        &self.graph[index]
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Members of one directed cycle, if the graph has any
    ///
    /// Runs a depth-first traversal and stops at the first back edge, i.e. an edge into a
    /// node still on the recursion stack. The reported members are the strongly connected
    /// component containing that edge, in id order.
    pub fn find_cycle(&self) -> Option<Vec<ModuleId>> {
        let back_edge = depth_first_search(&self.graph, self.graph.node_indices(), |event| {
            if let DfsEvent::BackEdge(from, to) = event {
                return Control::Break((from, to));
            }
            Control::Continue
        });
        let (from, to) = back_edge.break_value()?;

        tracing::debug!(
            "🔁 Back edge '{}' -> '{}'",
            self.module(from),
            self.module(to)
        );

        let mut members: Vec<ModuleId> = tarjan_scc(&self.graph)
            .into_iter()
            .find(|scc| scc.contains(&from))
            .unwrap_or_else(|| vec![from, to])
            .into_iter()
            .map(|index| self.module(index).clone())
            .collect();
        members.sort();
        Some(members)
    }

    /// Component label per node, dense and numbered by first appearance in node order
    fn components(&self, treat_as_undirected: bool) -> HashMap<ModuleId, usize> {
        let raw: Vec<usize> = if treat_as_undirected {
            let mut sets = UnionFind::<usize>::new(self.graph.node_count());
            for edge in self.graph.edge_references() {
                sets.union(edge.source().index(), edge.target().index());
            }
            sets.into_labeling()
        } else {
            let mut labels = vec![0; self.graph.node_count()];
            for (label, scc) in tarjan_scc(&self.graph).into_iter().enumerate() {
                for index in scc {
                    labels[index.index()] = label;
                }
            }
            labels
        };

        let mut dense: HashMap<usize, usize> = HashMap::new();
        let mut components = HashMap::new();
        for index in self.graph.node_indices() {
            let next = dense.len();
            let id = *dense.entry(raw[index.index()]).or_insert(next);
            components.insert(self.module(index).clone(), id);
        }
        components
    }
}

/// Result of one analysis pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkAnalysis {
    pub has_cycles: bool,
    /// Members of a detected cycle, empty when acyclic
    pub cycle: Vec<ModuleId>,
    /// Component id per filtered module; valid only for this analysis
    pub components: HashMap<ModuleId, usize>,
}

impl NetworkAnalysis {
    /// Turn a detected cycle into the scheduling error
    pub fn ensure_acyclic(&self) -> Result<(), SchedulingError> {
        if self.has_cycles {
            return Err(SchedulingError::NetworkHasCycles(self.cycle.clone()));
        }
        Ok(())
    }

    pub fn component_count(&self) -> usize {
        self.components
            .values()
            .copied()
            .max()
            .map(|max| max + 1)
            .unwrap_or(0)
    }

    pub fn component_of(&self, module: &ModuleId) -> Option<usize> {
        self.components.get(module).copied()
    }
}

/// Stateless analyzer entry point
#[derive(Debug, Default, Clone, Copy)]
pub struct GraphAnalyzer;

impl GraphAnalyzer {
    /// Analyze the filtered part of `network`
    ///
    /// With `treat_as_undirected` components are weakly connected components; otherwise
    /// they are strongly connected components.
    pub fn analyze(
        network: &Network,
        filter: &ModuleFilter,
        treat_as_undirected: bool,
    ) -> NetworkAnalysis {
        let graph = ModuleGraph::build(network, filter);
        let cycle = graph.find_cycle();
        let components = graph.components(treat_as_undirected);

        if let Some(members) = &cycle {
            tracing::warn!("🔁 Network contains a cycle through {:?}", members);
        }

        NetworkAnalysis {
            has_cycles: cycle.is_some(),
            cycle: cycle.unwrap_or_default(),
            components,
        }
    }
}
