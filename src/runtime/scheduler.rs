//! Scheduler
//!
//! Levels the filtered modules of a network into numbered execution groups. Every module
//! runs strictly after all of its filtered predecessors and modules that share a group are
//! free to run concurrently.

use crate::error::SchedulingError;
use crate::network::{ModuleId, Network};
use crate::runtime::analyzer::ModuleGraph;
use crate::runtime::filter::ModuleFilter;
use petgraph::{algo::toposort, graph::NodeIndex, Direction};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Module → execution group assignment for one scheduling pass
///
/// Groups are numbered from 0; a fresh order is produced by every `schedule()` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleOrder {
    groups: HashMap<ModuleId, usize>,
    /// Modules of each group in id order
    members: BTreeMap<usize, Vec<ModuleId>>,
}

impl ScheduleOrder {
    fn insert(&mut self, module: ModuleId, group: usize) {
        self.members.entry(group).or_default().push(module.clone());
        self.groups.insert(module, group);
    }

    fn finish(mut self) -> Self {
        for modules in self.members.values_mut() {
            modules.sort();
        }
        self
    }

    pub fn min_group(&self) -> Option<usize> {
        self.members.keys().next().copied()
    }

    pub fn max_group(&self) -> Option<usize> {
        self.members.keys().next_back().copied()
    }

    /// Modules assigned to `group`, in id order; empty for unknown groups
    pub fn modules_in_group(&self, group: usize) -> &[ModuleId] {
        self.members.get(&group).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn group_of(&self, module: &ModuleId) -> Option<usize> {
        self.groups.get(module).copied()
    }

    /// Groups in ascending order with their members
    pub fn groups(&self) -> impl Iterator<Item = (usize, &[ModuleId])> {
        self.members.iter().map(|(g, m)| (*g, m.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Topological leveling scheduler
#[derive(Debug, Default, Clone, Copy)]
pub struct Scheduler;

impl Scheduler {
    /// Assign every filtered module to a group
    ///
    /// A module with no filtered predecessors lands in group 0; otherwise its group is one
    /// more than the highest group among its filtered predecessors. Fails when the filtered
    /// modules contain a cycle, in which case nothing is scheduled.
    pub fn schedule(
        network: &Network,
        filter: &ModuleFilter,
    ) -> Result<ScheduleOrder, SchedulingError> {
        let graph = ModuleGraph::build(network, filter);
        if let Some(cycle) = graph.find_cycle() {
            tracing::warn!("❌ Cannot schedule network with cycle through {:?}", cycle);
            return Err(SchedulingError::NetworkHasCycles(cycle));
        }

        tracing::debug!("🔄 Computing topological execution order");
        let topo_order = toposort(&graph.graph, None).map_err(|cycle| {
            SchedulingError::NetworkHasCycles(vec![graph.module(cycle.node_id()).clone()])
        })?;

        let mut levels: HashMap<NodeIndex, usize> = HashMap::with_capacity(topo_order.len());
        let mut order = ScheduleOrder::default();
        for index in topo_order {
            let group = graph
                .graph
                .neighbors_directed(index, Direction::Incoming)
                .filter_map(|pred| levels.get(&pred))
                .map(|level| level + 1)
                .max()
                .unwrap_or(0);
            levels.insert(index, group);
            order.insert(graph.module(index).clone(), group);
        }
        let order = order.finish();

        tracing::debug!(
            "📋 Scheduled {} module(s) into {} group(s)",
            order.len(),
            order.max_group().map(|g| g + 1).unwrap_or(0)
        );
        Ok(order)
    }

    /// Schedule the whole network
    pub fn schedule_all(network: &Network) -> Result<ScheduleOrder, SchedulingError> {
        Self::schedule(network, &ModuleFilter::all())
    }
}
