//! Slot management for dynamic input ports
//!
//! A dynamic input port exposes one slot per connection. New connections take the slot
//! after the last occupied one; removing a connection shifts the later slots down so the
//! occupied slots stay contiguous. During bulk edits the compaction is deferred and done
//! once for every touched module when the manager is enabled again.

use crate::error::NetworkError;
use crate::network::network::Network;
use crate::network::types::{Connection, ConnectionDescription, ConnectionId, ModuleId, PortAddress};
use std::collections::BTreeSet;

/// One connection moved to a lower slot during compaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotChange {
    pub old: ConnectionId,
    pub new: ConnectionId,
}

/// Allocates and compacts dynamic port slots
#[derive(Debug, Clone)]
pub struct DynamicPortManager {
    enabled: bool,
    /// Modules whose slots need compaction once re-enabled
    pending: BTreeSet<ModuleId>,
}

impl Default for DynamicPortManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DynamicPortManager {
    pub fn new() -> Self {
        Self {
            enabled: true,
            pending: BTreeSet::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Defer compaction until `enable` is called
    pub fn disable(&mut self) {
        tracing::debug!("⏸️ Dynamic port compaction disabled");
        self.enabled = false;
    }

    /// Re-enable compaction and compact every module touched while disabled
    ///
    /// Returns the compacted modules and all slot changes, for a single consolidated
    /// notification.
    pub fn enable(
        &mut self,
        network: &mut Network,
    ) -> Result<(Vec<ModuleId>, Vec<SlotChange>), NetworkError> {
        self.enabled = true;
        let modules: Vec<ModuleId> = std::mem::take(&mut self.pending)
            .into_iter()
            .filter(|m| network.contains_module(m))
            .collect();

        let mut changes = Vec::new();
        for module in &modules {
            changes.extend(compact_module(network, module)?);
        }

        tracing::debug!(
            "▶️ Dynamic port compaction enabled: {} module(s), {} slot change(s)",
            modules.len(),
            changes.len()
        );
        Ok((modules, changes))
    }

    /// Resolve the input slot for a new connection
    ///
    /// Static ports are returned unchanged. Dynamic ports get the slot after the highest
    /// occupied one.
    pub fn allocate(&self, network: &Network, input: &PortAddress) -> PortAddress {
        let dynamic = network
            .module(&input.module)
            .and_then(|m| m.input_port(&input.port.name))
            .map(|p| p.dynamic)
            .unwrap_or(false);
        if !dynamic {
            return input.clone();
        }

        let next = network
            .connections_on_input_port(&input.module, &input.port.name)
            .last()
            .map(|c| c.input.port.index + 1)
            .unwrap_or(0);

        let mut slot = input.clone();
        slot.port.index = next;
        slot
    }

    /// Connect, allocating a dynamic slot when the destination port is dynamic
    pub fn connect(
        &self,
        network: &mut Network,
        desc: ConnectionDescription,
    ) -> Result<ConnectionId, NetworkError> {
        let input = self.allocate(network, &desc.input);
        network.connect(ConnectionDescription::new(desc.out, input))
    }

    /// Keep slots contiguous after `removed` was disconnected
    ///
    /// While disabled the module is only recorded and no slot moves.
    pub fn on_disconnected(
        &mut self,
        network: &mut Network,
        removed: &Connection,
    ) -> Result<Vec<SlotChange>, NetworkError> {
        let module = &removed.input.module;
        let dynamic = network
            .module(module)
            .and_then(|m| m.input_port(&removed.input.port.name))
            .map(|p| p.dynamic)
            .unwrap_or(false);
        if !dynamic {
            return Ok(Vec::new());
        }

        if !self.enabled {
            self.pending.insert(module.clone());
            return Ok(Vec::new());
        }

        compact_module(network, module)
    }
}

/// Renumber every dynamic input port of `module` to slots `0..n`
fn compact_module(
    network: &mut Network,
    module: &ModuleId,
) -> Result<Vec<SlotChange>, NetworkError> {
    let dynamic_ports: Vec<String> = match network.module(module) {
        Some(m) => m
            .input_ports()
            .iter()
            .filter(|p| p.dynamic)
            .map(|p| p.name.clone())
            .collect(),
        None => return Ok(Vec::new()),
    };

    let mut changes = Vec::new();
    for port in dynamic_ports {
        let ordered: Vec<Connection> = network
            .connections_on_input_port(module, &port)
            .into_iter()
            .cloned()
            .collect();

        // Ascending order guarantees slot `index` is free when we move into it.
        for (index, connection) in ordered.into_iter().enumerate() {
            if connection.input.port.index == index {
                continue;
            }
            network.disconnect(&connection.id)?;
            let mut input = connection.input.clone();
            input.port.index = index;
            let new = network.connect(ConnectionDescription::new(connection.out.clone(), input))?;
            tracing::debug!("🔢 Moved '{}' to '{}'", connection.id, new);
            changes.push(SlotChange {
                old: connection.id,
                new,
            });
        }
    }

    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::module::{executable_fn, Module, ModuleDescription};
    use crate::network::types::{PortDescription, PortId};

    fn source(name: &str) -> Module {
        let desc =
            ModuleDescription::new(name).with_output(PortDescription::output("Out", "Scalar"));
        Module::new(desc, executable_fn(|_| Ok(())))
    }

    fn collector() -> Module {
        let desc = ModuleDescription::new("Sum")
            .with_input(PortDescription::dynamic_input("Values", "Scalar"));
        Module::new(desc, executable_fn(|_| Ok(())))
    }

    fn into_values(from: &ModuleId, sink: &ModuleId) -> ConnectionDescription {
        ConnectionDescription::new(
            PortAddress::new(from.clone(), PortId::named("Out")),
            PortAddress::new(sink.clone(), PortId::named("Values")),
        )
    }

    fn slots(network: &Network, sink: &ModuleId) -> Vec<(String, usize)> {
        network
            .connections_on_input_port(sink, "Values")
            .iter()
            .map(|c| (c.out.module.name().to_string(), c.input.port.index))
            .collect()
    }

    fn setup() -> (Network, Vec<ModuleId>, ModuleId) {
        let mut network = Network::new();
        let sources: Vec<ModuleId> = ["A", "B", "C"]
            .iter()
            .map(|n| network.add_module(source(n)).unwrap())
            .collect();
        let sink = network.add_module(collector()).unwrap();
        (network, sources, sink)
    }

    #[test]
    fn test_allocates_sequential_slots() {
        let (mut network, sources, sink) = setup();
        let manager = DynamicPortManager::new();
        for s in &sources {
            manager.connect(&mut network, into_values(s, &sink)).unwrap();
        }
        assert_eq!(
            slots(&network, &sink),
            vec![("A".to_string(), 0), ("B".to_string(), 1), ("C".to_string(), 2)]
        );
    }

    #[test]
    fn test_compacts_on_disconnect() {
        let (mut network, sources, sink) = setup();
        let mut manager = DynamicPortManager::new();
        let ids: Vec<ConnectionId> = sources
            .iter()
            .map(|s| manager.connect(&mut network, into_values(s, &sink)).unwrap())
            .collect();

        let removed = network.disconnect(&ids[0]).unwrap();
        let changes = manager.on_disconnected(&mut network, &removed).unwrap();

        assert_eq!(changes.len(), 2);
        assert_eq!(slots(&network, &sink), vec![("B".to_string(), 0), ("C".to_string(), 1)]);
    }

    #[test]
    fn test_disabled_defers_compaction() {
        let (mut network, sources, sink) = setup();
        let mut manager = DynamicPortManager::new();
        let ids: Vec<ConnectionId> = sources
            .iter()
            .map(|s| manager.connect(&mut network, into_values(s, &sink)).unwrap())
            .collect();

        manager.disable();
        let removed = network.disconnect(&ids[1]).unwrap();
        assert!(manager.on_disconnected(&mut network, &removed).unwrap().is_empty());
        assert_eq!(slots(&network, &sink), vec![("A".to_string(), 0), ("C".to_string(), 2)]);

        let (modules, changes) = manager.enable(&mut network).unwrap();
        assert_eq!(modules, vec![sink.clone()]);
        assert_eq!(changes.len(), 1);
        assert_eq!(slots(&network, &sink), vec![("A".to_string(), 0), ("C".to_string(), 1)]);
    }

    #[test]
    fn test_disabled_allocation_appends_after_gap() {
        let (mut network, sources, sink) = setup();
        let mut manager = DynamicPortManager::new();
        let first = manager.connect(&mut network, into_values(&sources[0], &sink)).unwrap();
        manager.connect(&mut network, into_values(&sources[1], &sink)).unwrap();

        manager.disable();
        let removed = network.disconnect(&first).unwrap();
        manager.on_disconnected(&mut network, &removed).unwrap();
        manager.connect(&mut network, into_values(&sources[2], &sink)).unwrap();
        assert_eq!(slots(&network, &sink), vec![("B".to_string(), 1), ("C".to_string(), 2)]);

        manager.enable(&mut network).unwrap();
        assert_eq!(slots(&network, &sink), vec![("B".to_string(), 0), ("C".to_string(), 1)]);
    }

    #[test]
    fn test_static_port_is_left_alone() {
        let mut network = Network::new();
        let desc =
            ModuleDescription::new("Scale").with_input(PortDescription::input("In", "Scalar"));
        let b = network
            .add_module(Module::new(desc, executable_fn(|_| Ok(()))))
            .unwrap();
        let manager = DynamicPortManager::new();
        let requested = PortAddress::new(b, PortId::named("In"));
        assert_eq!(manager.allocate(&network, &requested), requested);
    }
}
