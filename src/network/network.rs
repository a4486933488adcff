//! The network: flat maps of modules and connections
//!
//! Every structural edit validates first and then applies, so a failed edit leaves the
//! network untouched. Execution works on `NetworkHandle` snapshots; edits never reach a
//! snapshot that is already in use.

use crate::error::NetworkError;
use crate::network::module::Module;
use crate::network::types::{
    Connection, ConnectionDescription, ConnectionId, ModuleId, PortAddress, PortDirection,
};
use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    sync::Arc,
};

/// Immutable network snapshot handed to the analyzer, scheduler and execution contexts
pub type NetworkHandle = Arc<Network>;

/// Set of modules and the connections between them
#[derive(Debug, Clone, Default)]
pub struct Network {
    modules: BTreeMap<ModuleId, Module>,
    connections: BTreeMap<ConnectionId, Connection>,
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module; its id must not already be present
    pub fn add_module(&mut self, module: Module) -> Result<ModuleId, NetworkError> {
        let id = module.id().clone();
        if self.modules.contains_key(&id) {
            return Err(NetworkError::DuplicateModule(id));
        }
        tracing::debug!("➕ Added module '{}'", id);
        self.modules.insert(id.clone(), module);
        Ok(id)
    }

    /// Remove a module together with every connection touching it
    ///
    /// Returns the removed module and the cascaded connections.
    pub fn remove_module(
        &mut self,
        id: &ModuleId,
    ) -> Result<(Module, Vec<Connection>), NetworkError> {
        let module = self
            .modules
            .remove(id)
            .ok_or_else(|| NetworkError::ModuleNotFound(id.clone()))?;

        let touching: Vec<ConnectionId> = self
            .connections
            .values()
            .filter(|c| c.touches(id))
            .map(|c| c.id.clone())
            .collect();
        let removed: Vec<Connection> = touching
            .iter()
            .filter_map(|cid| self.connections.remove(cid))
            .collect();

        tracing::debug!(
            "➖ Removed module '{}' and {} connection(s)",
            id,
            removed.len()
        );
        Ok((module, removed))
    }

    pub fn module(&self, id: &ModuleId) -> Option<&Module> {
        self.modules.get(id)
    }

    pub fn contains_module(&self, id: &ModuleId) -> bool {
        self.modules.contains_key(id)
    }

    /// Modules in id order
    pub fn modules(&self) -> impl Iterator<Item = &Module> {
        self.modules.values()
    }

    pub fn module_ids(&self) -> impl Iterator<Item = &ModuleId> {
        self.modules.keys()
    }

    pub fn nmodules(&self) -> usize {
        self.modules.len()
    }

    pub fn nconnections(&self) -> usize {
        self.connections.len()
    }

    pub fn connection(&self, id: &ConnectionId) -> Option<&Connection> {
        self.connections.get(id)
    }

    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    /// Check every connection invariant without modifying the network
    pub fn validate_connection(&self, desc: &ConnectionDescription) -> Result<(), NetworkError> {
        let out_module = self
            .modules
            .get(&desc.out.module)
            .ok_or_else(|| NetworkError::ModuleNotFound(desc.out.module.clone()))?;
        let in_module = self
            .modules
            .get(&desc.input.module)
            .ok_or_else(|| NetworkError::ModuleNotFound(desc.input.module.clone()))?;

        if desc.out.module == desc.input.module {
            return Err(NetworkError::SameModule(desc.out.module.clone()));
        }

        let out_port = match out_module.output_port(&desc.out.port.name) {
            Some(port) if desc.out.port.index == 0 => port,
            Some(_) => {
                return Err(NetworkError::PortNotFound {
                    module: desc.out.module.clone(),
                    port: desc.out.port.to_string(),
                })
            }
            None if out_module.input_port(&desc.out.port.name).is_some() => {
                return Err(NetworkError::DirectionMismatch {
                    module: desc.out.module.clone(),
                    port: desc.out.port.clone(),
                    kind: PortDirection::Input.as_str(),
                })
            }
            None => {
                return Err(NetworkError::PortNotFound {
                    module: desc.out.module.clone(),
                    port: desc.out.port.name.clone(),
                })
            }
        };

        let in_port = match in_module.input_port(&desc.input.port.name) {
            Some(port) => port,
            None if in_module.output_port(&desc.input.port.name).is_some() => {
                return Err(NetworkError::DirectionMismatch {
                    module: desc.input.module.clone(),
                    port: desc.input.port.clone(),
                    kind: PortDirection::Output.as_str(),
                })
            }
            None => {
                return Err(NetworkError::PortNotFound {
                    module: desc.input.module.clone(),
                    port: desc.input.port.name.clone(),
                })
            }
        };

        if out_port.datatype != in_port.datatype {
            return Err(NetworkError::DatatypeMismatch {
                output: out_port.datatype.clone(),
                input: in_port.datatype.clone(),
            });
        }

        let full = if in_port.dynamic {
            self.source_of(&desc.input).is_some()
        } else {
            desc.input.port.index != 0
                || !self
                    .connections_on_input_port(&desc.input.module, &desc.input.port.name)
                    .is_empty()
        };
        if full {
            return Err(NetworkError::InputPortFull {
                module: desc.input.module.clone(),
                port: desc.input.port.clone(),
            });
        }

        let id = ConnectionId::create(desc);
        if self.connections.contains_key(&id) {
            return Err(NetworkError::DuplicateConnection(id.to_string()));
        }

        Ok(())
    }

    /// Connect an output slot to an input slot
    pub fn connect(&mut self, desc: ConnectionDescription) -> Result<ConnectionId, NetworkError> {
        self.validate_connection(&desc)?;
        let connection = Connection::from_description(desc);
        let id = connection.id.clone();
        tracing::debug!("🔗 Added connection '{}'", id);
        self.connections.insert(id.clone(), connection);
        Ok(id)
    }

    pub fn disconnect(&mut self, id: &ConnectionId) -> Result<Connection, NetworkError> {
        let removed = self
            .connections
            .remove(id)
            .ok_or_else(|| NetworkError::ConnectionNotFound(id.to_string()))?;
        tracing::debug!("✂️ Removed connection '{}'", id);
        Ok(removed)
    }

    /// Connection feeding the given input slot, if any
    pub fn source_of(&self, input: &PortAddress) -> Option<&Connection> {
        self.connections.values().find(|c| &c.input == input)
    }

    /// All connections into a named input port, ordered by slot
    pub fn connections_on_input_port(&self, module: &ModuleId, port: &str) -> Vec<&Connection> {
        let mut found: Vec<&Connection> = self
            .connections
            .values()
            .filter(|c| &c.input.module == module && c.input.port.name == port)
            .collect();
        found.sort_by_key(|c| c.input.port.index);
        found
    }

    /// Connections whose destination is `module`
    pub fn connections_into(&self, module: &ModuleId) -> impl Iterator<Item = &Connection> {
        let module = module.clone();
        self.connections
            .values()
            .filter(move |c| c.input.module == module)
    }

    /// Connections whose source is `module`
    pub fn connections_from(&self, module: &ModuleId) -> impl Iterator<Item = &Connection> {
        let module = module.clone();
        self.connections
            .values()
            .filter(move |c| c.out.module == module)
    }

    /// Direct predecessors of `module`
    pub fn upstream_modules(&self, module: &ModuleId) -> BTreeSet<ModuleId> {
        self.connections_into(module)
            .map(|c| c.out.module.clone())
            .collect()
    }

    /// Direct successors of `module`
    pub fn downstream_modules(&self, module: &ModuleId) -> BTreeSet<ModuleId> {
        self.connections_from(module)
            .map(|c| c.input.module.clone())
            .collect()
    }

    /// Every module with a directed path into `module`
    pub fn ancestors(&self, module: &ModuleId) -> BTreeSet<ModuleId> {
        self.reachable(module, |network, id| network.upstream_modules(id))
    }

    /// Every module reachable from `module`
    pub fn descendants(&self, module: &ModuleId) -> BTreeSet<ModuleId> {
        self.reachable(module, |network, id| network.downstream_modules(id))
    }

    fn reachable<F>(&self, start: &ModuleId, next: F) -> BTreeSet<ModuleId>
    where
        F: Fn(&Network, &ModuleId) -> BTreeSet<ModuleId>,
    {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([start.clone()]);

        while let Some(current) = queue.pop_front() {
            for neighbor in next(self, &current) {
                if neighbor != *start && seen.insert(neighbor.clone()) {
                    queue.push_back(neighbor);
                }
            }
        }

        seen
    }
}
