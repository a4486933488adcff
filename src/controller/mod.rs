//! Network editor controller
//!
//! Owns the current network and is the single entry point for editing and executing it.
//! The network sits behind an `ArcSwap`: every edit clones the current network, applies the
//! change and swaps the result in, so runs already in flight keep the snapshot they
//! started with. Notifications are emitted only after the edit lock is released.

use crate::config::Config;
use crate::error::{EnqueueError, ExecuteError, NetworkError, SchedulingError};
use crate::modules::ModuleFactory;
use crate::network::{
    ConnectionDescription, ConnectionId, DynamicPortManager, Module, ModuleId, ModuleState,
    Network, NetworkHandle, PortAddress, PortDescription, PortDirection, PortId,
};
use crate::runtime::{
    DownstreamFailurePolicy, EventBus, ExecutableLookup, ExecutionContext, ExecutionManager,
    ExecutionStrategy, GraphAnalyzer, InterruptSet, ModuleFilter, NetworkAnalysis, NetworkEvent,
    NetworkLookup, OutputCache, RunHandle, ScheduleOrder, Scheduler,
};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::BTreeSet, fmt, sync::Arc};

/// One side of a connection request: a module and a port name, direction not yet known
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRef {
    pub module: ModuleId,
    pub port: String,
}

impl PortRef {
    pub fn new(module: &ModuleId, port: impl Into<String>) -> Self {
        Self {
            module: module.clone(),
            port: port.into(),
        }
    }

    fn address(&self) -> PortAddress {
        PortAddress::new(self.module.clone(), PortId::named(self.port.clone()))
    }
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.port)
    }
}

/// Controller-level API over one network
pub struct NetworkEditorController {
    network: ArcSwap<Network>,
    /// Serializes edits; also owns dynamic port bookkeeping
    ports: Mutex<DynamicPortManager>,
    factory: Arc<ModuleFactory>,
    events: EventBus,
    manager: Arc<ExecutionManager>,
    cache: OutputCache,
    interrupts: InterruptSet,
    failure_policy: DownstreamFailurePolicy,
}

impl NetworkEditorController {
    /// Create a controller over an empty network
    ///
    /// Notifications go through the manager's event bus.
    pub fn new(
        factory: Arc<ModuleFactory>,
        manager: Arc<ExecutionManager>,
        failure_policy: DownstreamFailurePolicy,
    ) -> Self {
        Self {
            network: ArcSwap::from_pointee(Network::new()),
            ports: Mutex::new(DynamicPortManager::new()),
            factory,
            events: manager.events().clone(),
            manager,
            cache: OutputCache::new(),
            interrupts: InterruptSet::new(),
            failure_policy,
        }
    }

    /// Wire a controller and its execution manager from configuration
    pub fn from_config(config: &Config, factory: Arc<ModuleFactory>) -> Self {
        let manager = Arc::new(ExecutionManager::new(
            config.execution.strategy,
            config.execution.queue_capacity,
            EventBus::new(),
        ));
        Self::new(factory, manager, config.execution.failure_policy)
    }

    /// Current network snapshot
    pub fn network(&self) -> NetworkHandle {
        self.network.load_full()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn manager(&self) -> &Arc<ExecutionManager> {
        &self.manager
    }

    pub fn factory(&self) -> &ModuleFactory {
        &self.factory
    }

    pub fn output_cache(&self) -> &OutputCache {
        &self.cache
    }

    /// Latest value a module sent on one of its output ports
    pub fn output(&self, module: &ModuleId, port: &str) -> Option<Value> {
        self.cache
            .get(&PortAddress::new(module.clone(), PortId::named(port)))
    }

    /// Clone-modify-swap under the edit lock, then emit the collected events
    fn edit<T, F>(&self, change: F) -> Result<T, NetworkError>
    where
        F: FnOnce(
            &mut Network,
            &mut DynamicPortManager,
        ) -> Result<(T, Vec<NetworkEvent>), NetworkError>,
    {
        let (value, events) = {
            let mut ports = self.ports.lock();
            let mut next = Network::clone(&self.network.load());
            let result = change(&mut next, &mut *ports)?;
            self.network.store(Arc::new(next));
            result
        };

        for event in events {
            self.events.emit(event);
        }
        Ok(value)
    }

    /// Instantiate a registered module kind and add it to the network
    pub fn add_module(&self, name: &str) -> Result<ModuleId, NetworkError> {
        let module = self.factory.create(name)?;
        self.add_module_with(module)
    }

    /// Add an already constructed module
    pub fn add_module_with(&self, module: Module) -> Result<ModuleId, NetworkError> {
        let id = self.edit(|network, _| {
            let id = network.add_module(module)?;
            Ok((id.clone(), vec![NetworkEvent::ModuleAdded { module: id }]))
        })?;
        tracing::info!("➕ Module '{}' added", id);
        Ok(id)
    }

    /// Remove a module and every connection touching it
    pub fn remove_module(&self, id: &ModuleId) -> Result<(), NetworkError> {
        self.edit(|network, ports| {
            let (_, removed) = network.remove_module(id)?;
            let mut events: Vec<NetworkEvent> = removed
                .iter()
                .map(|c| NetworkEvent::ConnectionRemoved { id: c.id.clone() })
                .collect();

            let mut compacted = BTreeSet::new();
            let mut changes = Vec::new();
            for connection in removed.iter().filter(|c| &c.input.module != id) {
                let moved = ports.on_disconnected(network, connection)?;
                if !moved.is_empty() {
                    compacted.insert(connection.input.module.clone());
                    changes.extend(moved);
                }
            }

            events.push(NetworkEvent::ModuleRemoved { module: id.clone() });
            if !changes.is_empty() {
                events.push(NetworkEvent::DynamicPortsUpdated {
                    modules: compacted.into_iter().collect(),
                    changes,
                });
            }
            Ok(((), events))
        })?;

        self.cache.remove_module(id);
        tracing::info!("➖ Module '{}' removed", id);
        Ok(())
    }

    /// Connect two ports, working out which side is the output
    ///
    /// Rejected requests leave the network untouched and fire `InvalidConnection`.
    pub fn request_connection(
        &self,
        first: &PortRef,
        second: &PortRef,
    ) -> Result<ConnectionId, NetworkError> {
        let result = self.edit(|network, ports| {
            let desc = orient(network, first, second)?;
            let id = ports.connect(network, desc)?;
            let description = network
                .connection(&id)
                .map(|c| c.description())
                .ok_or_else(|| NetworkError::ConnectionNotFound(id.to_string()))?;
            Ok((
                id.clone(),
                vec![NetworkEvent::ConnectionAdded { id, description }],
            ))
        });

        match &result {
            Ok(id) => tracing::info!("🔗 Connected '{}'", id),
            Err(e) => {
                tracing::warn!("🚫 Rejected connection {} <-> {}: {}", first, second, e);
                self.events.emit(NetworkEvent::InvalidConnection {
                    from: first.address(),
                    to: second.address(),
                    reason: e.to_string(),
                });
            }
        }
        result
    }

    /// Remove a connection, compacting the destination's dynamic slots
    pub fn remove_connection(&self, id: &ConnectionId) -> Result<(), NetworkError> {
        self.edit(|network, ports| {
            let removed = network.disconnect(id)?;
            let changes = ports.on_disconnected(network, &removed)?;
            let mut events = vec![NetworkEvent::ConnectionRemoved { id: id.clone() }];
            if !changes.is_empty() {
                events.push(NetworkEvent::DynamicPortsUpdated {
                    modules: vec![removed.input.module.clone()],
                    changes,
                });
            }
            Ok(((), events))
        })?;
        tracing::info!("✂️ Connection '{}' removed", id);
        Ok(())
    }

    /// Defer dynamic port compaction, e.g. while loading a network in bulk
    pub fn disable_dynamic_ports(&self) {
        self.ports.lock().disable();
    }

    /// Resume compaction, compacting every module touched in the meantime
    ///
    /// Fires a single `DynamicPortsUpdated` covering all of them.
    pub fn enable_dynamic_ports(&self) -> Result<(), NetworkError> {
        self.edit(|network, ports| {
            let (modules, changes) = ports.enable(network)?;
            Ok(((), vec![NetworkEvent::DynamicPortsUpdated { modules, changes }]))
        })
    }

    /// Set one entry of a module's state blob
    pub fn set_module_state(
        &self,
        id: &ModuleId,
        key: &str,
        value: Value,
    ) -> Result<(), NetworkError> {
        let network = self.network();
        let module = network
            .module(id)
            .ok_or_else(|| NetworkError::ModuleNotFound(id.clone()))?;
        module.state().write().set(key, value);
        Ok(())
    }

    /// Copy of a module's state blob
    pub fn module_state(&self, id: &ModuleId) -> Option<ModuleState> {
        self.network
            .load()
            .module(id)
            .map(|m| m.state().read().clone())
    }

    /// Flag a module; it is skipped if not yet dispatched, or stops at its next checkpoint.
    /// A flag still unobserved when the run finishes is dropped.
    pub fn interrupt_module(&self, id: &ModuleId) {
        self.interrupts.interrupt(id);
    }

    pub fn analyze(&self, treat_as_undirected: bool) -> NetworkAnalysis {
        GraphAnalyzer::analyze(&self.network(), &ModuleFilter::all(), treat_as_undirected)
    }

    pub fn schedule(&self) -> Result<ScheduleOrder, SchedulingError> {
        Scheduler::schedule_all(&self.network())
    }

    pub fn start(&self) -> Result<(), EnqueueError> {
        self.manager.start()
    }

    pub async fn stop(&self) {
        self.manager.stop().await;
    }

    pub fn set_execution_strategy(&self, strategy: ExecutionStrategy) {
        self.manager.set_execution_strategy(strategy);
    }

    /// Run the whole current network
    pub fn execute_all(&self) -> Result<RunHandle, EnqueueError> {
        tracing::info!("▶️ Executing all modules");
        self.execute_with(ModuleFilter::all(), self.default_lookup())
    }

    /// Run one module together with everything it depends on
    pub fn execute_module(&self, id: &ModuleId) -> Result<RunHandle, ExecuteError> {
        let network = self.network();
        if !network.contains_module(id) {
            return Err(NetworkError::ModuleNotFound(id.clone()).into());
        }
        tracing::info!("▶️ Executing module '{}' and its upstream", id);
        let filter = ModuleFilter::upstream_of(&network, id);
        Ok(self.submit(network, filter, self.default_lookup())?)
    }

    /// Run the current network with a custom filter and lookup
    pub fn execute_with(
        &self,
        filter: ModuleFilter,
        lookup: Arc<dyn ExecutableLookup>,
    ) -> Result<RunHandle, EnqueueError> {
        self.submit(self.network(), filter, lookup)
    }

    fn submit(
        &self,
        network: NetworkHandle,
        filter: ModuleFilter,
        lookup: Arc<dyn ExecutableLookup>,
    ) -> Result<RunHandle, EnqueueError> {
        let context = ExecutionContext::new(network, lookup, filter)
            .with_interrupts(self.interrupts.clone())
            .with_failure_policy(self.failure_policy);
        self.manager.enqueue_context(context)
    }

    fn default_lookup(&self) -> Arc<dyn ExecutableLookup> {
        Arc::new(NetworkLookup::new(self.cache.clone()))
    }
}

/// Turn an undirected request into an output → input description
fn orient(
    network: &Network,
    first: &PortRef,
    second: &PortRef,
) -> Result<ConnectionDescription, NetworkError> {
    let a = port_of(network, first)?;
    let b = port_of(network, second)?;

    match (a.direction, b.direction) {
        (PortDirection::Output, PortDirection::Input) => Ok(ConnectionDescription::new(
            first.address(),
            second.address(),
        )),
        (PortDirection::Input, PortDirection::Output) => Ok(ConnectionDescription::new(
            second.address(),
            first.address(),
        )),
        (direction, _) => Err(NetworkError::DirectionMismatch {
            module: second.module.clone(),
            port: PortId::named(second.port.clone()),
            kind: direction.as_str(),
        }),
    }
}

/// Declared port behind a request endpoint, inputs first
fn port_of<'a>(network: &'a Network, port: &PortRef) -> Result<&'a PortDescription, NetworkError> {
    let module = network
        .module(&port.module)
        .ok_or_else(|| NetworkError::ModuleNotFound(port.module.clone()))?;
    module.port(&port.port).ok_or_else(|| NetworkError::PortNotFound {
        module: port.module.clone(),
        port: port.port.clone(),
    })
}
