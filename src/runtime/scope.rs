//! What a module sees while it executes

use crate::error::Interrupted;
use crate::network::{
    Module, ModuleId, ModuleStateHandle, Network, NetworkHandle, PortAddress, PortId,
};
use crate::runtime::context::InterruptSet;
use crate::runtime::lookup::ExecutableLookup;
use serde_json::Value;
use std::{collections::BTreeSet, sync::Arc};
use uuid::Uuid;

/// Per-invocation view handed to `Executable::execute`
///
/// Inputs are resolved through the run's `ExecutableLookup`. Inputs fed by a module that
/// failed, was skipped or was interrupted in the same run read as missing.
pub struct ExecutionScope {
    run_id: Uuid,
    module: Module,
    network: NetworkHandle,
    lookup: Arc<dyn ExecutableLookup>,
    unavailable: Arc<BTreeSet<ModuleId>>,
    interrupts: InterruptSet,
}

impl ExecutionScope {
    pub fn new(
        run_id: Uuid,
        module: Module,
        network: NetworkHandle,
        lookup: Arc<dyn ExecutableLookup>,
        interrupts: InterruptSet,
    ) -> Self {
        Self {
            run_id,
            module,
            network,
            lookup,
            unavailable: Arc::new(BTreeSet::new()),
            interrupts,
        }
    }

    /// Treat outputs of these modules as missing
    pub fn with_unavailable(mut self, unavailable: Arc<BTreeSet<ModuleId>>) -> Self {
        self.unavailable = unavailable;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn module_id(&self) -> &ModuleId {
        self.module.id()
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn state(&self) -> ModuleStateHandle {
        self.module.state()
    }

    /// Value on slot 0 of an input port
    pub fn input(&self, port: &str) -> Option<Value> {
        self.read_slot(&PortAddress::new(self.module_id().clone(), PortId::named(port)))
    }

    /// Like `input`, but a missing value is an error
    pub fn required_input(&self, port: &str) -> anyhow::Result<Value> {
        self.input(port).ok_or_else(|| {
            anyhow::anyhow!(
                "Required input '{}' of module '{}' has no value",
                port,
                self.module_id()
            )
        })
    }

    /// Available values on a dynamic input port, in slot order
    pub fn dynamic_inputs(&self, port: &str) -> Vec<Value> {
        self.network
            .connections_on_input_port(self.module_id(), port)
            .into_iter()
            .filter_map(|c| self.read_slot(&c.input))
            .collect()
    }

    /// Whether an input port has nothing to read
    ///
    /// A dynamic port counts as missing when it has no connections or any connected slot
    /// has no value.
    pub fn is_input_missing(&self, port: &str) -> bool {
        let Some(description) = self.module.input_port(port) else {
            return true;
        };
        if !description.dynamic {
            return self.input(port).is_none();
        }

        let slots = self.network.connections_on_input_port(self.module_id(), port);
        slots.is_empty() || slots.iter().any(|c| self.read_slot(&c.input).is_none())
    }

    /// Publish a value on one of the module's output ports
    pub fn send_output(&self, port: &str, value: Value) -> anyhow::Result<()> {
        if self.module.output_port(port).is_none() {
            anyhow::bail!(
                "Module '{}' has no output port '{}'",
                self.module_id(),
                port
            );
        }
        self.lookup.store_output(
            PortAddress::new(self.module_id().clone(), PortId::named(port)),
            value,
        );
        Ok(())
    }

    /// Cooperative interruption point
    ///
    /// Returns `Interrupted` once the module has been flagged, consuming the flag.
    pub fn checkpoint(&self) -> Result<(), Interrupted> {
        if self.interrupts.take(self.module_id()) {
            tracing::info!("⏹️ Module '{}' interrupted at checkpoint", self.module_id());
            return Err(Interrupted(self.module_id().clone()));
        }
        Ok(())
    }

    fn read_slot(&self, input: &PortAddress) -> Option<Value> {
        if let Some(connection) = self.network.source_of(input) {
            if self.unavailable.contains(&connection.out.module) {
                return None;
            }
        }
        self.lookup.lookup_input(&self.network, input)
    }
}
