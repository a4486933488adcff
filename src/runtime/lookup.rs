//! Executable lookup: where module inputs come from and where outputs go
//!
//! `NetworkLookup` is the default, reading every input slot through its live connection
//! from a shared `OutputCache`. `SandboxLookup` layers input overrides and a private output
//! store over another lookup, so a module can be run in isolation without touching the
//! shared cache.

use crate::network::{ModuleId, Network, PortAddress};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;

/// Resolves input values and stores output values for executing modules
pub trait ExecutableLookup: Send + Sync {
    /// Value feeding the given input slot, `None` when nothing is available
    fn lookup_input(&self, network: &Network, input: &PortAddress) -> Option<Value>;

    /// Record a value sent on an output slot
    fn store_output(&self, output: PortAddress, value: Value);

    /// Drop previously stored outputs of `module`, called right before it executes
    fn clear_outputs(&self, module: &ModuleId);
}

/// Concurrent store of the latest value sent on each output slot
///
/// Clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct OutputCache {
    values: Arc<DashMap<PortAddress, Value>>,
}

impl OutputCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, output: &PortAddress) -> Option<Value> {
        self.values.get(output).map(|entry| entry.value().clone())
    }

    pub fn insert(&self, output: PortAddress, value: Value) -> Option<Value> {
        self.values.insert(output, value)
    }

    /// Remove every value sent by `module`
    pub fn remove_module(&self, module: &ModuleId) {
        self.values.retain(|address, _| &address.module != module);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&self) {
        self.values.clear();
    }
}

/// Default lookup reading through the network's connections
#[derive(Debug, Clone, Default)]
pub struct NetworkLookup {
    cache: OutputCache,
}

impl NetworkLookup {
    pub fn new(cache: OutputCache) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &OutputCache {
        &self.cache
    }
}

impl ExecutableLookup for NetworkLookup {
    fn lookup_input(&self, network: &Network, input: &PortAddress) -> Option<Value> {
        let connection = network.source_of(input)?;
        self.cache.get(&connection.out)
    }

    fn store_output(&self, output: PortAddress, value: Value) {
        self.cache.insert(output, value);
    }

    fn clear_outputs(&self, module: &ModuleId) {
        self.cache.remove_module(module);
    }
}

/// Isolated lookup for sandboxed runs
///
/// Input reads check the overrides first, then outputs produced inside the sandbox, then
/// the inner lookup. Outputs are never written to the inner lookup.
pub struct SandboxLookup {
    inner: Arc<dyn ExecutableLookup>,
    overrides: DashMap<PortAddress, Value>,
    outputs: DashMap<PortAddress, Value>,
}

impl SandboxLookup {
    pub fn new(inner: Arc<dyn ExecutableLookup>) -> Self {
        Self {
            inner,
            overrides: DashMap::new(),
            outputs: DashMap::new(),
        }
    }

    /// Pin the value read on an input slot
    pub fn with_input(self, input: PortAddress, value: Value) -> Self {
        self.overrides.insert(input, value);
        self
    }

    pub fn set_input(&self, input: PortAddress, value: Value) {
        self.overrides.insert(input, value);
    }

    /// Value a sandboxed module sent on `output`
    pub fn output(&self, output: &PortAddress) -> Option<Value> {
        self.outputs.get(output).map(|entry| entry.value().clone())
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }
}

impl ExecutableLookup for SandboxLookup {
    fn lookup_input(&self, network: &Network, input: &PortAddress) -> Option<Value> {
        if let Some(value) = self.overrides.get(input) {
            return Some(value.value().clone());
        }
        if let Some(connection) = network.source_of(input) {
            if let Some(value) = self.outputs.get(&connection.out) {
                return Some(value.value().clone());
            }
        }
        self.inner.lookup_input(network, input)
    }

    fn store_output(&self, output: PortAddress, value: Value) {
        self.outputs.insert(output, value);
    }

    fn clear_outputs(&self, module: &ModuleId) {
        self.outputs.retain(|address, _| &address.module != module);
    }
}
