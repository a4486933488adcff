//! Core identifiers and plain-data types of the graph model
//!
//! Modules, ports and connections are referenced by these ids in flat maps. Nothing in the
//! model holds a pointer to another model object.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{
    fmt,
    str::FromStr,
    sync::atomic::{AtomicU64, Ordering},
};

/// Process-wide counter backing `ModuleId::generate`
static NEXT_MODULE_NUMBER: AtomicU64 = AtomicU64::new(1);

/// Identity of a module: human-readable name plus numeric suffix (`"ReadMatrix:2"`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ModuleId {
    name: String,
    number: u64,
}

impl ModuleId {
    /// Create an id with an explicit suffix
    pub fn new(name: impl Into<String>, number: u64) -> Self {
        Self {
            name: name.into(),
            number,
        }
    }

    /// Create a process-unique id for a module called `name`
    pub fn generate(name: impl Into<String>) -> Self {
        let number = NEXT_MODULE_NUMBER.fetch_add(1, Ordering::Relaxed);
        Self::new(name, number)
    }

    /// Module name part of the id
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Numeric suffix of the id
    pub fn number(&self) -> u64 {
        self.number
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.number)
    }
}

impl FromStr for ModuleId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, number) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("Module id '{}' has no numeric suffix", s))?;
        if name.is_empty() {
            return Err(format!("Module id '{}' has an empty name", s));
        }
        let number = number
            .parse()
            .map_err(|_| format!("Module id '{}' has an invalid numeric suffix", s))?;
        Ok(Self::new(name, number))
    }
}

impl From<ModuleId> for String {
    fn from(id: ModuleId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for ModuleId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Identity of a port on a module: name plus slot qualifier
///
/// Static ports always use slot 0. Dynamic input ports expose one slot per connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortId {
    pub name: String,
    pub index: usize,
}

impl PortId {
    pub fn new(name: impl Into<String>, index: usize) -> Self {
        Self {
            name: name.into(),
            index,
        }
    }

    /// Slot 0 of the named port
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(name, 0)
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.index)
    }
}

/// Which side of a connection a port sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortDirection {
    Input,
    Output,
}

impl PortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            PortDirection::Input => "input",
            PortDirection::Output => "output",
        }
    }
}

/// Declared port of a module
///
/// The datatype tag is opaque to the engine and only compared for equality when two ports
/// are connected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDescription {
    /// Port name, unique per direction on one module
    pub name: String,
    /// Datatype tag, e.g. "Matrix" or "Field"
    pub datatype: String,
    pub direction: PortDirection,
    /// Dynamic input ports accept any number of connections in sequential slots
    #[serde(default)]
    pub dynamic: bool,
}

impl PortDescription {
    pub fn input(name: impl Into<String>, datatype: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            datatype: datatype.into(),
            direction: PortDirection::Input,
            dynamic: false,
        }
    }

    pub fn dynamic_input(name: impl Into<String>, datatype: impl Into<String>) -> Self {
        Self {
            dynamic: true,
            ..Self::input(name, datatype)
        }
    }

    pub fn output(name: impl Into<String>, datatype: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            datatype: datatype.into(),
            direction: PortDirection::Output,
            dynamic: false,
        }
    }

    pub fn is_input(&self) -> bool {
        self.direction == PortDirection::Input
    }
}

/// A concrete port slot on a concrete module
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortAddress {
    pub module: ModuleId,
    pub port: PortId,
}

impl PortAddress {
    pub fn new(module: ModuleId, port: PortId) -> Self {
        Self { module, port }
    }
}

impl fmt::Display for PortAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_p#{}", self.module, self.port)
    }
}

/// Logical description of an edge: output slot feeding an input slot
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionDescription {
    pub out: PortAddress,
    #[serde(rename = "in")]
    pub input: PortAddress,
}

impl ConnectionDescription {
    pub fn new(out: PortAddress, input: PortAddress) -> Self {
        Self { out, input }
    }
}

/// Deterministic connection identity
///
/// Re-creating the same logical edge always yields the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn create(desc: &ConnectionDescription) -> Self {
        Self(format!("{}_@to@_{}_", desc.out, desc.input))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An edge of the network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub out: PortAddress,
    #[serde(rename = "in")]
    pub input: PortAddress,
}

impl Connection {
    pub fn from_description(desc: ConnectionDescription) -> Self {
        Self {
            id: ConnectionId::create(&desc),
            out: desc.out,
            input: desc.input,
        }
    }

    pub fn description(&self) -> ConnectionDescription {
        ConnectionDescription::new(self.out.clone(), self.input.clone())
    }

    /// Whether either endpoint belongs to `module`
    pub fn touches(&self, module: &ModuleId) -> bool {
        &self.out.module == module || &self.input.module == module
    }
}

/// Configuration blob owned by a module
///
/// The engine never reads it; it is handed to the module's `execute()` as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleState {
    values: Map<String, Value>,
}

impl ModuleState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.values.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    /// Numeric value stored under `key`, if any
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.values.get(key).and_then(Value::as_f64)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }
}

impl From<Map<String, Value>> for ModuleState {
    fn from(values: Map<String, Value>) -> Self {
        Self { values }
    }
}
