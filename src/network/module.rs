//! Modules: identity, declared ports, executable unit and state blob

use crate::network::types::{ModuleId, ModuleState, PortDescription, PortDirection};
use crate::runtime::scope::ExecutionScope;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};

/// Shared handle to a module's state blob
pub type ModuleStateHandle = Arc<RwLock<ModuleState>>;

/// Capability every module kind implements
///
/// The engine treats implementations as black boxes: inputs are read and outputs written
/// through the `ExecutionScope`, failures are reported through the returned error.
#[async_trait]
pub trait Executable: Send + Sync {
    async fn execute(&self, scope: &ExecutionScope) -> anyhow::Result<()>;
}

/// Adapter turning a synchronous closure into an `Executable`
pub struct FnExecutable<F>(F);

#[async_trait]
impl<F> Executable for FnExecutable<F>
where
    F: Fn(&ExecutionScope) -> anyhow::Result<()> + Send + Sync,
{
    async fn execute(&self, scope: &ExecutionScope) -> anyhow::Result<()> {
        (self.0)(scope)
    }
}

/// Wrap a synchronous closure as a shareable executable
pub fn executable_fn<F>(f: F) -> Arc<dyn Executable>
where
    F: Fn(&ExecutionScope) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(FnExecutable(f))
}

/// Static shape of a module kind: its name and ordered ports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescription {
    pub name: String,
    #[serde(default)]
    pub input_ports: Vec<PortDescription>,
    #[serde(default)]
    pub output_ports: Vec<PortDescription>,
}

impl ModuleDescription {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            input_ports: Vec::new(),
            output_ports: Vec::new(),
        }
    }

    /// Append an input port; insertion order defines the port index
    pub fn with_input(mut self, port: PortDescription) -> Self {
        self.input_ports.push(PortDescription {
            direction: PortDirection::Input,
            ..port
        });
        self
    }

    /// Append an output port; insertion order defines the port index
    pub fn with_output(mut self, port: PortDescription) -> Self {
        self.output_ports.push(PortDescription {
            direction: PortDirection::Output,
            dynamic: false,
            ..port
        });
        self
    }
}

/// A unit of computation placed in a network
#[derive(Clone)]
pub struct Module {
    id: ModuleId,
    input_ports: Vec<PortDescription>,
    output_ports: Vec<PortDescription>,
    executable: Arc<dyn Executable>,
    state: ModuleStateHandle,
}

impl Module {
    /// Create a module with a freshly generated id
    pub fn new(description: ModuleDescription, executable: Arc<dyn Executable>) -> Self {
        let id = ModuleId::generate(description.name.clone());
        Self::with_id(id, description, executable)
    }

    /// Create a module with a caller-chosen id
    pub fn with_id(
        id: ModuleId,
        description: ModuleDescription,
        executable: Arc<dyn Executable>,
    ) -> Self {
        Self {
            id,
            input_ports: description.input_ports,
            output_ports: description.output_ports,
            executable,
            state: Arc::new(RwLock::new(ModuleState::new())),
        }
    }

    /// Replace the initial state blob
    pub fn with_state(self, state: ModuleState) -> Self {
        *self.state.write() = state;
        self
    }

    pub fn id(&self) -> &ModuleId {
        &self.id
    }

    pub fn input_ports(&self) -> &[PortDescription] {
        &self.input_ports
    }

    pub fn output_ports(&self) -> &[PortDescription] {
        &self.output_ports
    }

    pub fn input_port(&self, name: &str) -> Option<&PortDescription> {
        self.input_ports.iter().find(|p| p.name == name)
    }

    pub fn output_port(&self, name: &str) -> Option<&PortDescription> {
        self.output_ports.iter().find(|p| p.name == name)
    }

    /// Look a port up on either side, inputs first
    pub fn port(&self, name: &str) -> Option<&PortDescription> {
        self.input_port(name).or_else(|| self.output_port(name))
    }

    pub fn executable(&self) -> Arc<dyn Executable> {
        Arc::clone(&self.executable)
    }

    pub fn state(&self) -> ModuleStateHandle {
        Arc::clone(&self.state)
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("id", &self.id)
            .field("input_ports", &self.input_ports)
            .field("output_ports", &self.output_ports)
            .field("state", &*self.state.read())
            .finish_non_exhaustive()
    }
}
