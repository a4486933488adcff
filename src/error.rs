//! Typed errors for the dataflow engine
//!
//! Structural and resource errors are reported synchronously through these enums.
//! Module bodies return `anyhow::Error`; the engine records those per module.

use crate::network::{ModuleId, PortId};
use thiserror::Error;

/// Errors raised by structural edits of a network
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NetworkError {
    /// Referenced module is not part of the network
    #[error("Module '{0}' not found in network")]
    ModuleNotFound(ModuleId),

    /// Module id already used in this network
    #[error("Module '{0}' already exists in network")]
    DuplicateModule(ModuleId),

    /// Module does not declare the referenced port
    #[error("Port '{port}' not found on module '{module}'")]
    PortNotFound { module: ModuleId, port: String },

    /// Connection must run from an output port to an input port
    #[error("Cannot connect {kind} port '{port}' of '{module}' here")]
    DirectionMismatch {
        module: ModuleId,
        port: PortId,
        kind: &'static str,
    },

    /// Both endpoints must carry the same datatype tag
    #[error("Datatype mismatch: output carries '{output}', input expects '{input}'")]
    DatatypeMismatch { output: String, input: String },

    /// Static input ports accept a single connection
    #[error("Input port '{port}' of '{module}' is already connected")]
    InputPortFull { module: ModuleId, port: PortId },

    /// A module cannot feed itself
    #[error("Cannot connect module '{0}' to itself")]
    SameModule(ModuleId),

    /// Same logical edge already exists
    #[error("Connection '{0}' already exists")]
    DuplicateConnection(String),

    /// Connection id does not resolve
    #[error("Connection '{0}' not found")]
    ConnectionNotFound(String),

    /// Module name is not registered with the module factory
    #[error("No module named '{0}' is registered")]
    UnknownModuleType(String),
}

/// Errors raised while analyzing or scheduling a network
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchedulingError {
    /// Filtered modules contain a directed cycle
    #[error("Network has cycles through modules: {0:?}")]
    NetworkHasCycles(Vec<ModuleId>),
}

/// Resource errors from the execution manager
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnqueueError {
    /// `start()` has not been called yet
    #[error("Execution manager is not running")]
    NotRunning,

    /// Manager was stopped; no further runs are accepted
    #[error("Execution manager has been stopped")]
    Stopped,

    /// Bounded queue has no free slot
    #[error("Execution queue is full")]
    QueueFull,

    /// `start()` was called outside a tokio runtime
    #[error("No tokio runtime available to run the execution worker")]
    NoRuntime,
}

/// Errors from controller calls that both resolve modules and submit a run
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecuteError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Enqueue(#[from] EnqueueError),
}

/// Error a module returns to halt the whole run once its group has drained
///
/// Any other error is recorded as an ordinary per-module failure.
#[derive(Debug, Clone, Error)]
#[error("Fatal module error: {0}")]
pub struct Fatal(pub String);

impl Fatal {
    /// Build a fatal error from any message
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Error returned from `ExecutionScope::checkpoint` when a module should stop early
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Module '{0}' was interrupted")]
pub struct Interrupted(pub ModuleId);
