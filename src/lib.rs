//! flownet: dataflow network execution engine
//!
//! This library provides the graph model of a dataflow network, cycle-checked topological
//! scheduling into parallel execution groups, and a queued execution manager that runs
//! modules with failure isolation.

// Core configuration and setup
pub mod config;

// Typed errors shared across layers
pub mod error;

// Graph model - modules, ports, connections and dynamic port slots
pub mod network;

// Runtime execution engine - analysis, scheduling, contexts, manager, events
pub mod runtime;

// Module factory and built-in module kinds
pub mod modules;

// Controller-level API - editing, validation, notifications, execution requests
pub mod controller;

// Application wiring for binaries
pub mod bootstrap;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types for external consumers
pub use config::Config;
pub use controller::{NetworkEditorController, PortRef};
pub use error::{EnqueueError, ExecuteError, Fatal, Interrupted, NetworkError, SchedulingError};
pub use network::{
    Connection, ConnectionId, Executable, Module, ModuleDescription, ModuleId, Network,
    NetworkHandle, PortDescription, PortId,
};
pub use runtime::{
    DownstreamFailurePolicy, EventBus, ExecutionContext, ExecutionManager, ExecutionScope,
    ExecutionStrategy, ModuleOutcome, NetworkEvent, RunHandle, RunReport, RunStatus,
};
