//! Graph Model
//!
//! Pure data describing a dataflow network:
//! - Identifiers and port/connection types
//! - Modules with their executable unit and state blob
//! - The network arena with structural queries
//! - Dynamic port slot management

// Identifiers, port descriptions, connections and module state
pub mod types;

// Module definition and the Executable capability
pub mod module;

// Network arena: modules + connections
#[allow(clippy::module_inception)]
pub mod network;

// Dynamic input port slot allocation and compaction
pub mod ports;

pub use module::{executable_fn, Executable, Module, ModuleDescription, ModuleStateHandle};
pub use network::{Network, NetworkHandle};
pub use ports::{DynamicPortManager, SlotChange};
pub use types::{
    Connection, ConnectionDescription, ConnectionId, ModuleId, ModuleState, PortAddress,
    PortDescription, PortDirection, PortId,
};
