//! Module catalogue: the factory and the built-in module kinds

// Name → constructor registry
pub mod factory;

// Built-in scalar modules
pub mod basic;

pub use basic::{BasicModule, BasicModuleKind};
pub use factory::ModuleFactory;
