//! Runtime Execution Engine
//!
//! Everything between a network snapshot and executed modules:
//! - Graph analysis with cycle detection and connected components
//! - Topological leveling into execution groups
//! - Per-run execution contexts with failure isolation
//! - A queued execution manager with swappable dispatch strategy
//! - The notification bus observers subscribe to

// Module filters shared by analysis, scheduling and execution
pub mod filter;

// Petgraph view over a network: cycles and components
pub mod analyzer;

// Topological leveling into numbered groups
pub mod scheduler;

// Where module inputs come from and outputs go to
pub mod lookup;

// What a module sees while executing
pub mod scope;

// Serial / parallel group dispatch and the downstream failure policy
pub mod strategy;

// One-shot runs, outcomes and reports
pub mod context;

// Execution queue and background worker
pub mod manager;

// Callback-based notifications
pub mod events;

pub use analyzer::{GraphAnalyzer, ModuleGraph, NetworkAnalysis};
pub use context::{ExecutionContext, InterruptSet, ModuleOutcome, RunReport, RunStatus};
pub use events::{EventBus, EventHandler, NetworkEvent};
pub use filter::ModuleFilter;
pub use lookup::{ExecutableLookup, NetworkLookup, OutputCache, SandboxLookup};
pub use manager::{ExecutionManager, RunHandle};
pub use scheduler::{ScheduleOrder, Scheduler};
pub use scope::ExecutionScope;
pub use strategy::{DownstreamFailurePolicy, ExecutionStrategy};
