#![allow(dead_code)]

use flownet::{
    modules::ModuleFactory, DownstreamFailurePolicy, EventBus, ExecutionManager,
    ExecutionStrategy, NetworkEditorController, NetworkEvent,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// Started controller with the built-in modules
pub fn controller(strategy: ExecutionStrategy) -> NetworkEditorController {
    controller_with_policy(strategy, DownstreamFailurePolicy::Skip)
}

pub fn controller_with_policy(
    strategy: ExecutionStrategy,
    policy: DownstreamFailurePolicy,
) -> NetworkEditorController {
    let manager = Arc::new(ExecutionManager::new(strategy, 16, EventBus::new()));
    let controller = NetworkEditorController::new(
        Arc::new(ModuleFactory::with_basic_modules()),
        manager,
        policy,
    );
    controller.start().unwrap();
    controller
}

/// Record every event emitted through `bus`
pub fn record(bus: &EventBus) -> Arc<Mutex<Vec<NetworkEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    bus.subscribe(move |event| sink.lock().push(event.clone()));
    events
}
