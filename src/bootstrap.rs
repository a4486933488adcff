//! Application setup and initialization
//!
//! Wires together configuration, logging, the module factory, the execution manager and
//! the controller.

use crate::{config::Config, controller::NetworkEditorController, modules::ModuleFactory};
use anyhow::Result;
use std::sync::Arc;

/// Install the global tracing subscriber
///
/// Fails if a subscriber is already installed.
pub fn init_tracing(config: &Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .with_max_level(config.logging.max_level())
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))
}

/// Create a started controller with the built-in modules registered
///
/// Fails if called outside a tokio runtime.
pub fn create_controller(config: &Config) -> Result<NetworkEditorController> {
    tracing::info!("🧱 Registering built-in module types");
    let factory = Arc::new(ModuleFactory::with_basic_modules());

    tracing::info!(
        "⚙️ Initializing execution manager (strategy {}, capacity {}, policy {:?})",
        config.execution.strategy,
        config.execution.queue_capacity,
        config.execution.failure_policy
    );
    let controller = NetworkEditorController::from_config(config, factory);
    controller
        .start()
        .map_err(|e| anyhow::anyhow!("Failed to start execution manager: {}", e))?;

    tracing::info!("✅ Controller initialized successfully");
    Ok(controller)
}
