//! flownet demo binary
//!
//! Builds a small network from the built-in modules, runs it once through the execution
//! manager and prints the run summary:
//!
//! ```text
//! CreateScalar(2) ─┐
//!                  ├─ Sum ── Scale(x10) ── Report
//! CreateScalar(3) ─┘
//! ```

use anyhow::Result;
use flownet::{
    bootstrap::{create_controller, init_tracing},
    Config, PortRef,
};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration from FLOWNET_* environment variables
    let config = Config::default();
    init_tracing(&config)?;

    let controller = create_controller(&config)?;

    let a = controller.add_module("CreateScalar")?;
    let b = controller.add_module("CreateScalar")?;
    let sum = controller.add_module("Sum")?;
    let scale = controller.add_module("Scale")?;
    let report = controller.add_module("Report")?;

    controller.set_module_state(&a, "Value", json!(2.0))?;
    controller.set_module_state(&b, "Value", json!(3.0))?;
    controller.set_module_state(&scale, "Factor", json!(10.0))?;

    controller
        .request_connection(&PortRef::new(&a, "Scalar"), &PortRef::new(&sum, "Values"))?;
    controller
        .request_connection(&PortRef::new(&b, "Scalar"), &PortRef::new(&sum, "Values"))?;
    controller
        .request_connection(&PortRef::new(&sum, "Result"), &PortRef::new(&scale, "Input"))?;
    controller
        .request_connection(&PortRef::new(&scale, "Output"), &PortRef::new(&report, "Input"))?;

    let schedule = controller.schedule()?;
    for (group, modules) in schedule.groups() {
        let names: Vec<String> = modules.iter().map(ToString::to_string).collect();
        tracing::info!("📋 Group {}: {}", group, names.join(", "));
    }

    let run = controller.execute_all()?.wait().await?;
    println!("Run {} finished: {:?} (code {})", run.run_id, run.status, run.code());
    for (module, outcome) in &run.outcomes {
        println!("  {:<20} {:?}", module.to_string(), outcome);
    }
    if let Some(state) = controller.module_state(&report) {
        println!("Report received: {}", state.get("LastValue").cloned().unwrap_or_default());
    }

    controller.stop().await;
    Ok(())
}
