//! Built-in module kinds
//!
//! Small scalar modules used to assemble demo and test networks. Each kind declares its
//! ports and reads its parameters from the module state blob.

use crate::error::Fatal;
use crate::network::{Executable, ModuleDescription, PortDescription};
use crate::runtime::scope::ExecutionScope;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

/// Datatype tag carried by every built-in port
pub const SCALAR: &str = "Scalar";

/// Available built-in module kinds
///
/// - CreateScalar: emits the `Value` state entry
/// - Sum: adds every value on its dynamic `Values` port
/// - Scale: multiplies its input by the `Factor` state entry
/// - Report: stores the last received value under `LastValue`
/// - Delay: forwards its input after `Millis`, checking for interrupts while waiting
/// - Fail: always errors; `Fatal` halts the run, `Panic` panics instead
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BasicModuleKind {
    CreateScalar,
    Sum,
    Scale,
    Report,
    Delay,
    Fail,
}

impl BasicModuleKind {
    pub const ALL: [BasicModuleKind; 6] = [
        Self::CreateScalar,
        Self::Sum,
        Self::Scale,
        Self::Report,
        Self::Delay,
        Self::Fail,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateScalar => "CreateScalar",
            Self::Sum => "Sum",
            Self::Scale => "Scale",
            Self::Report => "Report",
            Self::Delay => "Delay",
            Self::Fail => "Fail",
        }
    }

    /// Declared ports of this kind
    pub fn description(&self) -> ModuleDescription {
        let desc = ModuleDescription::new(self.name());
        match self {
            Self::CreateScalar => desc.with_output(PortDescription::output("Scalar", SCALAR)),
            Self::Sum => desc
                .with_input(PortDescription::dynamic_input("Values", SCALAR))
                .with_output(PortDescription::output("Result", SCALAR)),
            Self::Scale | Self::Delay | Self::Fail => desc
                .with_input(PortDescription::input("Input", SCALAR))
                .with_output(PortDescription::output("Output", SCALAR)),
            Self::Report => desc.with_input(PortDescription::input("Input", SCALAR)),
        }
    }
}

/// Executable behind every built-in kind
#[derive(Debug, Clone, Copy)]
pub struct BasicModule {
    kind: BasicModuleKind,
}

impl BasicModule {
    pub fn new(kind: BasicModuleKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> BasicModuleKind {
        self.kind
    }

    fn create_scalar(&self, scope: &ExecutionScope) -> anyhow::Result<()> {
        let value = scope.state().read().get_f64("Value").unwrap_or(0.0);
        scope.send_output("Scalar", json!(value))
    }

    fn sum(&self, scope: &ExecutionScope) -> anyhow::Result<()> {
        let total: f64 = scope
            .dynamic_inputs("Values")
            .iter()
            .map(|v| as_scalar(v, "Values"))
            .sum::<anyhow::Result<f64>>()?;
        tracing::debug!("➕ Sum of '{}' = {}", scope.module_id(), total);
        scope.send_output("Result", json!(total))
    }

    fn scale(&self, scope: &ExecutionScope) -> anyhow::Result<()> {
        let input = as_scalar(&scope.required_input("Input")?, "Input")?;
        let factor = scope.state().read().get_f64("Factor").unwrap_or(1.0);
        scope.send_output("Output", json!(input * factor))
    }

    fn report(&self, scope: &ExecutionScope) -> anyhow::Result<()> {
        let value = scope.input("Input").unwrap_or(Value::Null);
        tracing::info!("📣 Report '{}' received {}", scope.module_id(), value);
        scope.state().write().set("LastValue", value);
        Ok(())
    }

    async fn delay(&self, scope: &ExecutionScope) -> anyhow::Result<()> {
        let millis = scope
            .state()
            .read()
            .get("Millis")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let step = Duration::from_millis(10);
        let mut waited = Duration::ZERO;
        let total = Duration::from_millis(millis);

        while waited < total {
            scope.checkpoint()?;
            let next = step.min(total - waited);
            tokio::time::sleep(next).await;
            waited += next;
        }
        scope.checkpoint()?;

        if let Some(value) = scope.input("Input") {
            scope.send_output("Output", value)?;
        }
        Ok(())
    }

    fn fail(&self, scope: &ExecutionScope) -> anyhow::Result<()> {
        let state = scope.state();
        let state = state.read();
        let flag = |key: &str| state.get(key).and_then(Value::as_bool).unwrap_or(false);

        if flag("Panic") {
            panic!("module '{}' panicked on request", scope.module_id());
        }
        if flag("Fatal") {
            return Err(Fatal::new(format!("module '{}' failed fatally", scope.module_id())).into());
        }
        anyhow::bail!("module '{}' failed on request", scope.module_id())
    }
}

#[async_trait]
impl Executable for BasicModule {
    async fn execute(&self, scope: &ExecutionScope) -> anyhow::Result<()> {
        match self.kind {
            BasicModuleKind::CreateScalar => self.create_scalar(scope),
            BasicModuleKind::Sum => self.sum(scope),
            BasicModuleKind::Scale => self.scale(scope),
            BasicModuleKind::Report => self.report(scope),
            BasicModuleKind::Delay => self.delay(scope).await,
            BasicModuleKind::Fail => self.fail(scope),
        }
    }
}

fn as_scalar(value: &Value, port: &str) -> anyhow::Result<f64> {
    value
        .as_f64()
        .ok_or_else(|| anyhow::anyhow!("Port '{}' expected a number, got {}", port, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{
        ConnectionDescription, Module, ModuleId, Network, PortAddress, PortId,
    };
    use crate::runtime::context::InterruptSet;
    use crate::runtime::lookup::{ExecutableLookup, NetworkLookup, SandboxLookup};
    use std::sync::Arc;
    use uuid::Uuid;

    fn module(kind: BasicModuleKind) -> Module {
        Module::new(kind.description(), Arc::new(BasicModule::new(kind)))
    }

    fn scope_for(
        network: &Arc<Network>,
        id: &ModuleId,
        lookup: Arc<dyn ExecutableLookup>,
    ) -> ExecutionScope {
        ExecutionScope::new(
            Uuid::new_v4(),
            network.module(id).unwrap().clone(),
            Arc::clone(network),
            lookup,
            InterruptSet::new(),
        )
    }

    #[test]
    fn test_descriptions_have_unique_names() {
        let names: std::collections::HashSet<&str> =
            BasicModuleKind::ALL.iter().map(|k| k.name()).collect();
        assert_eq!(names.len(), BasicModuleKind::ALL.len());
        assert!(BasicModuleKind::Sum.description().input_ports[0].dynamic);
    }

    #[tokio::test]
    async fn test_scale_in_sandbox() {
        let mut network = Network::new();
        let scale = module(BasicModuleKind::Scale);
        scale.state().write().set("Factor", json!(3.0));
        let id = network.add_module(scale).unwrap();
        let network = Arc::new(network);

        let sandbox = Arc::new(
            SandboxLookup::new(Arc::new(NetworkLookup::default()))
                .with_input(PortAddress::new(id.clone(), PortId::named("Input")), json!(2.0)),
        );
        let scope = scope_for(&network, &id, sandbox.clone());
        BasicModule::new(BasicModuleKind::Scale).execute(&scope).await.unwrap();

        assert_eq!(
            sandbox.output(&PortAddress::new(id, PortId::named("Output"))),
            Some(json!(6.0))
        );
    }

    #[tokio::test]
    async fn test_sum_adds_dynamic_inputs() {
        let mut network = Network::new();
        let sum = network.add_module(module(BasicModuleKind::Sum)).unwrap();
        let lookup = Arc::new(NetworkLookup::default());
        for (slot, value) in [1.5, 2.5].into_iter().enumerate() {
            let source = network.add_module(module(BasicModuleKind::CreateScalar)).unwrap();
            network
                .connect(ConnectionDescription::new(
                    PortAddress::new(source.clone(), PortId::named("Scalar")),
                    PortAddress::new(sum.clone(), PortId::new("Values", slot)),
                ))
                .unwrap();
            lookup.store_output(PortAddress::new(source, PortId::named("Scalar")), json!(value));
        }
        let network = Arc::new(network);

        let scope = scope_for(&network, &sum, lookup.clone());
        BasicModule::new(BasicModuleKind::Sum).execute(&scope).await.unwrap();
        assert_eq!(
            lookup.cache().get(&PortAddress::new(sum, PortId::named("Result"))),
            Some(json!(4.0))
        );
    }

    #[tokio::test]
    async fn test_scale_without_input_fails() {
        let mut network = Network::new();
        let id = network.add_module(module(BasicModuleKind::Scale)).unwrap();
        let network = Arc::new(network);

        let scope = scope_for(&network, &id, Arc::new(NetworkLookup::default()));
        let err = BasicModule::new(BasicModuleKind::Scale)
            .execute(&scope)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Input"));
    }

    #[tokio::test]
    async fn test_fail_can_be_fatal() {
        let mut network = Network::new();
        let fail = module(BasicModuleKind::Fail);
        fail.state().write().set("Fatal", json!(true));
        let id = network.add_module(fail).unwrap();
        let network = Arc::new(network);

        let scope = scope_for(&network, &id, Arc::new(NetworkLookup::default()));
        let err = BasicModule::new(BasicModuleKind::Fail)
            .execute(&scope)
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<Fatal>().is_some());
    }

    #[tokio::test]
    async fn test_delay_observes_interrupt() {
        let mut network = Network::new();
        let delay = module(BasicModuleKind::Delay);
        delay.state().write().set("Millis", json!(1_000));
        let id = network.add_module(delay).unwrap();
        let network = Arc::new(network);

        let interrupts = InterruptSet::new();
        interrupts.interrupt(&id);
        let scope = ExecutionScope::new(
            Uuid::new_v4(),
            network.module(&id).unwrap().clone(),
            Arc::clone(&network),
            Arc::new(NetworkLookup::default()),
            interrupts,
        );
        let err = BasicModule::new(BasicModuleKind::Delay)
            .execute(&scope)
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<crate::error::Interrupted>().is_some());
    }
}
