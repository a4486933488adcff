//! Module factory: module name → constructor registry

use crate::error::NetworkError;
use crate::modules::basic::{BasicModule, BasicModuleKind};
use crate::network::{Executable, Module, ModuleDescription};
use std::{collections::BTreeMap, fmt, sync::Arc};

/// Builds the executable for a new module instance
pub type ExecutableConstructor = Arc<dyn Fn() -> Arc<dyn Executable> + Send + Sync>;

struct Registration {
    description: ModuleDescription,
    constructor: ExecutableConstructor,
}

/// Registry the controller uses to instantiate modules by name
#[derive(Default)]
pub struct ModuleFactory {
    registrations: BTreeMap<String, Registration>,
}

impl ModuleFactory {
    /// Empty factory
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory with every built-in kind registered
    pub fn with_basic_modules() -> Self {
        let mut factory = Self::new();
        for kind in BasicModuleKind::ALL {
            factory.register(kind.description(), move || -> Arc<dyn Executable> {
                Arc::new(BasicModule::new(kind))
            });
        }
        factory
    }

    /// Register a module kind; a later registration under the same name replaces it
    pub fn register<F>(&mut self, description: ModuleDescription, constructor: F)
    where
        F: Fn() -> Arc<dyn Executable> + Send + Sync + 'static,
    {
        tracing::debug!("🧱 Registered module type '{}'", description.name);
        self.registrations.insert(
            description.name.clone(),
            Registration {
                description,
                constructor: Arc::new(constructor),
            },
        );
    }

    /// Instantiate a module with a fresh id
    pub fn create(&self, name: &str) -> Result<Module, NetworkError> {
        let registration = self
            .registrations
            .get(name)
            .ok_or_else(|| NetworkError::UnknownModuleType(name.to_string()))?;
        Ok(Module::new(
            registration.description.clone(),
            (registration.constructor)(),
        ))
    }

    pub fn description(&self, name: &str) -> Option<&ModuleDescription> {
        self.registrations.get(name).map(|r| &r.description)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.registrations.contains_key(name)
    }

    /// Registered names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.registrations.keys().map(String::as_str)
    }
}

impl fmt::Debug for ModuleFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
