//! Module filters selecting which modules take part in an analysis or run

use crate::network::{ModuleId, Network};
use std::{collections::BTreeSet, fmt, sync::Arc};

/// Predicate over module ids
///
/// Cheap to clone; used by the analyzer, the scheduler and execution contexts to
/// implement "execute all" versus "execute one module and what it depends on".
#[derive(Clone)]
pub struct ModuleFilter {
    predicate: Arc<dyn Fn(&ModuleId) -> bool + Send + Sync>,
}

impl ModuleFilter {
    /// Every module participates
    pub fn all() -> Self {
        Self::custom(|_| true)
    }

    /// Only the listed modules participate
    pub fn only(modules: impl IntoIterator<Item = ModuleId>) -> Self {
        let set: BTreeSet<ModuleId> = modules.into_iter().collect();
        Self::custom(move |id| set.contains(id))
    }

    /// `module` plus everything it transitively depends on
    pub fn upstream_of(network: &Network, module: &ModuleId) -> Self {
        let mut set = network.ancestors(module);
        set.insert(module.clone());
        Self::only(set)
    }

    /// `module` plus everything depending on it
    pub fn downstream_of(network: &Network, module: &ModuleId) -> Self {
        let mut set = network.descendants(module);
        set.insert(module.clone());
        Self::only(set)
    }

    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&ModuleId) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
        }
    }

    pub fn accepts(&self, module: &ModuleId) -> bool {
        (self.predicate)(module)
    }
}

impl Default for ModuleFilter {
    fn default() -> Self {
        Self::all()
    }
}

impl fmt::Debug for ModuleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ModuleFilter")
    }
}
