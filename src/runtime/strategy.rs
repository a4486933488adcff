//! Execution strategies: how the modules of one group are dispatched
//!
//! Either strategy waits for every module of the group, including failed and panicking
//! ones, before returning. Panics are caught per module and recorded as failures.

use crate::error::{Fatal, Interrupted};
use crate::network::{Module, ModuleId, NetworkHandle};
use crate::runtime::context::{InterruptSet, ModuleOutcome};
use crate::runtime::events::{EventBus, NetworkEvent};
use crate::runtime::lookup::ExecutableLookup;
use crate::runtime::scope::ExecutionScope;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::{
    any::Any,
    collections::{BTreeSet, HashSet},
    fmt,
    panic::AssertUnwindSafe,
    str::FromStr,
    sync::Arc,
};
use tokio::{sync::Semaphore, task::JoinSet};
use uuid::Uuid;

/// Dispatch policy for the modules of one execution group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionStrategy {
    /// One module at a time, in id order
    Serial,
    /// Every module as its own tokio task, optionally bounded
    Parallel { max_concurrency: Option<usize> },
}

impl Default for ExecutionStrategy {
    fn default() -> Self {
        Self::Parallel {
            max_concurrency: None,
        }
    }
}

impl ExecutionStrategy {
    /// Unbounded parallel dispatch
    pub fn parallel() -> Self {
        Self::default()
    }

    /// Parallel dispatch with at most `max` modules running at once
    pub fn bounded(max: usize) -> Self {
        Self::Parallel {
            max_concurrency: Some(max.max(1)),
        }
    }

    pub(crate) async fn run_group(
        &self,
        dispatch: &Arc<Dispatch>,
        modules: Vec<Module>,
    ) -> Vec<Finished> {
        let mut finished = match self {
            Self::Serial => {
                let mut modules = modules;
                modules.sort_by(|a, b| a.id().cmp(b.id()));
                let mut finished = Vec::with_capacity(modules.len());
                for module in modules {
                    finished.push(execute_module(Arc::clone(dispatch), module).await);
                }
                finished
            }
            Self::Parallel { max_concurrency } => {
                run_parallel(dispatch, modules, *max_concurrency).await
            }
        };
        finished.sort_by(|a, b| a.module.cmp(&b.module));
        finished
    }
}

impl fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial => f.write_str("serial"),
            Self::Parallel {
                max_concurrency: None,
            } => f.write_str("parallel"),
            Self::Parallel {
                max_concurrency: Some(max),
            } => write!(f, "parallel({})", max),
        }
    }
}

impl FromStr for ExecutionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "serial" => Ok(Self::Serial),
            "parallel" => Ok(Self::parallel()),
            other => Err(format!("Unknown execution strategy '{}'", other)),
        }
    }
}

/// What happens to modules whose upstream did not complete
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DownstreamFailurePolicy {
    /// Do not run them; record them as skipped
    #[default]
    Skip,
    /// Run them; inputs from the failed modules read as missing
    RunWithMissingInputs,
}

impl FromStr for DownstreamFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "run-with-missing-inputs" | "run_with_missing_inputs" => Ok(Self::RunWithMissingInputs),
            other => Err(format!("Unknown downstream failure policy '{}'", other)),
        }
    }
}

/// Everything a dispatched module needs from its run
pub(crate) struct Dispatch {
    pub run_id: Uuid,
    pub network: NetworkHandle,
    pub lookup: Arc<dyn ExecutableLookup>,
    pub interrupts: InterruptSet,
    pub unavailable: Arc<BTreeSet<ModuleId>>,
    pub events: EventBus,
}

/// Result of dispatching one module
#[derive(Debug, Clone)]
pub(crate) struct Finished {
    pub module: ModuleId,
    pub outcome: ModuleOutcome,
    /// Module asked for the whole run to halt
    pub fatal: bool,
}

async fn run_parallel(
    dispatch: &Arc<Dispatch>,
    modules: Vec<Module>,
    max_concurrency: Option<usize>,
) -> Vec<Finished> {
    let semaphore = max_concurrency.map(|max| Arc::new(Semaphore::new(max.max(1))));
    let expected: Vec<ModuleId> = modules.iter().map(|m| m.id().clone()).collect();
    let mut set = JoinSet::new();

    for module in modules {
        let dispatch = Arc::clone(dispatch);
        let semaphore = semaphore.clone();
        set.spawn(async move {
            let _permit = match semaphore {
                Some(semaphore) => Some(semaphore.acquire_owned().await),
                None => None,
            };
            execute_module(dispatch, module).await
        });
    }

    let mut finished = Vec::with_capacity(expected.len());
    let mut join_error = None;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(result) => finished.push(result),
            Err(e) => {
                tracing::error!("❌ Module task terminated abnormally: {}", e);
                join_error = Some(e.to_string());
            }
        }
    }

    // A task that never reported back still gets an outcome.
    if finished.len() < expected.len() {
        let reported: HashSet<ModuleId> = finished.iter().map(|f| f.module.clone()).collect();
        let error = join_error.unwrap_or_else(|| "module task was lost".to_string());
        for module in expected.into_iter().filter(|m| !reported.contains(m)) {
            finished.push(Finished {
                module,
                outcome: ModuleOutcome::Failed {
                    error: error.clone(),
                },
                fatal: false,
            });
        }
    }

    finished
}

/// Run one module to completion, converting errors and panics into an outcome
async fn execute_module(dispatch: Arc<Dispatch>, module: Module) -> Finished {
    let id = module.id().clone();
    dispatch.events.emit(NetworkEvent::ModuleExecuteBegins {
        run_id: dispatch.run_id,
        module: id.clone(),
    });
    tracing::debug!("▶️ Executing module '{}'", id);
    let start = std::time::Instant::now();

    dispatch.lookup.clear_outputs(&id);
    let executable = module.executable();
    let scope = ExecutionScope::new(
        dispatch.run_id,
        module,
        Arc::clone(&dispatch.network),
        Arc::clone(&dispatch.lookup),
        dispatch.interrupts.clone(),
    )
    .with_unavailable(Arc::clone(&dispatch.unavailable));

    let result = AssertUnwindSafe(executable.execute(&scope))
        .catch_unwind()
        .await;

    let mut fatal = false;
    let outcome = match result {
        Ok(Ok(())) => {
            tracing::debug!(
                "✅ Module '{}' completed in {}ms",
                id,
                start.elapsed().as_millis()
            );
            ModuleOutcome::Completed
        }
        Ok(Err(e)) if e.downcast_ref::<Interrupted>().is_some() => {
            tracing::info!("⏹️ Module '{}' stopped after interrupt", id);
            ModuleOutcome::Interrupted
        }
        Ok(Err(e)) => {
            fatal = e.downcast_ref::<Fatal>().is_some();
            tracing::error!("❌ Module '{}' failed: {:#}", id, e);
            ModuleOutcome::Failed {
                error: format!("{:#}", e),
            }
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::error!("💥 Module '{}' panicked: {}", id, message);
            ModuleOutcome::Failed {
                error: format!("panicked: {}", message),
            }
        }
    };

    dispatch.events.emit(NetworkEvent::ModuleExecuteEnds {
        run_id: dispatch.run_id,
        module: id.clone(),
        outcome: outcome.clone(),
    });

    Finished {
        module: id,
        outcome,
        fatal,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{executable_fn, Module, ModuleDescription, Network, PortDescription};
    use crate::runtime::lookup::NetworkLookup;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn dispatch(network: Network, events: EventBus) -> Arc<Dispatch> {
        Arc::new(Dispatch {
            run_id: Uuid::new_v4(),
            network: Arc::new(network),
            lookup: Arc::new(NetworkLookup::default()),
            interrupts: InterruptSet::new(),
            unavailable: Arc::new(BTreeSet::new()),
            events,
        })
    }

    fn module(
        name: &str,
        f: impl Fn(&ExecutionScope) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Module {
        let desc =
            ModuleDescription::new(name).with_output(PortDescription::output("Out", "Scalar"));
        Module::new(desc, executable_fn(f))
    }

    #[test]
    fn test_parse_strategy_and_policy() {
        assert_eq!("serial".parse::<ExecutionStrategy>(), Ok(ExecutionStrategy::Serial));
        assert_eq!("Parallel".parse::<ExecutionStrategy>(), Ok(ExecutionStrategy::parallel()));
        assert!("random".parse::<ExecutionStrategy>().is_err());
        assert_eq!(
            "run-with-missing-inputs".parse::<DownstreamFailurePolicy>(),
            Ok(DownstreamFailurePolicy::RunWithMissingInputs)
        );
        assert_eq!(ExecutionStrategy::bounded(0).to_string(), "parallel(1)");
    }

    #[tokio::test]
    async fn test_failure_and_panic_do_not_stop_siblings() {
        let ok = module("Ok", |scope| scope.send_output("Out", serde_json::json!(1)));
        let failing = module("Failing", |_| anyhow::bail!("boom"));
        let panicking = module("Panicking", |_| panic!("kaboom"));
        let fatal = module("Fatal", |_| Err(Fatal::new("stop everything").into()));

        let dispatch = dispatch(Network::new(), EventBus::new());
        let finished = ExecutionStrategy::parallel()
            .run_group(
                &dispatch,
                vec![ok.clone(), failing.clone(), panicking.clone(), fatal.clone()],
            )
            .await;

        assert_eq!(finished.len(), 4);
        let by_id = |id: &ModuleId| finished.iter().find(|f| &f.module == id).unwrap().clone();
        assert_eq!(by_id(ok.id()).outcome, ModuleOutcome::Completed);
        assert!(matches!(by_id(failing.id()).outcome, ModuleOutcome::Failed { .. }));
        assert!(!by_id(failing.id()).fatal);
        match by_id(panicking.id()).outcome {
            ModuleOutcome::Failed { error } => assert!(error.contains("kaboom")),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(by_id(fatal.id()).fatal);
    }

    #[tokio::test]
    async fn test_serial_runs_in_id_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let modules: Vec<Module> = (0..4)
            .map(|i| {
                let order = Arc::clone(&order);
                module(&format!("S{}", i), move |scope| {
                    order.lock().push(scope.module_id().clone());
                    Ok(())
                })
            })
            .collect();
        let mut ids: Vec<ModuleId> = modules.iter().map(|m| m.id().clone()).collect();
        ids.sort();

        let mut reversed = modules.clone();
        reversed.reverse();
        ExecutionStrategy::Serial
            .run_group(&dispatch(Network::new(), EventBus::new()), reversed)
            .await;
        assert_eq!(*order.lock(), ids);
    }

    struct Sleepy {
        running: Arc<Mutex<(usize, usize)>>,
    }

    #[async_trait::async_trait]
    impl crate::network::Executable for Sleepy {
        async fn execute(&self, _scope: &ExecutionScope) -> anyhow::Result<()> {
            {
                let mut running = self.running.lock();
                running.0 += 1;
                running.1 = running.1.max(running.0);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.running.lock().0 -= 1;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_bounded_parallelism() {
        let running = Arc::new(Mutex::new((0, 0)));
        let modules: Vec<Module> = (0..6)
            .map(|i| {
                Module::new(
                    ModuleDescription::new(format!("P{}", i)),
                    Arc::new(Sleepy {
                        running: Arc::clone(&running),
                    }),
                )
            })
            .collect();

        let finished = ExecutionStrategy::bounded(2)
            .run_group(&dispatch(Network::new(), EventBus::new()), modules)
            .await;
        assert_eq!(finished.len(), 6);
        assert!(running.lock().1 <= 2);
    }

    #[tokio::test]
    async fn test_emits_begin_and_end_per_module() {
        let events = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        events.subscribe(move |event| match event {
            NetworkEvent::ModuleExecuteBegins { .. } => sink.lock().push("begin"),
            NetworkEvent::ModuleExecuteEnds { .. } => sink.lock().push("end"),
            _ => {}
        });

        let m = module("Ok", |_| Ok(()));
        ExecutionStrategy::Serial
            .run_group(&dispatch(Network::new(), events), vec![m])
            .await;
        assert_eq!(*seen.lock(), vec!["begin", "end"]);
    }
}
