//! Execution Context
//!
//! One-shot run of a network snapshot: schedule, then walk the groups in order and hand
//! each group to the execution strategy. The run always ends with a `RunReport` and exactly
//! one `ExecutionFinished` notification.

use crate::network::{ModuleId, NetworkHandle};
use crate::runtime::events::{EventBus, NetworkEvent};
use crate::runtime::filter::ModuleFilter;
use crate::runtime::lookup::ExecutableLookup;
use crate::runtime::scheduler::Scheduler;
use crate::runtime::strategy::{DownstreamFailurePolicy, Dispatch, ExecutionStrategy};
use chrono::{DateTime, Utc};
use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Modules flagged for interruption
///
/// A flag is consumed by whoever observes it first: dispatch (the module is not run) or the
/// module's own `checkpoint()`.
#[derive(Debug, Clone, Default)]
pub struct InterruptSet {
    flags: Arc<DashSet<ModuleId>>,
}

impl InterruptSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self, module: &ModuleId) {
        tracing::info!("⏹️ Interrupt requested for module '{}'", module);
        self.flags.insert(module.clone());
    }

    /// Consume the flag for `module`, returning whether it was set
    pub fn take(&self, module: &ModuleId) -> bool {
        self.flags.remove(module).is_some()
    }

    pub fn is_interrupted(&self, module: &ModuleId) -> bool {
        self.flags.contains(module)
    }

    pub fn clear(&self) {
        self.flags.clear();
    }
}

/// How one module fared in a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ModuleOutcome {
    Completed,
    /// Returned an error or panicked
    Failed { error: String },
    /// Not run because an upstream module did not complete
    Skipped,
    /// Stopped by an interrupt, before or during execution
    Interrupted,
}

impl ModuleOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Aggregate result of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    FinishedWithErrors,
    ScheduleFailed,
    Cancelled,
    Aborted,
}

/// Everything known about a finished run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub outcomes: BTreeMap<ModuleId, ModuleOutcome>,
    /// Scheduling error message when status is `ScheduleFailed`
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// Numeric completion code
    ///
    /// `0` success, `n > 0` number of failed modules, `-1` schedule failure, `-2`
    /// cancelled, `-3` aborted.
    pub fn code(&self) -> i32 {
        match self.status {
            RunStatus::Success => 0,
            RunStatus::FinishedWithErrors => {
                i32::try_from(self.failed_modules().len()).unwrap_or(i32::MAX)
            }
            RunStatus::ScheduleFailed => -1,
            RunStatus::Cancelled => -2,
            RunStatus::Aborted => -3,
        }
    }

    pub fn outcome(&self, module: &ModuleId) -> Option<&ModuleOutcome> {
        self.outcomes.get(module)
    }

    pub fn failed_modules(&self) -> Vec<&ModuleId> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| outcome.is_failed())
            .map(|(id, _)| id)
            .collect()
    }

    /// Modules whose `execute()` was entered
    pub fn executed_count(&self) -> usize {
        self.outcomes
            .values()
            .filter(|o| matches!(o, ModuleOutcome::Completed | ModuleOutcome::Failed { .. }))
            .count()
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// A single requested run
pub struct ExecutionContext {
    run_id: Uuid,
    network: NetworkHandle,
    lookup: Arc<dyn ExecutableLookup>,
    filter: ModuleFilter,
    interrupts: InterruptSet,
    failure_policy: DownstreamFailurePolicy,
}

impl ExecutionContext {
    pub fn new(
        network: NetworkHandle,
        lookup: Arc<dyn ExecutableLookup>,
        filter: ModuleFilter,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            network,
            lookup,
            filter,
            interrupts: InterruptSet::new(),
            failure_policy: DownstreamFailurePolicy::default(),
        }
    }

    pub fn with_interrupts(mut self, interrupts: InterruptSet) -> Self {
        self.interrupts = interrupts;
        self
    }

    pub fn with_failure_policy(mut self, policy: DownstreamFailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn network(&self) -> &NetworkHandle {
        &self.network
    }

    /// Execute the run to completion
    ///
    /// `cancel` is checked before every group: once cancelled, the group in flight drains
    /// and no later group starts.
    pub async fn run(
        self,
        strategy: &ExecutionStrategy,
        cancel: &CancellationToken,
        events: &EventBus,
    ) -> RunReport {
        let started_at = Utc::now();
        tracing::info!(
            "🚀 Starting run {} with {} strategy over {} module(s)",
            self.run_id,
            strategy,
            self.network.nmodules()
        );
        events.emit(NetworkEvent::ExecutionStarted {
            run_id: self.run_id,
        });

        let order = match Scheduler::schedule(&self.network, &self.filter) {
            Ok(order) => order,
            Err(e) => {
                tracing::error!("❌ Run {} could not be scheduled: {}", self.run_id, e);
                return self.finish(
                    RunStatus::ScheduleFailed,
                    BTreeMap::new(),
                    Some(e.to_string()),
                    started_at,
                    events,
                );
            }
        };

        let mut outcomes = BTreeMap::new();
        let mut unavailable: BTreeSet<ModuleId> = BTreeSet::new();
        let mut halted = None;

        for (group, members) in order.groups() {
            if cancel.is_cancelled() {
                tracing::warn!("🛑 Run {} cancelled before group {}", self.run_id, group);
                events.emit(NetworkEvent::ExecutionInterrupted {
                    run_id: self.run_id,
                });
                halted = Some(RunStatus::Cancelled);
                break;
            }

            let mut runnable = Vec::with_capacity(members.len());
            for id in members {
                let Some(module) = self.network.module(id) else {
                    continue;
                };
                if self.interrupts.take(id) {
                    tracing::info!("⏭️ Module '{}' interrupted before dispatch", id);
                    outcomes.insert(id.clone(), ModuleOutcome::Interrupted);
                    unavailable.insert(id.clone());
                    continue;
                }
                if self.failure_policy == DownstreamFailurePolicy::Skip
                    && self
                        .network
                        .upstream_modules(id)
                        .iter()
                        .any(|up| unavailable.contains(up))
                {
                    tracing::warn!("⏭️ Skipping module '{}': upstream did not complete", id);
                    outcomes.insert(id.clone(), ModuleOutcome::Skipped);
                    unavailable.insert(id.clone());
                    continue;
                }
                runnable.push(module.clone());
            }

            if runnable.is_empty() {
                continue;
            }

            tracing::debug!(
                "🧩 Dispatching group {} with {} module(s)",
                group,
                runnable.len()
            );
            let dispatch = Arc::new(Dispatch {
                run_id: self.run_id,
                network: Arc::clone(&self.network),
                lookup: Arc::clone(&self.lookup),
                interrupts: self.interrupts.clone(),
                unavailable: Arc::new(unavailable.clone()),
                events: events.clone(),
            });

            let mut fatal = false;
            for finished in strategy.run_group(&dispatch, runnable).await {
                if !finished.outcome.is_completed() {
                    unavailable.insert(finished.module.clone());
                }
                fatal |= finished.fatal;
                outcomes.insert(finished.module, finished.outcome);
            }

            if fatal {
                tracing::error!(
                    "🛑 Run {} aborted by a fatal module error in group {}",
                    self.run_id,
                    group
                );
                halted = Some(RunStatus::Aborted);
                break;
            }
        }

        let status = halted.unwrap_or_else(|| {
            if outcomes.values().any(ModuleOutcome::is_failed) {
                RunStatus::FinishedWithErrors
            } else {
                RunStatus::Success
            }
        });
        self.finish(status, outcomes, None, started_at, events)
    }

    /// Finish a run that never started, e.g. still queued when the manager stopped
    pub fn cancel(self, events: &EventBus) -> RunReport {
        tracing::info!("🛑 Run {} cancelled before it started", self.run_id);
        events.emit(NetworkEvent::ExecutionInterrupted {
            run_id: self.run_id,
        });
        let now = Utc::now();
        self.finish(RunStatus::Cancelled, BTreeMap::new(), None, now, events)
    }

    /// Drop flags nobody observed so they cannot leak into a later run
    fn discard_interrupts(&self) {
        for id in self.network.module_ids().filter(|id| self.filter.accepts(id)) {
            if self.interrupts.take(id) {
                tracing::debug!("🧹 Discarded unobserved interrupt for module '{}'", id);
            }
        }
    }

    fn finish(
        self,
        status: RunStatus,
        outcomes: BTreeMap<ModuleId, ModuleOutcome>,
        error: Option<String>,
        started_at: DateTime<Utc>,
        events: &EventBus,
    ) -> RunReport {
        let report = RunReport {
            run_id: self.run_id,
            status,
            outcomes,
            error,
            started_at,
            finished_at: Utc::now(),
        };
        let code = report.code();
        self.discard_interrupts();

        match status {
            RunStatus::Success => tracing::info!(
                "✅ Run {} finished successfully in {}ms",
                report.run_id,
                report.duration().num_milliseconds()
            ),
            _ => tracing::warn!(
                "⚠️ Run {} finished with status {:?} (code {})",
                report.run_id,
                status,
                code
            ),
        }

        events.emit(NetworkEvent::ExecutionFinished {
            run_id: report.run_id,
            status,
            code,
        });
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Fatal;
    use crate::network::{
        executable_fn, ConnectionDescription, Module, ModuleDescription, Network, PortAddress,
        PortDescription, PortId,
    };
    use crate::runtime::lookup::NetworkLookup;
    use crate::testing::link;
    use parking_lot::Mutex;
    use serde_json::json;

    fn node(
        network: &mut Network,
        name: &str,
        f: impl Fn(&crate::runtime::scope::ExecutionScope) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
    ) -> ModuleId {
        let desc = ModuleDescription::new(name)
            .with_input(PortDescription::dynamic_input("In", "Scalar"))
            .with_output(PortDescription::output("Out", "Scalar"));
        network
            .add_module(Module::new(desc, executable_fn(f)))
            .unwrap()
    }

    fn context(network: Network) -> ExecutionContext {
        ExecutionContext::new(
            Arc::new(network),
            Arc::new(NetworkLookup::default()),
            ModuleFilter::all(),
        )
    }

    fn finished_codes(events: &EventBus) -> Arc<Mutex<Vec<i32>>> {
        let codes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&codes);
        events.on_execution_finished(move |_, _, code| sink.lock().push(code));
        codes
    }

    #[tokio::test]
    async fn test_values_flow_between_groups() {
        let mut network = Network::new();
        let a = node(&mut network, "A", |s| s.send_output("Out", json!(2.0)));
        let b = node(&mut network, "B", |s| {
            let v = s.required_input("In")?.as_f64().unwrap_or_default();
            s.send_output("Out", json!(v * 10.0))
        });
        link(&mut network, &a, &b);

        let cache = crate::runtime::lookup::OutputCache::new();
        let ctx = ExecutionContext::new(
            Arc::new(network),
            Arc::new(NetworkLookup::new(cache.clone())),
            ModuleFilter::all(),
        );
        let report = ctx
            .run(&ExecutionStrategy::parallel(), &CancellationToken::new(), &EventBus::new())
            .await;

        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(report.code(), 0);
        assert_eq!(
            cache.get(&PortAddress::new(b, PortId::named("Out"))),
            Some(json!(20.0))
        );
    }

    #[tokio::test]
    async fn test_cycle_runs_nothing() {
        let mut network = Network::new();
        let ran = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&ran);
        let a = node(&mut network, "A", move |_| {
            *counter.lock() += 1;
            Ok(())
        });
        let b = node(&mut network, "B", |_| Ok(()));
        link(&mut network, &a, &b);
        link(&mut network, &b, &a);

        let events = EventBus::new();
        let codes = finished_codes(&events);
        let report = context(network)
            .run(&ExecutionStrategy::Serial, &CancellationToken::new(), &events)
            .await;

        assert_eq!(report.status, RunStatus::ScheduleFailed);
        assert_eq!(report.code(), -1);
        assert!(report.error.is_some());
        assert_eq!(*ran.lock(), 0);
        assert_eq!(*codes.lock(), vec![-1]);
    }

    #[tokio::test]
    async fn test_failure_is_isolated_and_downstream_skipped() {
        let mut network = Network::new();
        let root = node(&mut network, "Root", |s| s.send_output("Out", json!(1)));
        let good = node(&mut network, "Good", |_| Ok(()));
        let bad = node(&mut network, "Bad", |_| anyhow::bail!("bad input"));
        let after_bad = node(&mut network, "AfterBad", |_| Ok(()));
        link(&mut network, &root, &good);
        link(&mut network, &root, &bad);
        link(&mut network, &bad, &after_bad);

        let events = EventBus::new();
        let codes = finished_codes(&events);
        let report = context(network)
            .run(&ExecutionStrategy::parallel(), &CancellationToken::new(), &events)
            .await;

        assert_eq!(report.status, RunStatus::FinishedWithErrors);
        assert_eq!(report.outcome(&root), Some(&ModuleOutcome::Completed));
        assert_eq!(report.outcome(&good), Some(&ModuleOutcome::Completed));
        assert!(report.outcome(&bad).unwrap().is_failed());
        assert_eq!(report.outcome(&after_bad), Some(&ModuleOutcome::Skipped));
        assert_eq!(report.code(), 1);
        assert_eq!(*codes.lock(), vec![1]);
    }

    #[tokio::test]
    async fn test_run_with_missing_inputs_policy() {
        let mut network = Network::new();
        let bad = node(&mut network, "Bad", |_| anyhow::bail!("no data"));
        let saw_missing = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&saw_missing);
        let after = node(&mut network, "After", move |s| {
            *sink.lock() = Some(s.is_input_missing("In"));
            Ok(())
        });
        link(&mut network, &bad, &after);

        let report = context(network)
            .with_failure_policy(DownstreamFailurePolicy::RunWithMissingInputs)
            .run(&ExecutionStrategy::Serial, &CancellationToken::new(), &EventBus::new())
            .await;

        assert_eq!(report.outcome(&after), Some(&ModuleOutcome::Completed));
        assert_eq!(*saw_missing.lock(), Some(true));
    }

    #[tokio::test]
    async fn test_fatal_error_aborts_after_group() {
        let mut network = Network::new();
        let fatal = node(&mut network, "Fatal", |_| Err(Fatal::new("halt").into()));
        let sibling = node(&mut network, "Sibling", |_| Ok(()));
        let later = node(&mut network, "Later", |_| Ok(()));
        link(&mut network, &sibling, &later);

        let report = context(network)
            .run(&ExecutionStrategy::parallel(), &CancellationToken::new(), &EventBus::new())
            .await;

        assert_eq!(report.status, RunStatus::Aborted);
        assert_eq!(report.code(), -3);
        assert!(report.outcome(&fatal).unwrap().is_failed());
        assert_eq!(report.outcome(&sibling), Some(&ModuleOutcome::Completed));
        assert_eq!(report.outcome(&later), None);
    }

    #[tokio::test]
    async fn test_interrupted_module_is_not_run() {
        let mut network = Network::new();
        let ran = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&ran);
        let a = node(&mut network, "A", move |_| {
            *flag.lock() = true;
            Ok(())
        });

        let interrupts = InterruptSet::new();
        interrupts.interrupt(&a);
        let report = context(network)
            .with_interrupts(interrupts.clone())
            .run(&ExecutionStrategy::Serial, &CancellationToken::new(), &EventBus::new())
            .await;

        assert_eq!(report.outcome(&a), Some(&ModuleOutcome::Interrupted));
        assert_eq!(report.status, RunStatus::Success);
        assert!(!*ran.lock());
        assert!(!interrupts.is_interrupted(&a));
    }

    #[tokio::test]
    async fn test_unobserved_interrupt_does_not_outlive_its_run() {
        let mut network = Network::new();
        let a = node(&mut network, "A", |_| Ok(()));
        let network = Arc::new(network);
        let interrupts = InterruptSet::new();

        let lookup: Arc<dyn ExecutableLookup> = Arc::new(NetworkLookup::default());
        let observer = interrupts.clone();
        let target = a.clone();
        let events = EventBus::new();
        // Flag arrives while the module runs; it finishes without a checkpoint.
        events.subscribe(move |event| {
            if let NetworkEvent::ModuleExecuteBegins { module, .. } = event {
                if module == &target {
                    observer.interrupt(&target);
                }
            }
        });

        let first = ExecutionContext::new(
            Arc::clone(&network),
            Arc::clone(&lookup),
            ModuleFilter::all(),
        )
        .with_interrupts(interrupts.clone())
        .run(&ExecutionStrategy::Serial, &CancellationToken::new(), &events)
        .await;
        assert_eq!(first.outcome(&a), Some(&ModuleOutcome::Completed));
        assert!(!interrupts.is_interrupted(&a));

        let second = ExecutionContext::new(network, lookup, ModuleFilter::all())
            .with_interrupts(interrupts)
            .run(&ExecutionStrategy::Serial, &CancellationToken::new(), &EventBus::new())
            .await;
        assert_eq!(second.outcome(&a), Some(&ModuleOutcome::Completed));
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_before_first_group() {
        let mut network = Network::new();
        let a = node(&mut network, "A", |_| Ok(()));
        let token = CancellationToken::new();
        token.cancel();

        let interrupted = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&interrupted);
        let events = EventBus::new();
        events.subscribe(move |e| {
            if matches!(e, NetworkEvent::ExecutionInterrupted { .. }) {
                *sink.lock() += 1;
            }
        });

        let report = context(network)
            .run(&ExecutionStrategy::Serial, &token, &events)
            .await;
        assert_eq!(report.status, RunStatus::Cancelled);
        assert_eq!(report.code(), -2);
        assert_eq!(report.outcome(&a), None);
        assert_eq!(*interrupted.lock(), 1);
    }

    #[tokio::test]
    async fn test_filter_limits_run() {
        let mut network = Network::new();
        let a = node(&mut network, "A", |_| Ok(()));
        let b = node(&mut network, "B", |_| Ok(()));
        let c = node(&mut network, "C", |_| Ok(()));
        network
            .connect(ConnectionDescription::new(
                PortAddress::new(a.clone(), PortId::named("Out")),
                PortAddress::new(b.clone(), PortId::named("In")),
            ))
            .unwrap();

        let network = Arc::new(network);
        let filter = ModuleFilter::upstream_of(&network, &b);
        let report = ExecutionContext::new(network, Arc::new(NetworkLookup::default()), filter)
            .run(&ExecutionStrategy::Serial, &CancellationToken::new(), &EventBus::new())
            .await;

        assert_eq!(report.executed_count(), 2);
        assert_eq!(report.outcome(&c), None);
    }
}
