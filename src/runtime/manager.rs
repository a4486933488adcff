//! Execution Manager
//!
//! Sequences execution contexts through a bounded queue drained by one background worker.
//! The dispatch strategy lives behind an `ArcSwap` and is read once per context, so a swap
//! applies from the next context taken off the queue.

use crate::error::EnqueueError;
use crate::runtime::context::{ExecutionContext, RunReport};
use crate::runtime::events::EventBus;
use crate::runtime::strategy::ExecutionStrategy;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::{
    runtime::Handle,
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Queued run plus the channel its report goes back on
struct Job {
    context: ExecutionContext,
    reply: oneshot::Sender<RunReport>,
}

/// Caller's handle to an enqueued run
#[derive(Debug)]
pub struct RunHandle {
    run_id: Uuid,
    receiver: oneshot::Receiver<RunReport>,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Wait for the run's report
    ///
    /// Fails only if the worker went away without reporting, which `stop()` never does.
    pub async fn wait(self) -> Result<RunReport, EnqueueError> {
        self.receiver.await.map_err(|_| EnqueueError::Stopped)
    }
}

/// Owns the execution queue and its worker task
pub struct ExecutionManager {
    strategy: Arc<ArcSwap<ExecutionStrategy>>,
    events: EventBus,
    capacity: usize,
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
    stopped: AtomicBool,
}

impl ExecutionManager {
    pub fn new(strategy: ExecutionStrategy, capacity: usize, events: EventBus) -> Self {
        Self {
            strategy: Arc::new(ArcSwap::from_pointee(strategy)),
            events,
            capacity: capacity.max(1),
            sender: Mutex::new(None),
            worker: Mutex::new(None),
            shutdown: CancellationToken::new(),
            stopped: AtomicBool::new(false),
        }
    }

    /// Spawn the background worker; calling it again while running is a no-op
    ///
    /// Fails with `NoRuntime` when called outside a tokio runtime.
    pub fn start(&self) -> Result<(), EnqueueError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(EnqueueError::Stopped);
        }
        let mut sender = self.sender.lock();
        if sender.is_some() {
            return Ok(());
        }
        let runtime = Handle::try_current().map_err(|_| EnqueueError::NoRuntime)?;

        let (tx, rx) = mpsc::channel(self.capacity);
        let handle = runtime.spawn(worker_loop(
            rx,
            Arc::clone(&self.strategy),
            self.events.clone(),
            self.shutdown.clone(),
        ));
        *sender = Some(tx);
        *self.worker.lock() = Some(handle);

        tracing::info!(
            "⚙️ Execution manager started (queue capacity {}, strategy {})",
            self.capacity,
            self.execution_strategy()
        );
        Ok(())
    }

    /// Queue a context for execution
    pub fn enqueue_context(&self, context: ExecutionContext) -> Result<RunHandle, EnqueueError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(EnqueueError::Stopped);
        }
        let sender = self.sender.lock();
        let sender = sender.as_ref().ok_or(EnqueueError::NotRunning)?;

        let run_id = context.run_id();
        let (reply, receiver) = oneshot::channel();
        sender
            .try_send(Job { context, reply })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => EnqueueError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => EnqueueError::Stopped,
            })?;

        tracing::debug!("📥 Enqueued run {}", run_id);
        Ok(RunHandle { run_id, receiver })
    }

    /// Swap the dispatch policy used by subsequent contexts
    pub fn set_execution_strategy(&self, strategy: ExecutionStrategy) {
        tracing::info!("🔀 Execution strategy set to {}", strategy);
        self.strategy.store(Arc::new(strategy));
    }

    pub fn execution_strategy(&self) -> ExecutionStrategy {
        **self.strategy.load()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn is_running(&self) -> bool {
        self.sender.lock().is_some() && !self.stopped.load(Ordering::SeqCst)
    }

    /// Stop the worker
    ///
    /// The running context finishes its current group and reports `Cancelled`; queued
    /// contexts are reported `Cancelled` without running. Returns once the worker is gone.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("⏹️ Stopping execution manager");
        self.shutdown.cancel();
        self.sender.lock().take();

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::error!("❌ Execution worker ended abnormally: {}", e);
            }
        }
        tracing::info!("✅ Execution manager stopped");
    }
}

impl Drop for ExecutionManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn worker_loop(
    mut rx: mpsc::Receiver<Job>,
    strategy: Arc<ArcSwap<ExecutionStrategy>>,
    events: EventBus,
    shutdown: CancellationToken,
) {
    tracing::debug!("🔄 Execution worker running");
    loop {
        let job = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            job = rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let strategy = **strategy.load();
        let report = job.context.run(&strategy, &shutdown, &events).await;
        // Receiver may have been dropped; the report is still logged by the context.
        let _ = job.reply.send(report);
    }

    rx.close();
    let mut drained = 0;
    while let Ok(job) = rx.try_recv() {
        let report = job.context.cancel(&events);
        let _ = job.reply.send(report);
        drained += 1;
    }
    tracing::debug!("🔄 Execution worker exited, {} queued run(s) cancelled", drained);
}
