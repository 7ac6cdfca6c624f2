//! Manager façade: lifecycle, enqueueing, and stats.
//!
//! The manager owns the backlog for its whole lifetime and builds the
//! per-run resources (connection pool, worker pool, dispatch loop) on
//! `start`. Lifecycle:
//!
//! ```text
//! Idle --start--> Running --stop / exhaustion--> Stopping --teardown--> Idle
//! ```
//!
//! Start and teardown are serialized by one async mutex that holds the
//! per-run resources, so at most one dispatch loop and one worker pool exist
//! at a time and only one teardown ever runs per period. The dispatch loop
//! stops the manager itself when it finds no queued and no active work; it
//! only ever *tries* that lock, so it can never deadlock with an external
//! `stop` that is waiting for it to exit.
//!
//! # Example
//!
//! ```ignore
//! let manager = Manager::builder(MyWorker::new()).name("crawl").build();
//! manager.start(DispatchConfig::default().with_seeds(seeds)).await?;
//! manager.wait_stopped().await;
//! ```

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use async_trait::async_trait;
use chrono::Local;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::connection::{ConnectionPool, ConnectionSettings};
use crate::dispatch::{DispatchLoop, ExhaustionHandler, LoopSettings, LoopStats};
use crate::error::Result;
use crate::events::{ManagerEvents, TracingEvents};
use crate::pool::{PoolContext, Worker, WorkerPool};
use crate::queue::TaskQueue;
use crate::settings::DispatchConfig;
use crate::task::{Task, TaskSubmitter};

/// Lifecycle state of a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ManagerState {
    Idle = 0,
    Running = 1,
    Stopping = 2,
}

impl ManagerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ManagerState::Running,
            2 => ManagerState::Stopping,
            _ => ManagerState::Idle,
        }
    }
}

/// Atomic cell holding a `ManagerState`.
///
/// Writes are `Release` and reads `Acquire`, so a transition is visible to
/// the dispatch loop and to external callers as soon as it is made.
#[derive(Debug, Default)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(ManagerState::Idle as u8))
    }

    pub fn load(&self) -> ManagerState {
        ManagerState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, state: ManagerState) {
        self.0.store(state as u8, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.load() == ManagerState::Running
    }
}

/// Result of a `start` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new running period began.
    Started,
    /// Already running; the seeds were added to the backlog.
    AlreadyRunning { absorbed: usize },
}

/// Who triggered a teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StopInitiator {
    External,
    Exhausted,
}

/// What a teardown did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StopReport {
    pub initiator: StopInitiator,
    /// Queued tasks dropped from the backlog.
    pub abandoned: usize,
    /// Submitted units cancelled after the grace period ran out.
    pub cancelled: usize,
    /// Whether every slot finished within the grace period.
    pub graceful: bool,
}

/// Point-in-time counters. Individual fields may be stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    pub state: ManagerState,
    pub pending: usize,
    pub active: usize,
    pub queued_in_pool: usize,
    pub scan_interval_ms: u64,
    pub cycles: u64,
    pub interrupts: u64,
}

/// Resources owned by one running period.
struct Run<T: Task> {
    pool: Arc<WorkerPool<T>>,
    connections: Arc<ConnectionPool>,
    dispatcher: Option<JoinHandle<()>>,
    grace: std::time::Duration,
}

/// Lock-free view of the current run for stats and interrupts.
struct RunView<T: Task> {
    pool: Arc<WorkerPool<T>>,
    wake: Arc<Notify>,
    stats: Arc<LoopStats>,
}

impl<T: Task> Clone for RunView<T> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            wake: self.wake.clone(),
            stats: self.stats.clone(),
        }
    }
}

struct Inner<T: Task> {
    queue: Arc<TaskQueue<T>>,
    state: Arc<StateCell>,
    worker: Arc<dyn Worker<T>>,
    events: Arc<dyn ManagerEvents<T>>,
    user_agent: Option<String>,
    run: tokio::sync::Mutex<Option<Run<T>>>,
    view: Mutex<Option<RunView<T>>>,
    stopped: Notify,
}

impl<T: Task> Inner<T> {
    fn view(&self) -> MutexGuard<'_, Option<RunView<T>>> {
        self.view.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn current_view(&self) -> Option<RunView<T>> {
        self.view().clone()
    }

    async fn stop(&self) -> Option<StopReport> {
        let mut run = self.run.lock().await;
        self.teardown(&mut run, StopInitiator::External).await
    }

    /// Stop requested by the dispatch loop. Never waits for the lock.
    async fn stop_exhausted(&self) -> bool {
        let Ok(mut run) = self.run.try_lock() else {
            // Held by an external stop (loop will see Stopping) or by a
            // start absorbing seeds (next cycle sees them).
            return false;
        };
        if !self.state.is_running() {
            return true;
        }

        // Pool first: a worker queues its children before it stops counting
        // as in flight, so an idle pool means the queue read below sees them.
        let pool_busy = run.as_ref().is_some_and(|current| current.pool.in_flight() > 0);
        if pool_busy || !self.queue.is_empty() {
            return false;
        }

        self.teardown(&mut run, StopInitiator::Exhausted).await;
        true
    }

    async fn teardown(&self, slot: &mut Option<Run<T>>, initiator: StopInitiator) -> Option<StopReport> {
        if !self.state.is_running() {
            return None;
        }
        self.state.store(ManagerState::Stopping);

        let Some(mut run) = slot.take() else {
            self.state.store(ManagerState::Idle);
            return None;
        };

        if let Some(dispatcher) = run.dispatcher.take() {
            match initiator {
                StopInitiator::External => {
                    if let Some(view) = self.current_view() {
                        view.wake.notify_one();
                    }
                    if let Err(e) = dispatcher.await {
                        tracing::error!(error = %e, "Dispatch loop ended abnormally");
                    }
                }
                // Called from inside the loop itself; dropping detaches it.
                StopInitiator::Exhausted => drop(dispatcher),
            }
        }

        let abandoned = self.queue.drain();
        for task in &abandoned {
            self.events.task_abandoned(task);
        }

        run.pool.shutdown();
        let graceful = run.pool.await_termination(run.grace).await;
        let mut cancelled = 0;
        if !graceful {
            let pending = run.pool.shutdown_now();
            for unit in &pending {
                self.events.unit_cancelled(unit);
            }
            cancelled = pending.len();
        }

        run.connections.close();
        self.view().take();
        self.state.store(ManagerState::Idle);

        let report = StopReport {
            initiator,
            abandoned: abandoned.len(),
            cancelled,
            graceful,
        };
        self.events.stopped(&report, Local::now());
        self.stopped.notify_waiters();

        Some(report)
    }
}

impl<T: Task> Drop for Inner<T> {
    fn drop(&mut self) {
        if let Some(mut run) = self.run.get_mut().take() {
            if let Some(dispatcher) = run.dispatcher.take() {
                dispatcher.abort();
            }
            run.pool.shutdown_now();
            run.connections.close();
        }
    }
}

/// Stops the manager from inside its dispatch loop.
struct StopOnExhausted<T: Task> {
    inner: Weak<Inner<T>>,
}

#[async_trait]
impl<T: Task> ExhaustionHandler for StopOnExhausted<T> {
    async fn on_exhausted(&self) -> bool {
        match self.inner.upgrade() {
            Some(inner) => inner.stop_exhausted().await,
            None => true,
        }
    }
}

/// Builder for `Manager`.
pub struct ManagerBuilder<T: Task> {
    worker: Arc<dyn Worker<T>>,
    events: Option<Arc<dyn ManagerEvents<T>>>,
    name: String,
    user_agent: Option<String>,
}

impl<T: Task> ManagerBuilder<T> {
    /// Name used to tag the default tracing events.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Replace the default tracing sink.
    pub fn events(mut self, events: Arc<dyn ManagerEvents<T>>) -> Self {
        self.events = Some(events);
        self
    }

    /// User agent for the connection pool.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn build(self) -> Manager<T> {
        let events = self
            .events
            .unwrap_or_else(|| Arc::new(TracingEvents::new(self.name)));

        Manager {
            inner: Arc::new(Inner {
                queue: Arc::new(TaskQueue::new()),
                state: Arc::new(StateCell::new()),
                worker: self.worker,
                events,
                user_agent: self.user_agent,
                run: tokio::sync::Mutex::new(None),
                view: Mutex::new(None),
                stopped: Notify::new(),
            }),
        }
    }
}

/// Throttled dispatcher for a pool of workers.
///
/// Cheap to clone; clones share the same backlog and lifecycle.
pub struct Manager<T: Task> {
    inner: Arc<Inner<T>>,
}

impl<T: Task> Clone for Manager<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Task> Manager<T> {
    /// Create a manager with the default tracing sink.
    pub fn new(worker: impl Worker<T> + 'static) -> Self {
        Self::builder(worker).build()
    }

    pub fn builder(worker: impl Worker<T> + 'static) -> ManagerBuilder<T> {
        Self::builder_from_arc(Arc::new(worker))
    }

    pub fn builder_from_arc(worker: Arc<dyn Worker<T>>) -> ManagerBuilder<T> {
        ManagerBuilder {
            worker,
            events: None,
            name: "crawlr".to_string(),
            user_agent: None,
        }
    }

    /// Begin a running period, or add seeds to the current one.
    ///
    /// Must be called from within a tokio runtime. Settings are validated
    /// only when a new period begins.
    pub async fn start(&self, config: DispatchConfig<T>) -> Result<StartOutcome> {
        let mut run = self.inner.run.lock().await;
        let DispatchConfig {
            settings,
            seed_tasks,
        } = config;
        let seeds = seed_tasks.len();

        if self.inner.state.is_running() {
            self.inner.queue.extend(seed_tasks);
            self.inner.events.seeds_absorbed(seeds);
            return Ok(StartOutcome::AlreadyRunning { absorbed: seeds });
        }

        settings.validate()?;

        let mut connection_settings = ConnectionSettings::from(&settings);
        if let Some(user_agent) = &self.inner.user_agent {
            connection_settings = connection_settings.with_user_agent(user_agent.clone());
        }
        let connections = Arc::new(ConnectionPool::new(&connection_settings)?);

        self.inner.queue.extend(seed_tasks);

        let pool = Arc::new(WorkerPool::new(
            settings.max_workers,
            PoolContext {
                worker: self.inner.worker.clone(),
                connections: connections.clone(),
                submitter: self.inner.queue.clone(),
                events: self.inner.events.clone(),
            },
        ));

        let wake = Arc::new(Notify::new());
        let stats = Arc::new(LoopStats::new(settings.initial_scan_interval_ms));
        let dispatcher = DispatchLoop {
            queue: self.inner.queue.clone(),
            pool: pool.clone(),
            settings: LoopSettings::from(&settings),
            state: self.inner.state.clone(),
            wake: wake.clone(),
            stats: stats.clone(),
            on_exhausted: Arc::new(StopOnExhausted {
                inner: Arc::downgrade(&self.inner),
            }),
            events: self.inner.events.clone(),
        };

        *self.inner.view() = Some(RunView {
            pool: pool.clone(),
            wake,
            stats,
        });
        self.inner.state.store(ManagerState::Running);
        let handle = tokio::spawn(dispatcher.run());

        *run = Some(Run {
            pool,
            connections,
            dispatcher: Some(handle),
            grace: settings.shutdown_grace(),
        });

        self.inner
            .events
            .started(&settings, self.inner.queue.len(), Local::now());
        Ok(StartOutcome::Started)
    }

    /// End the running period.
    ///
    /// Abandons the backlog, gives in-flight work the grace period, cancels
    /// whatever has not started by then, and closes the connection pool.
    /// Returns `None` if the manager was not running. Never fails.
    pub async fn stop(&self) -> Option<StopReport> {
        self.inner.stop().await
    }

    /// Queue a task. Accepted in any state; while idle it waits for the next
    /// `start`.
    pub fn enqueue_task(&self, task: T) {
        self.inner.queue.push(task);
    }

    pub fn enqueue_tasks(&self, tasks: impl IntoIterator<Item = T>) {
        self.inner.queue.extend(tasks);
    }

    /// Narrow handle for workers and producers.
    pub fn submitter(&self) -> Arc<dyn TaskSubmitter<T>> {
        self.inner.queue.clone()
    }

    /// Tasks waiting in the backlog.
    pub fn pending_count(&self) -> usize {
        self.inner.queue.len()
    }

    /// Worker slots currently running a task. Zero while idle.
    pub fn active_worker_count(&self) -> usize {
        self.inner
            .current_view()
            .map(|view| view.pool.active_count())
            .unwrap_or(0)
    }

    pub fn state(&self) -> ManagerState {
        self.inner.state.load()
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.is_running()
    }

    pub fn stats(&self) -> ManagerStats {
        let view = self.inner.current_view();
        ManagerStats {
            state: self.state(),
            pending: self.pending_count(),
            active: view.as_ref().map(|v| v.pool.active_count()).unwrap_or(0),
            queued_in_pool: view.as_ref().map(|v| v.pool.queued_count()).unwrap_or(0),
            scan_interval_ms: view.as_ref().map(|v| v.stats.interval_ms()).unwrap_or(0),
            cycles: view.as_ref().map(|v| v.stats.cycles()).unwrap_or(0),
            interrupts: view.as_ref().map(|v| v.stats.interrupts()).unwrap_or(0),
        }
    }

    /// Wake the dispatch loop from its sleep. The loop logs it and carries on.
    pub fn interrupt(&self) {
        if let Some(view) = self.inner.current_view() {
            view.wake.notify_one();
        }
    }

    /// Resolve once the manager is idle.
    pub async fn wait_stopped(&self) {
        loop {
            let notified = self.inner.stopped.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.inner.state.load() == ManagerState::Idle {
                return;
            }
            notified.await;
        }
    }
}

impl<T: Task> TaskSubmitter<T> for Manager<T> {
    fn submit_task(&self, task: T) {
        self.enqueue_task(task);
    }
}
