//! The dispatch control task.
//!
//! One `DispatchLoop` exists per running period. Each cycle it reads the
//! backlog depth and the active slot count, releases a batch to the worker
//! pool, adapts its scan interval, and sleeps. When it sees an empty
//! backlog with no active slots it asks its exhaustion handler to stop the
//! manager and exits once that succeeds.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::dispatch::plan::{self, CycleDecision};
use crate::events::ManagerEvents;
use crate::manager::StateCell;
use crate::pool::{Rejected, WorkerPool};
use crate::queue::TaskQueue;
use crate::settings::DispatchSettings;
use crate::task::Task;

/// Called when a cycle finds no queued and no active work.
#[async_trait]
pub trait ExhaustionHandler: Send + Sync {
    /// Attempt the terminal stop. `true` means the loop must exit.
    async fn on_exhausted(&self) -> bool;
}

/// Snapshot of the settings the loop reads.
#[derive(Debug, Clone, Copy)]
pub struct LoopSettings {
    pub max_workers: usize,
    pub queue_capacity_hint: usize,
    pub initial_scan_interval_ms: u64,
}

impl From<&DispatchSettings> for LoopSettings {
    fn from(settings: &DispatchSettings) -> Self {
        Self {
            max_workers: settings.max_workers,
            queue_capacity_hint: settings.queue_capacity_hint,
            initial_scan_interval_ms: settings.initial_scan_interval_ms,
        }
    }
}

/// Counters published by a running loop.
#[derive(Debug, Default)]
pub struct LoopStats {
    interval_ms: AtomicU64,
    cycles: AtomicU64,
    interrupts: AtomicU64,
}

impl LoopStats {
    pub fn new(initial_interval_ms: u64) -> Self {
        Self {
            interval_ms: AtomicU64::new(initial_interval_ms),
            ..Default::default()
        }
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms.load(Ordering::Relaxed)
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn interrupts(&self) -> u64 {
        self.interrupts.load(Ordering::Relaxed)
    }
}

/// What one cycle observed and did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub tasks: usize,
    pub working: usize,
    pub jobs: usize,
    pub dispatched: usize,
    pub interval_before_ms: u64,
    pub interval_after_ms: u64,
}

/// Result of a single cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cycle {
    Exhausted,
    Continue(CycleReport),
}

/// Dependencies injected into the loop.
pub struct DispatchLoop<T: Task> {
    pub queue: Arc<TaskQueue<T>>,
    pub pool: Arc<WorkerPool<T>>,
    pub settings: LoopSettings,
    pub state: Arc<StateCell>,
    pub wake: Arc<Notify>,
    pub stats: Arc<LoopStats>,
    pub on_exhausted: Arc<dyn ExhaustionHandler>,
    pub events: Arc<dyn ManagerEvents<T>>,
}

impl<T: Task> DispatchLoop<T> {
    /// Run cycles until the manager leaves the running state.
    pub async fn run(self) {
        let mut interval_ms = self.settings.initial_scan_interval_ms;

        while self.state.is_running() {
            match self.cycle(interval_ms) {
                Cycle::Exhausted => {
                    if self.on_exhausted.on_exhausted().await {
                        tracing::debug!("Dispatch loop exiting after exhaustion stop");
                        return;
                    }
                    interval_ms = plan::next_interval(interval_ms, 0, 0, self.settings.max_workers);
                }
                Cycle::Continue(report) => {
                    self.events.cycle(&report);
                    interval_ms = report.interval_after_ms;
                }
            }

            self.stats.interval_ms.store(interval_ms, Ordering::Relaxed);
            self.sleep(interval_ms).await;
        }

        tracing::debug!("Dispatch loop exiting, manager no longer running");
    }

    /// Read, decide, submit. Does not sleep.
    pub fn cycle(&self, interval_ms: u64) -> Cycle {
        self.stats.cycles.fetch_add(1, Ordering::Relaxed);

        let tasks = self.queue.len();
        let working = self.pool.active_count();

        let jobs = match plan::decide(
            tasks,
            working,
            self.settings.max_workers,
            self.settings.queue_capacity_hint,
            self.settings.initial_scan_interval_ms,
        ) {
            CycleDecision::Exhausted => return Cycle::Exhausted,
            CycleDecision::Wait => 0,
            CycleDecision::Dispatch(jobs) => jobs,
        };

        let dispatched = self.release(jobs);
        let interval_after_ms =
            plan::next_interval(interval_ms, tasks, working, self.settings.max_workers);

        Cycle::Continue(CycleReport {
            tasks,
            working,
            jobs,
            dispatched,
            interval_before_ms: interval_ms,
            interval_after_ms,
        })
    }

    /// Move up to `jobs` tasks from the backlog into the pool.
    fn release(&self, jobs: usize) -> usize {
        let mut dispatched = 0;
        for _ in 0..jobs {
            let Some(task) = self.queue.pop() else {
                break;
            };
            match self.pool.submit(task) {
                Ok(_) => dispatched += 1,
                Err(Rejected(task)) => {
                    // Pool is shutting down; keep the task for the next run
                    self.queue.push(task);
                    break;
                }
            }
        }
        dispatched
    }

    async fn sleep(&self, interval_ms: u64) {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(interval_ms)) => {}
            _ = self.wake.notified() => {
                if self.state.is_running() {
                    self.stats.interrupts.fetch_add(1, Ordering::Relaxed);
                    self.events.sleep_interrupted();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionPool, ConnectionSettings};
    use crate::error::Result;
    use crate::events::NoopEvents;
    use crate::manager::ManagerState;
    use crate::pool::{PoolContext, Worker};
    use crate::task::TaskSubmitter;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Semaphore;

    struct GatedWorker {
        gate: Arc<Semaphore>,
        done: AtomicUsize,
    }

    #[async_trait]
    impl Worker<u32> for GatedWorker {
        async fn process(
            &self,
            _connections: Arc<ConnectionPool>,
            _task: u32,
            _submitter: Arc<dyn TaskSubmitter<u32>>,
        ) -> Result<()> {
            let _permit = self.gate.acquire().await;
            self.done.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct CountingHandler {
        calls: AtomicUsize,
        exit: bool,
    }

    #[async_trait]
    impl ExhaustionHandler for CountingHandler {
        async fn on_exhausted(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.exit
        }
    }

    struct Fixture {
        dispatcher: DispatchLoop<u32>,
        gate: Arc<Semaphore>,
        worker: Arc<GatedWorker>,
        handler: Arc<CountingHandler>,
    }

    fn fixture(settings: LoopSettings, open_gate: bool) -> Fixture {
        let gate = Arc::new(Semaphore::new(if open_gate { Semaphore::MAX_PERMITS } else { 0 }));
        let worker = Arc::new(GatedWorker {
            gate: gate.clone(),
            done: AtomicUsize::new(0),
        });
        let queue = Arc::new(TaskQueue::new());
        let pool = Arc::new(WorkerPool::new(
            settings.max_workers,
            PoolContext {
                worker: worker.clone(),
                connections: Arc::new(ConnectionPool::new(&ConnectionSettings::default()).unwrap()),
                submitter: queue.clone(),
                events: Arc::new(NoopEvents),
            },
        ));
        let state = Arc::new(StateCell::new());
        state.store(ManagerState::Running);
        let handler = Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
            exit: true,
        });

        Fixture {
            dispatcher: DispatchLoop {
                queue,
                pool,
                settings,
                state,
                wake: Arc::new(Notify::new()),
                stats: Arc::new(LoopStats::new(settings.initial_scan_interval_ms)),
                on_exhausted: handler.clone(),
                events: Arc::new(NoopEvents),
            },
            gate,
            worker,
            handler,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cycle_submits_reference_batch() {
        let settings = LoopSettings {
            max_workers: 4,
            queue_capacity_hint: 5,
            initial_scan_interval_ms: 1000,
        };
        let f = fixture(settings, false);

        // Two long-running units occupy two slots
        f.dispatcher.pool.submit(0).unwrap();
        f.dispatcher.pool.submit(0).unwrap();
        settle().await;
        assert_eq!(f.dispatcher.pool.active_count(), 2);

        f.dispatcher.queue.extend(1..=10);
        let Cycle::Continue(report) = f.dispatcher.cycle(1000) else {
            panic!("expected a dispatch cycle");
        };

        assert_eq!(report.tasks, 10);
        assert_eq!(report.working, 2);
        assert_eq!(report.jobs, 6);
        assert_eq!(report.dispatched, 6);
        assert_eq!(f.dispatcher.queue.len(), 4);
        // Highest priorities left first
        assert_eq!(f.dispatcher.queue.pop(), Some(4));

        f.gate.add_permits(100);
    }

    #[tokio::test]
    async fn test_cycle_exhausted_when_idle() {
        let settings = LoopSettings {
            max_workers: 2,
            queue_capacity_hint: 10,
            initial_scan_interval_ms: 100,
        };
        let f = fixture(settings, true);
        assert_eq!(f.dispatcher.cycle(100), Cycle::Exhausted);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cycle_waits_while_workers_busy() {
        let settings = LoopSettings {
            max_workers: 2,
            queue_capacity_hint: 10,
            initial_scan_interval_ms: 500,
        };
        let f = fixture(settings, false);
        f.dispatcher.pool.submit(1).unwrap();
        settle().await;

        let Cycle::Continue(report) = f.dispatcher.cycle(500) else {
            panic!("expected a wait cycle");
        };
        assert_eq!(report.dispatched, 0);
        assert_eq!(report.interval_after_ms, 1000);

        f.gate.add_permits(10);
    }

    #[tokio::test]
    async fn test_release_requeues_on_shutdown_pool() {
        let settings = LoopSettings {
            max_workers: 2,
            queue_capacity_hint: 10,
            initial_scan_interval_ms: 100,
        };
        let f = fixture(settings, true);
        f.dispatcher.pool.shutdown();
        f.dispatcher.queue.extend([1, 2, 3]);

        let Cycle::Continue(report) = f.dispatcher.cycle(100) else {
            panic!("expected a dispatch cycle");
        };
        assert_eq!(report.dispatched, 0);
        assert_eq!(f.dispatcher.queue.len(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_run_drains_then_calls_handler() {
        let settings = LoopSettings {
            max_workers: 2,
            queue_capacity_hint: 10,
            initial_scan_interval_ms: 20,
        };
        let f = fixture(settings, true);
        f.dispatcher.queue.extend(0..7);

        let stats = f.dispatcher.stats.clone();
        let _pool = f.dispatcher.pool.clone();
        tokio::time::timeout(Duration::from_secs(5), f.dispatcher.run())
            .await
            .expect("loop should exit after exhaustion");
        settle().await;

        assert_eq!(f.worker.done.load(Ordering::SeqCst), 7);
        assert_eq!(f.handler.calls.load(Ordering::SeqCst), 1);
        assert!(stats.cycles() >= 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_interrupt_wakes_sleep_and_loop_continues() {
        let settings = LoopSettings {
            max_workers: 1,
            queue_capacity_hint: 10,
            initial_scan_interval_ms: 1000,
        };
        let f = fixture(settings, false);
        f.dispatcher.pool.submit(1).unwrap();
        settle().await;

        let state = f.dispatcher.state.clone();
        let wake = f.dispatcher.wake.clone();
        let stats = f.dispatcher.stats.clone();
        let handle = tokio::spawn(f.dispatcher.run());

        settle().await;
        wake.notify_one();
        settle().await;

        assert_eq!(stats.interrupts(), 1);
        assert!(!handle.is_finished());
        assert_eq!(f.handler.calls.load(Ordering::SeqCst), 0);

        state.store(ManagerState::Stopping);
        wake.notify_one();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop should exit once stopping")
            .unwrap();
        assert_eq!(stats.interrupts(), 1);

        f.gate.add_permits(10);
    }
}
