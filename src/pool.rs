//! Fixed-size pool of worker slots.
//!
//! `size` long-lived tokio tasks pull work units from an unbounded FIFO and
//! run the injected `Worker` on each one. Submitting never waits; overflow
//! sits in the FIFO until a slot frees up.
//!
//! Shutdown follows the usual two-step protocol: `shutdown` stops intake
//! and lets slots drain the FIFO and exit, `await_termination` waits for
//! that with a deadline, and `shutdown_now` hands back whatever never
//! started and aborts the slots.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;

use crate::connection::ConnectionPool;
use crate::error::Result;
use crate::events::ManagerEvents;
use crate::task::{Task, TaskSubmitter};

/// Routine executed once per dispatched task.
///
/// Errors are reported to the events sink and otherwise ignored; retries
/// and failure bookkeeping belong to the worker.
#[async_trait]
pub trait Worker<T: Task>: Send + Sync {
    async fn process(
        &self,
        connections: Arc<ConnectionPool>,
        task: T,
        submitter: Arc<dyn TaskSubmitter<T>>,
    ) -> Result<()>;
}

/// A task handed to the pool, tagged with a pool-local sequence number.
#[derive(Debug)]
pub struct WorkUnit<T> {
    pub id: u64,
    pub task: T,
}

/// Returned by `submit` once the pool has stopped accepting work.
pub struct Rejected<T>(pub T);

impl<T: fmt::Debug> fmt::Debug for Rejected<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Rejected").field(&self.0).finish()
    }
}

/// Collaborators every slot needs.
pub struct PoolContext<T: Task> {
    pub worker: Arc<dyn Worker<T>>,
    pub connections: Arc<ConnectionPool>,
    pub submitter: Arc<dyn TaskSubmitter<T>>,
    pub events: Arc<dyn ManagerEvents<T>>,
}

struct Shared<T> {
    queue: Mutex<VecDeque<WorkUnit<T>>>,
    available: Notify,
    accepting: AtomicBool,
    active: AtomicUsize,
    live_slots: AtomicUsize,
    terminated: watch::Sender<bool>,
}

impl<T> Shared<T> {
    fn queue(&self) -> MutexGuard<'_, VecDeque<WorkUnit<T>>> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Next unit to run, or `None` once shut down and drained.
    ///
    /// The active count is bumped under the queue lock so a unit is always
    /// counted as either queued or active.
    async fn next_unit(&self) -> Option<WorkUnit<T>> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut queue = self.queue();
                if let Some(unit) = queue.pop_front() {
                    self.active.fetch_add(1, Ordering::AcqRel);
                    return Some(unit);
                }
                if !self.accepting.load(Ordering::Acquire) {
                    return None;
                }
            }

            notified.await;
        }
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

struct SlotGuard<T>(Arc<Shared<T>>);

impl<T> Drop for SlotGuard<T> {
    fn drop(&mut self) {
        if self.0.live_slots.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.terminated.send_replace(true);
        }
    }
}

/// Pool of `size` parallel execution slots.
pub struct WorkerPool<T: Task> {
    shared: Arc<Shared<T>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    next_id: AtomicU64,
    size: usize,
}

impl<T: Task> WorkerPool<T> {
    /// Spawn `size` slots on the current tokio runtime.
    pub fn new(size: usize, context: PoolContext<T>) -> Self {
        let (terminated, _) = watch::channel(size == 0);
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            available: Notify::new(),
            accepting: AtomicBool::new(true),
            active: AtomicUsize::new(0),
            live_slots: AtomicUsize::new(size),
            terminated,
        });
        let context = Arc::new(context);

        let handles = (0..size)
            .map(|_| tokio::spawn(run_slot(shared.clone(), context.clone())))
            .collect();

        Self {
            shared,
            handles: Mutex::new(handles),
            next_id: AtomicU64::new(1),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Queue a task for the next free slot. Never waits.
    ///
    /// Returns the unit id, or the task itself if the pool is shut down.
    pub fn submit(&self, task: T) -> std::result::Result<u64, Rejected<T>> {
        let mut queue = self.shared.queue();
        if !self.shared.accepting.load(Ordering::Acquire) {
            return Err(Rejected(task));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        queue.push_back(WorkUnit { id, task });
        self.shared.available.notify_one();
        Ok(id)
    }

    /// Slots currently running a unit.
    pub fn active_count(&self) -> usize {
        self.shared.active.load(Ordering::Acquire)
    }

    /// Units submitted but not yet picked up by a slot.
    pub fn queued_count(&self) -> usize {
        self.shared.queue().len()
    }

    /// Queued plus active, read consistently.
    pub fn in_flight(&self) -> usize {
        let queue = self.shared.queue();
        queue.len() + self.shared.active.load(Ordering::Acquire)
    }

    pub fn is_shutdown(&self) -> bool {
        !self.shared.accepting.load(Ordering::Acquire)
    }

    /// Stop accepting work. Slots finish the queued units, then exit.
    pub fn shutdown(&self) {
        {
            let _queue = self.shared.queue();
            self.shared.accepting.store(false, Ordering::Release);
        }
        self.shared.available.notify_waiters();
    }

    /// Wait until every slot has exited, up to `timeout`.
    ///
    /// Only resolves early after `shutdown` or `shutdown_now`.
    pub async fn await_termination(&self, timeout: Duration) -> bool {
        let mut terminated = self.shared.terminated.subscribe();
        let finished = async move { terminated.wait_for(|done| *done).await.is_ok() };
        tokio::time::timeout(timeout, finished).await.unwrap_or(false)
    }

    pub fn is_terminated(&self) -> bool {
        *self.shared.terminated.borrow()
    }

    /// Abort every slot and return the units that never started.
    pub fn shutdown_now(&self) -> Vec<WorkUnit<T>> {
        let pending: Vec<WorkUnit<T>> = {
            let mut queue = self.shared.queue();
            self.shared.accepting.store(false, Ordering::Release);
            queue.drain(..).collect()
        };

        let handles: Vec<JoinHandle<()>> = self
            .handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect();
        for handle in handles {
            handle.abort();
        }
        self.shared.available.notify_waiters();

        pending
    }
}

impl<T: Task> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        let handles = self.handles.get_mut().unwrap_or_else(|poisoned| poisoned.into_inner());
        for handle in handles.drain(..) {
            handle.abort();
        }
    }
}

async fn run_slot<T: Task>(shared: Arc<Shared<T>>, context: Arc<PoolContext<T>>) {
    let _slot = SlotGuard(shared.clone());

    while let Some(unit) = shared.next_unit().await {
        let _active = ActiveGuard(&shared.active);
        let id = unit.id;

        let run = context
            .worker
            .process(context.connections.clone(), unit.task, context.submitter.clone());

        match AssertUnwindSafe(run).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => context.events.worker_failed(id, &e),
            Err(panic) => context.events.worker_panicked(id, &panic_message(&*panic)),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
