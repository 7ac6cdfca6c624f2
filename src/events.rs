//! Logging capability injected into each `Manager`.
//!
//! Every observable lifecycle and dispatch event goes through a
//! `ManagerEvents` sink owned by the manager instance. `TracingEvents`
//! turns them into structured `tracing` events tagged with the manager's
//! name; tests swap in a recording sink.

use chrono::{DateTime, Local};

use crate::dispatch::CycleReport;
use crate::error::CrawlrError;
use crate::manager::StopReport;
use crate::pool::WorkUnit;
use crate::settings::DispatchSettings;
use crate::task::Task;

/// Sink for manager, dispatcher, and worker pool events.
///
/// Every method defaults to doing nothing.
pub trait ManagerEvents<T: Task>: Send + Sync {
    /// A running period began.
    fn started(&self, _settings: &DispatchSettings, _seeds: usize, _at: DateTime<Local>) {}

    /// `start` was called while already running; its seeds were queued.
    fn seeds_absorbed(&self, _count: usize) {}

    /// One dispatch cycle finished its decide/submit step.
    fn cycle(&self, _report: &CycleReport) {}

    /// The dispatch sleep was woken early while still running.
    fn sleep_interrupted(&self) {}

    /// A queued task was dropped from the backlog by `stop`.
    fn task_abandoned(&self, _task: &T) {}

    /// A submitted but unstarted work unit was cancelled by a forced shutdown.
    fn unit_cancelled(&self, _unit: &WorkUnit<T>) {}

    /// A worker returned an error.
    fn worker_failed(&self, _unit_id: u64, _error: &CrawlrError) {}

    /// A worker panicked. The slot survives.
    fn worker_panicked(&self, _unit_id: u64, _message: &str) {}

    /// A running period ended.
    fn stopped(&self, _report: &StopReport, _at: DateTime<Local>) {}
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEvents;

impl<T: Task> ManagerEvents<T> for NoopEvents {}

/// Sink that emits `tracing` events scoped by manager name.
#[derive(Debug, Clone)]
pub struct TracingEvents {
    name: String,
}

impl TracingEvents {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Default for TracingEvents {
    fn default() -> Self {
        Self::new("crawlr")
    }
}

impl<T: Task> ManagerEvents<T> for TracingEvents {
    fn started(&self, settings: &DispatchSettings, seeds: usize, at: DateTime<Local>) {
        tracing::info!(
            manager = %self.name,
            max_workers = settings.max_workers,
            scan_interval_ms = settings.initial_scan_interval_ms,
            seeds,
            at = %at.to_rfc3339(),
            "Dispatcher started"
        );
    }

    fn seeds_absorbed(&self, count: usize) {
        tracing::info!(manager = %self.name, seeds = count, "Already running, seeds queued");
    }

    fn cycle(&self, report: &CycleReport) {
        if report.tasks == 0 {
            tracing::info!(
                manager = %self.name,
                working = report.working,
                "No new tasks, workers still running"
            );
        } else {
            tracing::info!(
                manager = %self.name,
                tasks = report.tasks,
                jobs = report.dispatched,
                working = report.working,
                "Dispatched tasks"
            );
        }
        if report.interval_before_ms != report.interval_after_ms {
            tracing::debug!(
                manager = %self.name,
                from_ms = report.interval_before_ms,
                to_ms = report.interval_after_ms,
                "Scan interval adjusted"
            );
        }
    }

    fn sleep_interrupted(&self) {
        tracing::warn!(manager = %self.name, "Dispatch sleep interrupted");
    }

    fn task_abandoned(&self, task: &T) {
        tracing::info!(manager = %self.name, task = ?task, "Abandoned queued task");
    }

    fn unit_cancelled(&self, unit: &WorkUnit<T>) {
        tracing::info!(manager = %self.name, unit = unit.id, task = ?unit.task, "Cancelled unstarted task");
    }

    fn worker_failed(&self, unit_id: u64, error: &CrawlrError) {
        tracing::warn!(manager = %self.name, unit = unit_id, error = %error, "Worker failed");
    }

    fn worker_panicked(&self, unit_id: u64, message: &str) {
        tracing::error!(manager = %self.name, unit = unit_id, panic = message, "Worker panicked");
    }

    fn stopped(&self, report: &StopReport, at: DateTime<Local>) {
        tracing::info!(
            manager = %self.name,
            abandoned = report.abandoned,
            cancelled = report.cancelled,
            graceful = report.graceful,
            at = %at.to_rfc3339(),
            "Dispatcher stopped"
        );
    }
}
