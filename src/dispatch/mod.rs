//! Adaptive dispatch: decides how many queued tasks to release per cycle and
//! how long to sleep between cycles.
//!
//! - **plan**: the pure batch-size and interval arithmetic.
//! - **runner**: the `DispatchLoop` control task that applies it.

mod plan;
mod runner;

pub use plan::{
    BACKOFF_BACKLOG_RATIO, CycleDecision, MAX_SCAN_INTERVAL_MS, MIN_PRESSURE, MIN_SCAN_INTERVAL_MS,
    batch_size, decide, next_interval,
};
pub use runner::{Cycle, CycleReport, DispatchLoop, ExhaustionHandler, LoopSettings, LoopStats};
