//! Per-cycle arithmetic for the dispatch loop.
//!
//! Kept free of any I/O so the numbers can be checked directly:
//! - **Batch size**: refill idle slots, scaled up when the backlog is deep
//!   relative to the capacity hint and the configured scan interval is coarse.
//! - **Scan interval**: back off when idle or when batches are already huge,
//!   speed up when there is backlog and spare capacity.

/// Floor for the adaptive scan interval.
pub const MIN_SCAN_INTERVAL_MS: u64 = 20;
/// Ceiling the interval backs off to.
pub const MAX_SCAN_INTERVAL_MS: u64 = 1000;
/// Backlog per worker at which the loop stops polling faster.
pub const BACKOFF_BACKLOG_RATIO: usize = 100;
/// Minimum batch multiplier.
pub const MIN_PRESSURE: usize = 2;

/// What one cycle should do given the observed queue depth and activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleDecision {
    /// Nothing queued and nothing running: stop the manager.
    Exhausted,
    /// Nothing queued but workers still running: just sleep.
    Wait,
    /// Release this many tasks to the pool.
    Dispatch(usize),
}

/// Decide the cycle's action.
pub fn decide(
    tasks: usize,
    working: usize,
    max_workers: usize,
    capacity_hint: usize,
    configured_interval_ms: u64,
) -> CycleDecision {
    match (tasks, working) {
        (0, 0) => CycleDecision::Exhausted,
        (0, _) => CycleDecision::Wait,
        _ => CycleDecision::Dispatch(batch_size(
            tasks,
            working,
            max_workers,
            capacity_hint,
            configured_interval_ms,
        )),
    }
}

/// Number of tasks to release this cycle.
///
/// `free = max_workers - working + 1`,
/// `pressure = max(2, (tasks / capacity_hint) * (interval_ms / 1000))`,
/// `jobs = min(tasks, free * pressure)`.
pub fn batch_size(
    tasks: usize,
    working: usize,
    max_workers: usize,
    capacity_hint: usize,
    configured_interval_ms: u64,
) -> usize {
    if tasks == 0 {
        return 0;
    }

    let free_slots = max_workers.saturating_sub(working) + 1;
    let depth = tasks.checked_div(capacity_hint).unwrap_or(0);
    let coarseness = (configured_interval_ms / 1000) as usize;
    let pressure = depth.saturating_mul(coarseness).max(MIN_PRESSURE);

    tasks.min(free_slots.saturating_mul(pressure))
}

/// Next sleep interval, clamped to `[MIN_SCAN_INTERVAL_MS, MAX_SCAN_INTERVAL_MS]`
/// whenever it moves.
pub fn next_interval(current_ms: u64, tasks: usize, working: usize, max_workers: usize) -> u64 {
    let backlog_ratio = tasks / max_workers.max(1);

    if (backlog_ratio >= BACKOFF_BACKLOG_RATIO || tasks == 0) && current_ms < MAX_SCAN_INTERVAL_MS {
        current_ms.saturating_mul(2).min(MAX_SCAN_INTERVAL_MS)
    } else if tasks > 0 && working < max_workers && current_ms > MIN_SCAN_INTERVAL_MS {
        (current_ms / 2).max(MIN_SCAN_INTERVAL_MS)
    } else {
        current_ms
    }
}
