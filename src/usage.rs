/// CPU utilization from two counter snapshots
use std::collections::TryReserveError;

use crate::counters::CounterSnapshot;
use crate::table::CounterTable;

/// Difference between two readings of a monotonically increasing counter.
///
/// A current value below the previous one is taken as exactly one wrap:
/// `(u64::MAX - prev) + curr + 1`, which is what wrapping subtraction yields.
#[inline]
pub fn counter_diff(prev: u64, curr: u64) -> u64 {
    curr.wrapping_sub(prev)
}

/// Percentage of non-idle time between `prev` and `curr`, in `[0.0, 100.0]`.
pub fn usage(prev: &CounterSnapshot, curr: &CounterSnapshot) -> f64 {
    let total_diff = counter_diff(prev.total(), curr.total());
    if total_diff == 0 {
        return 0.0;
    }

    let idle_diff = counter_diff(prev.idle_total(), curr.idle_total()).min(total_diff);
    let usage = (1.0 - idle_diff as f64 / total_diff as f64) * 100.0;
    usage.clamp(0.0, 100.0)
}

/// Per-entity usage for a previous/current table pair, written into `out`.
///
/// Rows are matched by position. A row with no counterpart in `previous`
/// (the core count grew) has no history yet and reports `0.0` for this tick.
pub fn table_usage(
    previous: &CounterTable,
    current: &CounterTable,
    out: &mut Vec<f64>,
) -> Result<(), TryReserveError> {
    out.clear();
    out.try_reserve(current.len())?;
    for (idx, curr) in current.entries().iter().enumerate() {
        let pct = match previous.get(idx) {
            Some(prev) => usage(prev, curr),
            None => 0.0,
        };
        out.push(pct);
    }
    Ok(())
}
