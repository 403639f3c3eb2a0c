//! Canonical timestamp grid for a granularity's retention window.
//!
//! Pure functions: no clock reads, no I/O. The same inputs always produce the
//! same sequence, which is what makes diff-based backfill idempotent.

use crate::error::{AppError, Result};

/// Every interval-end timestamp a series should hold, ascending.
///
/// `retention_secs` is N base intervals plus one extra step; the extra step is
/// removed before counting intervals. `anchor` is the last known timestamp when
/// available. Without one the grid ends one interval before the start of the
/// bucket containing `now`, so an in-progress bucket is never expected.
pub fn expected_timestamps(
    interval_secs: i64,
    retention_secs: i64,
    anchor: Option<i64>,
    now: i64,
) -> Result<Vec<i64>> {
    let (start, end) = bounds(interval_secs, retention_secs, anchor, now)?;
    Ok((start..=end).step_by(interval_secs as usize).collect())
}

/// Oldest timestamp any grid computed at `now` can start at. Backfill anchors
/// never end before the clock-derived end, so rows below this are outside
/// every grid and safe to delete.
pub fn retention_floor(interval_secs: i64, retention_secs: i64, now: i64) -> Result<i64> {
    bounds(interval_secs, retention_secs, None, now).map(|(start, _)| start)
}

fn bounds(interval_secs: i64, retention_secs: i64, anchor: Option<i64>, now: i64) -> Result<(i64, i64)> {
    if interval_secs <= 0 {
        return Err(AppError::Config(format!(
            "grid interval must be positive, got {interval_secs}s"
        )));
    }
    if retention_secs <= 0 {
        return Err(AppError::Config(format!(
            "retention must be positive, got {retention_secs}s"
        )));
    }

    let end = match anchor {
        Some(a) => a,
        None => now.div_euclid(interval_secs) * interval_secs - interval_secs,
    };
    let num_intervals = (retention_secs - interval_secs).div_euclid(interval_secs);
    let start = align_forward(end - num_intervals * interval_secs, interval_secs);

    if end < start {
        return Err(AppError::Config(format!(
            "retention {retention_secs}s is shorter than one {interval_secs}s interval"
        )));
    }
    Ok((start, end))
}

/// Smallest multiple of `interval` that is `>= ts`.
fn align_forward(ts: i64, interval: i64) -> i64 {
    let rem = ts.rem_euclid(interval);
    if rem == 0 {
        ts
    } else {
        ts + (interval - rem)
    }
}
