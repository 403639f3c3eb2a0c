//! Per-job run statistics. The scheduler coordinator records, the API reads.

use std::time::Duration;

use dashmap::DashMap;
use hdrhistogram::Histogram;
use serde::Serialize;

use crate::scheduler::{JobKind, JobOutcome, JobReport};

/// Durations are tracked in milliseconds, 1ms to 1h, 3 significant figures.
const HISTOGRAM_MAX_MS: u64 = 3_600_000;

struct Entry {
    runs: u64,
    failures: u64,
    last_started_at: i64,
    last_elapsed: Duration,
    last_outcome: JobOutcome,
    durations_ms: Option<Histogram<u64>>,
}

impl Entry {
    fn new(report: &JobReport) -> Self {
        Self {
            runs: 0,
            failures: 0,
            last_started_at: report.started_at,
            last_elapsed: report.elapsed,
            last_outcome: report.outcome.clone(),
            durations_ms: Histogram::new_with_bounds(1, HISTOGRAM_MAX_MS, 3).ok(),
        }
    }
}

/// Serializable view of one job kind's statistics.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub job: JobKind,
    pub runs: u64,
    pub failures: u64,
    pub last_started_at: i64,
    pub last_elapsed_ms: u64,
    pub last_outcome: JobOutcome,
    pub p50_ms: Option<u64>,
    pub p95_ms: Option<u64>,
    pub p99_ms: Option<u64>,
}

#[derive(Default)]
pub struct JobStats {
    inner: DashMap<JobKind, Entry>,
}

impl JobStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, report: &JobReport) {
        let mut entry = self
            .inner
            .entry(report.kind)
            .or_insert_with(|| Entry::new(report));
        entry.runs += 1;
        if !report.outcome.is_success() {
            entry.failures += 1;
        }
        entry.last_started_at = report.started_at;
        entry.last_elapsed = report.elapsed;
        entry.last_outcome = report.outcome.clone();
        let ms = (report.elapsed.as_millis() as u64).clamp(1, HISTOGRAM_MAX_MS);
        if let Some(h) = entry.durations_ms.as_mut() {
            let _ = h.record(ms);
        }
    }

    /// All job kinds seen so far, ordered by kind.
    pub fn snapshot(&self) -> Vec<JobSnapshot> {
        let mut out: Vec<JobSnapshot> = self
            .inner
            .iter()
            .map(|e| {
                let quantile = |q: f64| {
                    e.durations_ms
                        .as_ref()
                        .filter(|h| h.len() > 0)
                        .map(|h| h.value_at_quantile(q))
                };
                JobSnapshot {
                    job: *e.key(),
                    runs: e.runs,
                    failures: e.failures,
                    last_started_at: e.last_started_at,
                    last_elapsed_ms: e.last_elapsed.as_millis() as u64,
                    last_outcome: e.last_outcome.clone(),
                    p50_ms: quantile(0.5),
                    p95_ms: quantile(0.95),
                    p99_ms: quantile(0.99),
                }
            })
            .collect();
        out.sort_by_key(|s| s.job);
        out
    }

    pub fn runs(&self, kind: JobKind) -> u64 {
        self.inner.get(&kind).map(|e| e.runs).unwrap_or(0)
    }
}
