pub mod cadence;
pub mod runner;
pub mod stats;

pub use cadence::Scheduler;
pub use runner::SchedulerRunner;
pub use stats::JobStats;

use serde::Serialize;

use crate::types::Granularity;

/// One dispatchable unit of scheduled work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JobKind {
    LivePoll,
    CanonicalRefresh,
    Poll(Granularity),
    Backfill(Granularity),
    Cleanup,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::LivePoll => write!(f, "live_poll"),
            JobKind::CanonicalRefresh => write!(f, "canonical_refresh"),
            JobKind::Poll(g) => write!(f, "poll_{g}"),
            JobKind::Backfill(g) => write!(f, "backfill_{g}"),
            JobKind::Cleanup => write!(f, "cleanup"),
        }
    }
}

impl Serialize for JobKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// How a dispatched job ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum JobOutcome {
    /// Units of work done (rows written, items projected, ...).
    Completed(u64),
    Failed(String),
    Panicked(String),
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Completed(_))
    }
}

/// Sent by a job's supervisor task once the job finishes.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub kind: JobKind,
    /// Epoch seconds the job was dispatched at.
    pub started_at: i64,
    pub elapsed: std::time::Duration,
    pub outcome: JobOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_names_are_stable() {
        assert_eq!(JobKind::LivePoll.to_string(), "live_poll");
        assert_eq!(JobKind::Poll(Granularity::SixHours).to_string(), "poll_6h");
        assert_eq!(JobKind::Backfill(Granularity::OneDay).to_string(), "backfill_24h");
        assert_eq!(serde_json::to_string(&JobKind::Cleanup).unwrap(), "\"cleanup\"");
    }

    #[test]
    fn outcome_serializes_tagged() {
        let json = serde_json::to_value(JobOutcome::Completed(3)).unwrap();
        assert_eq!(json, serde_json::json!({"status": "completed", "detail": 3}));
    }
}
