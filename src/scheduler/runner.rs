use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::{CHANNEL_CAPACITY, DEPTH_READ_TIMEOUT_MS, SCHEDULER_TICK_SECS};
use crate::error::Result;
use crate::feed::PriceFeed;
use crate::jobs::Jobs;
use crate::scheduler::{JobKind, JobOutcome, JobReport, JobStats, Scheduler};
use crate::types::unix_now;

/// One-second coordination loop. Never awaits a job: every dispatch is a
/// detached task whose supervisor reports back over a channel.
pub struct SchedulerRunner<F: PriceFeed> {
    jobs: Arc<Jobs<F>>,
    stats: Arc<JobStats>,
    scheduler: Scheduler,
    last_depth: i64,
}

impl<F: PriceFeed> SchedulerRunner<F> {
    pub fn new(jobs: Arc<Jobs<F>>, stats: Arc<JobStats>) -> Self {
        Self {
            jobs,
            stats,
            scheduler: Scheduler::new(),
            last_depth: 0,
        }
    }

    pub async fn run(mut self) {
        let (report_tx, mut report_rx) = mpsc::channel::<JobReport>(CHANNEL_CAPACITY);
        let mut ticker = interval(Duration::from_secs(SCHEDULER_TICK_SECS));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("[SCHEDULER] started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick(unix_now(), &report_tx).await;
                }
                Some(report) = report_rx.recv() => {
                    self.on_report(&report);
                }
            }
        }
    }

    /// Read the backlog, decide, dispatch. Returns the dispatched kinds.
    pub async fn tick(&mut self, now: i64, reports: &mpsc::Sender<JobReport>) -> Vec<JobKind> {
        let read = timeout(
            Duration::from_millis(DEPTH_READ_TIMEOUT_MS),
            self.jobs.dirty_depth(),
        );
        match read.await {
            Ok(Ok(depth)) => self.last_depth = depth,
            Ok(Err(e)) => warn!("[SCHEDULER] dirty depth unavailable, using last value {}: {e}", self.last_depth),
            Err(_) => warn!(
                "[SCHEDULER] dirty depth read exceeded {DEPTH_READ_TIMEOUT_MS}ms, using last value {}",
                self.last_depth,
            ),
        }

        let due = self.scheduler.decide(now, self.last_depth);
        for &kind in &due {
            debug!(job = %kind, depth = self.last_depth, "[SCHEDULER] dispatch {kind}");
            let jobs = Arc::clone(&self.jobs);
            supervise(kind, now, async move { jobs.execute(kind, now).await }, reports.clone());
        }
        due
    }

    fn on_report(&self, report: &JobReport) {
        let elapsed_ms = report.elapsed.as_millis() as u64;
        match &report.outcome {
            JobOutcome::Completed(units) => debug!(
                job = %report.kind,
                elapsed_ms,
                units,
                "[JOB] {} done in {elapsed_ms}ms ({units})",
                report.kind,
            ),
            JobOutcome::Failed(msg) => warn!(
                job = %report.kind,
                elapsed_ms,
                "[JOB] {} failed after {elapsed_ms}ms: {msg}",
                report.kind,
            ),
            JobOutcome::Panicked(msg) => error!(
                job = %report.kind,
                elapsed_ms,
                "[JOB] {} panicked after {elapsed_ms}ms: {msg}",
                report.kind,
            ),
        }
        self.stats.record(report);
    }
}

/// Run `job` in its own task and report how it ended, panics included.
pub fn supervise<Fut>(kind: JobKind, started_at: i64, job: Fut, reports: mpsc::Sender<JobReport>)
where
    Fut: Future<Output = Result<u64>> + Send + 'static,
{
    tokio::spawn(async move {
        let start = Instant::now();
        let outcome = match tokio::spawn(job).await {
            Ok(Ok(units)) => JobOutcome::Completed(units),
            Ok(Err(e)) => JobOutcome::Failed(e.to_string()),
            Err(e) if e.is_panic() => JobOutcome::Panicked(panic_message(e.into_panic())),
            Err(e) => JobOutcome::Failed(e.to_string()),
        };
        let report = JobReport {
            kind,
            started_at,
            elapsed: start.elapsed(),
            outcome,
        };
        if reports.send(report).await.is_err() {
            warn!(job = %kind, "[SCHEDULER] report channel closed");
        }
    });
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
