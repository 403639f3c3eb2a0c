//! Bodies of the jobs the scheduler dispatches. Each returns the units of work
//! it did so the supervisor can report them.

use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::backfill::{BackfillEngine, BackfillSummary};
use crate::config::{Config, Retention};
use crate::db::{CanonicalRepo, DirtyQueue, ItemRepo, SeriesStore};
use crate::error::Result;
use crate::feed::PriceFeed;
use crate::projector::CanonicalProjector;
use crate::scheduler::JobKind;
use crate::timegrid::retention_floor;
use crate::trend::TrendResolver;
use crate::types::{Granularity, LatestQuote};

pub struct Jobs<F: PriceFeed> {
    feed: Arc<F>,
    series: SeriesStore,
    items: ItemRepo,
    dirty: DirtyQueue,
    backfill: BackfillEngine<F>,
    projector: CanonicalProjector,
    retention: Retention,
}

impl<F: PriceFeed> Jobs<F> {
    pub fn new(pool: SqlitePool, feed: Arc<F>, cfg: &Config) -> Self {
        let series = SeriesStore::new(pool.clone());
        let items = ItemRepo::new(pool.clone());
        let dirty = DirtyQueue::new(pool.clone());
        let projector = CanonicalProjector::new(
            series.clone(),
            items.clone(),
            CanonicalRepo::new(pool),
            dirty.clone(),
            TrendResolver::new(series.clone(), cfg.retention),
        );
        let backfill = BackfillEngine::new(
            series.clone(),
            Arc::clone(&feed),
            cfg.retention,
            cfg.backfill_delay,
        );
        Self {
            feed,
            series,
            items,
            dirty,
            backfill,
            projector,
            retention: cfg.retention,
        }
    }

    pub async fn execute(&self, kind: JobKind, now: i64) -> Result<u64> {
        match kind {
            JobKind::LivePoll => self.live_poll(now).await,
            JobKind::CanonicalRefresh => self.projector.refresh(now).await,
            JobKind::Poll(g) => self.poll(g, now).await,
            JobKind::Backfill(g) => Ok(self.backfill(g, now).await?.rows_written),
            JobKind::Cleanup => self.cleanup(now).await,
        }
    }

    /// Current dirty-queue depth, read by the scheduler every tick.
    pub async fn dirty_depth(&self) -> Result<i64> {
        self.dirty.depth().await
    }

    /// Store instant quotes; items whose quote changed become dirty.
    pub async fn live_poll(&self, now: i64) -> Result<u64> {
        let quotes: Vec<LatestQuote> = self.feed.latest().await?.into_values().collect();
        let changed = self.items.upsert_latest(&quotes, now).await?;
        debug!(quotes = quotes.len(), changed, "[LIVE] {changed}/{} quotes changed", quotes.len());
        Ok(changed)
    }

    /// Fetch the interval that just closed. The daily poll also refreshes the
    /// item mapping, which changes at most a few times a day.
    pub async fn poll(&self, g: Granularity, now: i64) -> Result<u64> {
        let end = g.closed_interval_end(now);
        let written = match self.backfill.fill_one(g, end, now).await? {
            Some(rows) => {
                info!(granularity = %g, timestamp = end, rows, "[POLL] {g}@{end}: {rows} new rows");
                rows
            }
            None => {
                info!(granularity = %g, timestamp = end, "[POLL] {g}@{end}: empty snapshot, left for backfill");
                0
            }
        };

        if g == Granularity::OneDay {
            if let Err(e) = self.refresh_mapping(now).await {
                warn!("[POLL] mapping refresh failed: {e}");
            }
        }
        Ok(written)
    }

    pub async fn backfill(&self, g: Granularity, now: i64) -> Result<BackfillSummary> {
        self.backfill.run(g, now).await
    }

    /// Backfill every granularity in turn. A failing granularity is logged
    /// and does not stop the others.
    pub async fn cold_start(&self, now: i64) {
        for g in Granularity::ALL {
            if let Err(e) = self.backfill(g, now).await {
                warn!(granularity = %g, "[BACKFILL] cold start for {g} failed: {e}");
            }
        }
    }

    pub async fn refresh_mapping(&self, now: i64) -> Result<u64> {
        let mapping = self.feed.mapping().await?;
        let n = self.items.upsert_mapping(&mapping, now).await?;
        info!(items = n, "[MAPPING] {n} items refreshed");
        Ok(n)
    }

    /// Drop points (and coverage) older than each granularity's retention.
    pub async fn cleanup(&self, now: i64) -> Result<u64> {
        let mut removed = 0;
        for g in Granularity::ALL {
            let cutoff = retention_floor(g.interval_secs(), self.retention.secs(g), now)?;
            let n = self.series.delete_older_than(g, cutoff).await?;
            if n > 0 {
                info!(granularity = %g, cutoff, rows = n, "[CLEANUP] {g}: removed {n} rows");
            }
            removed += n;
        }
        Ok(removed)
    }
}
