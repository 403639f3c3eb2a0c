use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::db::models::CanonicalItem;
use crate::db::{CanonicalRepo, DirtyQueue, ItemRepo, SeriesStore};
use crate::error::Result;
use crate::projector::metrics::{margins, window_aggregates};
use crate::trend::TrendResolver;
use crate::types::{Granularity, Window};

/// Recomputes canonical rows for dirty items.
#[derive(Clone)]
pub struct CanonicalProjector {
    series: SeriesStore,
    items: ItemRepo,
    canonical: CanonicalRepo,
    dirty: DirtyQueue,
    resolver: TrendResolver,
}

impl CanonicalProjector {
    pub fn new(
        series: SeriesStore,
        items: ItemRepo,
        canonical: CanonicalRepo,
        dirty: DirtyQueue,
        resolver: TrendResolver,
    ) -> Self {
        Self { series, items, canonical, dirty, resolver }
    }

    /// Drain the current dirty set. Each item is claimed off the queue before
    /// its reads, so overlapping refreshes split the set instead of repeating
    /// it, and a point written mid-projection re-marks the item. An item that
    /// fails is marked again for the next refresh. Returns items projected.
    pub async fn refresh(&self, now: i64) -> Result<u64> {
        let ids = self.dirty.snapshot().await?;
        if ids.is_empty() {
            return Ok(0);
        }

        let mut projected = 0u64;
        let mut failed = 0u64;
        let mut skipped = 0u64;
        for &item_id in &ids {
            if !self.dirty.claim(item_id).await? {
                skipped += 1;
                continue;
            }
            match self.project_one(item_id, now).await {
                Ok(_) => projected += 1,
                Err(e) => {
                    failed += 1;
                    warn!(item_id, "[PROJECTOR] item {item_id} left dirty: {e}");
                    self.dirty.mark(item_id).await?;
                }
            }
        }

        info!(
            projected,
            failed,
            skipped,
            queued = ids.len(),
            "[PROJECTOR] refreshed {projected}/{} dirty items",
            ids.len(),
        );
        Ok(projected)
    }

    /// Recompute and write one item's canonical row. Queue bookkeeping is the
    /// caller's.
    pub async fn project_one(&self, item_id: i64, now: i64) -> Result<CanonicalItem> {
        let meta = self.items.meta(item_id).await?;
        let name = meta.as_ref().map(|m| m.name.clone());
        let buy_limit = meta.as_ref().and_then(|m| m.buy_limit);

        let (high, low) = self.current_high_low(item_id, now).await?;

        let mut row = CanonicalItem {
            item_id,
            name,
            buy_limit,
            high,
            low,
            updated_at: now,
            ..Default::default()
        };

        if let (Some(high), Some(low)) = (high, low) {
            let m = margins(high, low, buy_limit, row.name.as_deref());
            row.margin = Some(m.margin);
            row.roi_percent = m.roi_percent;
            row.spread_percent = m.spread_percent;
            row.max_profit = m.max_profit;
            row.max_investment = m.max_investment;
        }

        let mut windows = BTreeMap::new();
        for w in Window::ALL {
            let resolution = self.resolver.resolve(item_id, w, now).await?;
            let mut metrics = match &resolution.current {
                Some(current) => {
                    let points = self
                        .series
                        .range(item_id, w.source(), current.timestamp - w.period_secs(), current.timestamp)
                        .await?;
                    window_aggregates(&points)
                }
                None => Default::default(),
            };
            metrics.trend = resolution.percent;
            windows.insert(w, metrics);
        }
        row.windows = windows;

        self.canonical.write(&row).await?;
        debug!(item_id, "[PROJECTOR] canonical row written");
        Ok(row)
    }

    /// Instant quote when the live poll has one, else the newest 5m averages.
    async fn current_high_low(&self, item_id: i64, now: i64) -> Result<(Option<i64>, Option<i64>)> {
        if let Some(q) = self.items.latest(item_id).await? {
            if q.high.is_some() || q.low.is_some() {
                return Ok((q.high, q.low));
            }
        }
        let g = Granularity::FiveMinutes;
        let fallback = self
            .series
            .nearest(item_id, g, now, g.interval_secs() * 12, now)
            .await?;
        Ok(match fallback {
            Some(p) => (p.avg_high.map(|v| v.round() as i64), p.avg_low.map(|v| v.round() as i64)),
            None => (None, None),
        })
    }
}
