use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::Retention;
use crate::db::SeriesStore;
use crate::error::Result;
use crate::feed::PriceFeed;
use crate::timegrid::expected_timestamps;
use crate::types::{Granularity, PricePoint};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BackfillSummary {
    /// Timestamps the retention window should contain.
    pub expected: usize,
    /// Of those, timestamps the store did not account for.
    pub missing: usize,
    /// Missing timestamps fetched and written this run.
    pub filled: usize,
    /// Missing timestamps upstream answered empty for; still missing.
    pub empty: usize,
    /// Missing timestamps whose fetch or write failed; retried next cycle.
    pub failed: usize,
    /// New price rows written.
    pub rows_written: u64,
}

/// Reconciles a granularity's expected grid against the store and fetches
/// whatever is missing. Safe to run repeatedly and concurrently with polls:
/// every write is insert-or-ignore.
pub struct BackfillEngine<F: PriceFeed> {
    store: SeriesStore,
    feed: Arc<F>,
    retention: Retention,
    delay: Duration,
}

impl<F: PriceFeed> BackfillEngine<F> {
    pub fn new(store: SeriesStore, feed: Arc<F>, retention: Retention, delay: Duration) -> Self {
        Self { store, feed, retention, delay }
    }

    pub async fn run(&self, g: Granularity, now: i64) -> Result<BackfillSummary> {
        let interval = g.interval_secs();
        // Anchor on the newest timestamp we hold, but never end earlier than
        // the last fully settled interval so a failed poll is still repaired.
        let settled_end = g.closed_interval_end(now) - interval;
        let anchor = self
            .store
            .latest_timestamp(g)
            .await?
            .map(|latest| latest.max(settled_end));

        let expected = expected_timestamps(interval, self.retention.secs(g), anchor, now)?;
        let actual = self.store.distinct_timestamps(g).await?;
        let missing: Vec<i64> = expected
            .iter()
            .copied()
            .filter(|ts| !actual.contains(ts))
            .collect();

        let mut summary = BackfillSummary {
            expected: expected.len(),
            missing: missing.len(),
            ..Default::default()
        };

        if missing.is_empty() {
            debug!(granularity = %g, expected = summary.expected, "[BACKFILL] nothing missing");
            return Ok(summary);
        }

        info!(
            granularity = %g,
            expected = summary.expected,
            missing = summary.missing,
            "[BACKFILL] {g}: {} of {} timestamps missing",
            summary.missing,
            summary.expected,
        );

        for (i, &ts) in missing.iter().enumerate() {
            if i > 0 && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match self.fill_one(g, ts, now).await {
                Ok(Some(rows)) => {
                    summary.filled += 1;
                    summary.rows_written += rows;
                }
                Ok(None) => summary.empty += 1,
                Err(e) => {
                    summary.failed += 1;
                    warn!(granularity = %g, timestamp = ts, "[BACKFILL] {g}@{ts} skipped: {e}");
                }
            }
        }

        info!(
            granularity = %g,
            filled = summary.filled,
            empty = summary.empty,
            failed = summary.failed,
            rows = summary.rows_written,
            "[BACKFILL] {g} complete: filled {} | empty {} | failed {} | rows {}",
            summary.filled,
            summary.empty,
            summary.failed,
            summary.rows_written,
        );
        Ok(summary)
    }

    /// Fetch and store one interval. Returns new rows written, or `None` when
    /// upstream had nothing for it. Also used by the per-granularity poll for
    /// the interval that just closed.
    ///
    /// An empty snapshot is not recorded as covered: upstream answers empty
    /// for intervals it has not published yet, and those must be retried.
    pub async fn fill_one(&self, g: Granularity, ts: i64, now: i64) -> Result<Option<u64>> {
        let quotes = self.feed.interval(g, ts).await?;
        if quotes.is_empty() {
            debug!(granularity = %g, timestamp = ts, "[BACKFILL] empty snapshot");
            return Ok(None);
        }
        let item_count = quotes.len();
        let points: Vec<PricePoint> = quotes
            .into_iter()
            .map(|(item_id, q)| q.into_point(item_id, ts))
            .collect();
        let written = self.store.upsert_batch(g, &points).await?;
        self.store.record_coverage(g, ts, item_count, now).await?;
        Ok(Some(written))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{memory_pool, DirtyQueue};
    use crate::feed::mock::MockFeed;
    use crate::types::IntervalQuote;

    // 2024-01-01T12:07:45Z
    const NOW: i64 = 1_704_067_200 + 12 * 3_600 + 7 * 60 + 45;

    fn feed_with_two_items() -> MockFeed {
        let mut feed = MockFeed::default();
        feed.per_interval.insert(
            2,
            IntervalQuote { avg_high: Some(160.0), avg_low: Some(155.0), high_volume: Some(1_000), low_volume: Some(900) },
        );
        feed.per_interval.insert(
            4151,
            IntervalQuote { avg_high: None, avg_low: Some(1_500_000.0), high_volume: Some(0), low_volume: Some(4) },
        );
        // One-sided-null entries are dropped, not stored.
        feed.per_interval.insert(13190, IntervalQuote::default());
        feed
    }

    fn engine(store: SeriesStore, feed: Arc<MockFeed>) -> BackfillEngine<MockFeed> {
        BackfillEngine::new(store, feed, Retention::default(), Duration::ZERO)
    }

    #[tokio::test]
    async fn cold_backfill_fills_the_whole_grid_then_is_idempotent() {
        let store = SeriesStore::new(memory_pool().await);
        let feed = Arc::new(feed_with_two_items());
        let engine = engine(store.clone(), Arc::clone(&feed));

        let first = engine.run(Granularity::FiveMinutes, NOW).await.unwrap();
        assert_eq!(first.expected, 289);
        assert_eq!(first.missing, 289);
        assert_eq!(first.filled, 289);
        assert_eq!(first.empty, 0);
        assert_eq!(first.failed, 0);
        assert_eq!(first.rows_written, 289 * 2);
        assert_eq!(feed.calls(), 289);

        let second = engine.run(Granularity::FiveMinutes, NOW).await.unwrap();
        assert_eq!(second.missing, 0);
        assert_eq!(second.rows_written, 0);
        assert_eq!(feed.calls(), 289);
        assert_eq!(store.count(Granularity::FiveMinutes).await.unwrap(), 289 * 2);
    }

    #[tokio::test]
    async fn failed_timestamp_is_skipped_and_retried_next_cycle() {
        let store = SeriesStore::new(memory_pool().await);
        let feed = Arc::new(feed_with_two_items());
        let engine = engine(store.clone(), Arc::clone(&feed));

        // Grid ends at 12:00; 11:00 is inside it.
        let bad = 1_704_067_200 + 11 * 3_600;
        feed.fail_at(bad);

        let first = engine.run(Granularity::FiveMinutes, NOW).await.unwrap();
        assert_eq!(first.failed, 1);
        assert_eq!(first.filled, 288);
        assert!(!store.distinct_timestamps(Granularity::FiveMinutes).await.unwrap().contains(&bad));

        feed.recover();
        let calls_before = feed.calls();
        let second = engine.run(Granularity::FiveMinutes, NOW).await.unwrap();
        assert_eq!(second.missing, 1);
        assert_eq!(second.filled, 1);
        assert_eq!(second.rows_written, 2);
        assert_eq!(feed.calls() - calls_before, 1);
    }

    #[tokio::test]
    async fn backfill_never_overwrites_polled_points_but_marks_new_ones_dirty() {
        let pool = memory_pool().await;
        let store = SeriesStore::new(pool.clone());
        let queue = DirtyQueue::new(pool);
        let feed = Arc::new(feed_with_two_items());
        let engine = engine(store.clone(), Arc::clone(&feed));

        let ts = 1_704_067_200 + 12 * 3_600;
        let polled = PricePoint {
            item_id: 2,
            timestamp: ts,
            avg_high: Some(999.0),
            avg_low: Some(998.0),
            high_volume: Some(1),
            low_volume: Some(1),
        };
        store.upsert(Granularity::FiveMinutes, &polled).await.unwrap();

        engine.run(Granularity::FiveMinutes, NOW).await.unwrap();
        let kept = store.nearest(2, Granularity::FiveMinutes, ts, 0, ts).await.unwrap();
        assert_eq!(kept, Some(polled));
        assert_eq!(queue.snapshot().await.unwrap(), vec![2, 4151]);
    }

    #[tokio::test]
    async fn empty_snapshots_stay_missing() {
        let store = SeriesStore::new(memory_pool().await);
        let feed = Arc::new(MockFeed::default());
        let engine = engine(store.clone(), Arc::clone(&feed));

        let first = engine.run(Granularity::OneDay, NOW).await.unwrap();
        assert_eq!(first.rows_written, 0);
        assert_eq!(first.filled, 0);
        assert_eq!(first.empty, first.missing);
        assert!(first.missing > 0);
        let second = engine.run(Granularity::OneDay, NOW).await.unwrap();
        assert_eq!(second.missing, first.missing);
    }
}
