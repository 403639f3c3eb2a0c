use std::collections::BTreeSet;

use sqlx::SqlitePool;

use crate::db::dirty;
use crate::error::Result;
use crate::types::{Granularity, PricePoint};

/// Repository over the four granularity tables and the coverage ledger.
///
/// Table names come from [`Granularity::table`], never from caller input, so
/// formatting them into SQL is safe.
#[derive(Clone)]
pub struct SeriesStore {
    pool: SqlitePool,
}

impl SeriesStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    #[cfg(test)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert-or-ignore one point. Returns true if a new row was written.
    ///
    /// An existing `(item_id, timestamp)` row always wins: live polls are
    /// authoritative over retroactive fill.
    #[cfg(test)]
    pub async fn upsert(&self, g: Granularity, point: &PricePoint) -> Result<bool> {
        Ok(self.upsert_batch(g, std::slice::from_ref(point)).await? == 1)
    }

    /// Insert-or-ignore a batch in one transaction. Points with neither side
    /// are dropped. Every newly written item is marked dirty in the same
    /// transaction.
    pub async fn upsert_batch(&self, g: Granularity, points: &[PricePoint]) -> Result<u64> {
        let sql = format!(
            "INSERT OR IGNORE INTO {} (item_id, timestamp, avg_high, avg_low, high_volume, low_volume) \
             VALUES (?, ?, ?, ?, ?, ?)",
            g.table()
        );

        let mut tx = self.pool.begin().await?;
        let mut written = 0u64;
        for p in points.iter().filter(|p| p.has_price()) {
            let res = sqlx::query(&sql)
                .bind(p.item_id)
                .bind(p.timestamp)
                .bind(p.avg_high)
                .bind(p.avg_low)
                .bind(p.high_volume)
                .bind(p.low_volume)
                .execute(&mut *tx)
                .await?;
            if res.rows_affected() > 0 {
                written += 1;
                dirty::mark_on(&mut *tx, p.item_id).await?;
            }
        }
        tx.commit().await?;
        Ok(written)
    }

    /// Record that the snapshot for `timestamp` was fetched, even if it held
    /// no tradable points.
    pub async fn record_coverage(
        &self,
        g: Granularity,
        timestamp: i64,
        item_count: usize,
        fetched_at: i64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO series_coverage (granularity, timestamp, item_count, fetched_at) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(g.as_str())
        .bind(timestamp)
        .bind(item_count as i64)
        .bind(fetched_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Timestamps the series already accounts for: any stored point or any
    /// recorded fetch.
    pub async fn distinct_timestamps(&self, g: Granularity) -> Result<BTreeSet<i64>> {
        let sql = format!(
            "SELECT DISTINCT timestamp FROM {} \
             UNION SELECT timestamp FROM series_coverage WHERE granularity = ?",
            g.table()
        );
        let rows: Vec<i64> = sqlx::query_scalar(&sql)
            .bind(g.as_str())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().collect())
    }

    pub async fn latest_timestamp(&self, g: Granularity) -> Result<Option<i64>> {
        let sql = format!(
            "SELECT MAX(ts) FROM ( \
                SELECT MAX(timestamp) AS ts FROM {} \
                UNION ALL \
                SELECT MAX(timestamp) AS ts FROM series_coverage WHERE granularity = ? \
             )",
            g.table()
        );
        let latest: Option<i64> = sqlx::query_scalar(&sql)
            .bind(g.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(latest)
    }

    /// The point closest to `target` within `tolerance_secs`, never after
    /// `not_after`.
    ///
    /// Ordering among candidates: two-sided points before one-sided ones,
    /// then smallest distance, then earliest timestamp. A one-sided point
    /// shifts the mid price, so completeness outranks proximity.
    pub async fn nearest(
        &self,
        item_id: i64,
        g: Granularity,
        target: i64,
        tolerance_secs: i64,
        not_after: i64,
    ) -> Result<Option<PricePoint>> {
        if tolerance_secs < 0 {
            return Ok(None);
        }
        let sql = format!(
            "SELECT item_id, timestamp, avg_high, avg_low, high_volume, low_volume \
             FROM {} \
             WHERE item_id = ? AND timestamp <= ? AND timestamp >= ? AND timestamp <= ? \
             ORDER BY (avg_high IS NOT NULL AND avg_low IS NOT NULL) DESC, \
                      ABS(timestamp - ?) ASC, \
                      timestamp ASC \
             LIMIT 1",
            g.table()
        );
        let point = sqlx::query_as::<_, PricePoint>(&sql)
            .bind(item_id)
            .bind(not_after)
            .bind(target.saturating_sub(tolerance_secs))
            .bind(target.saturating_add(tolerance_secs))
            .bind(target)
            .fetch_optional(&self.pool)
            .await?;
        Ok(point)
    }

    /// Points with `after < timestamp <= until`, ascending.
    pub async fn range(
        &self,
        item_id: i64,
        g: Granularity,
        after: i64,
        until: i64,
    ) -> Result<Vec<PricePoint>> {
        let sql = format!(
            "SELECT item_id, timestamp, avg_high, avg_low, high_volume, low_volume \
             FROM {} \
             WHERE item_id = ? AND timestamp > ? AND timestamp <= ? \
             ORDER BY timestamp ASC",
            g.table()
        );
        let points = sqlx::query_as::<_, PricePoint>(&sql)
            .bind(item_id)
            .bind(after)
            .bind(until)
            .fetch_all(&self.pool)
            .await?;
        Ok(points)
    }

    /// Stored point rows for a granularity.
    pub async fn count(&self, g: Granularity) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", g.table());
        let n: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(n)
    }

    /// Drop points and coverage rows older than `cutoff`. Returns deleted point rows.
    pub async fn delete_older_than(&self, g: Granularity, cutoff: i64) -> Result<u64> {
        let sql = format!("DELETE FROM {} WHERE timestamp < ?", g.table());
        let mut tx = self.pool.begin().await?;
        let deleted = sqlx::query(&sql)
            .bind(cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM series_coverage WHERE granularity = ? AND timestamp < ?")
            .bind(g.as_str())
            .bind(cutoff)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(deleted)
    }
}
