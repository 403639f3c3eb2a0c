use sqlx::SqlitePool;

use crate::db::dirty;
use crate::error::Result;
use crate::types::{ItemMeta, LatestQuote};

/// Item metadata (`items`) and instant quotes (`latest_prices`).
#[derive(Clone)]
pub struct ItemRepo {
    pool: SqlitePool,
}

impl ItemRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Replace metadata for every item in `items`. Returns rows written.
    pub async fn upsert_mapping(&self, items: &[ItemMeta], now: i64) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        for item in items {
            sqlx::query(
                r#"
                INSERT INTO items (item_id, name, buy_limit, members, updated_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(item_id) DO UPDATE SET
                    name = excluded.name,
                    buy_limit = excluded.buy_limit,
                    members = excluded.members,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(item.item_id)
            .bind(&item.name)
            .bind(item.buy_limit)
            .bind(item.members)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(items.len() as u64)
    }

    pub async fn meta(&self, item_id: i64) -> Result<Option<ItemMeta>> {
        let row = sqlx::query_as::<_, ItemMeta>(
            "SELECT item_id, name, buy_limit, members FROM items WHERE item_id = ?",
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Write instant quotes, overwriting previous values. Items whose quote
    /// changed are marked dirty. Returns the number of changed items.
    pub async fn upsert_latest(&self, quotes: &[LatestQuote], now: i64) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut changed = 0u64;
        for q in quotes {
            let res = sqlx::query(
                r#"
                INSERT INTO latest_prices (item_id, high, high_time, low, low_time, updated_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(item_id) DO UPDATE SET
                    high = excluded.high,
                    high_time = excluded.high_time,
                    low = excluded.low,
                    low_time = excluded.low_time,
                    updated_at = excluded.updated_at
                WHERE latest_prices.high IS NOT excluded.high
                   OR latest_prices.low IS NOT excluded.low
                   OR latest_prices.high_time IS NOT excluded.high_time
                   OR latest_prices.low_time IS NOT excluded.low_time
                "#,
            )
            .bind(q.item_id)
            .bind(q.high)
            .bind(q.high_time)
            .bind(q.low)
            .bind(q.low_time)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            if res.rows_affected() > 0 {
                changed += 1;
                dirty::mark_on(&mut *tx, q.item_id).await?;
            }
        }
        tx.commit().await?;
        Ok(changed)
    }

    pub async fn latest(&self, item_id: i64) -> Result<Option<LatestQuote>> {
        let row = sqlx::query_as::<_, LatestQuote>(
            "SELECT item_id, high, high_time, low, low_time FROM latest_prices WHERE item_id = ?",
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}
