use sqlx::SqlitePool;

use crate::db::models::CanonicalItem;
use crate::error::Result;
use crate::types::Window;

const CORE_COLUMNS: &[&str] = &[
    "item_id",
    "name",
    "buy_limit",
    "high",
    "low",
    "margin",
    "roi_percent",
    "spread_percent",
    "max_profit",
    "max_investment",
    "updated_at",
];

/// Read/write access to `canonical_items`. Writes are whole-row, last writer wins.
#[derive(Clone)]
pub struct CanonicalRepo {
    pool: SqlitePool,
    upsert_sql: String,
}

impl CanonicalRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool, upsert_sql: build_upsert_sql() }
    }

    pub async fn write(&self, item: &CanonicalItem) -> Result<()> {
        let mut q = sqlx::query(&self.upsert_sql)
            .bind(item.item_id)
            .bind(&item.name)
            .bind(item.buy_limit)
            .bind(item.high)
            .bind(item.low)
            .bind(item.margin)
            .bind(item.roi_percent)
            .bind(item.spread_percent)
            .bind(item.max_profit)
            .bind(item.max_investment)
            .bind(item.updated_at);
        for w in Window::ALL {
            let m = item.window(w).cloned().unwrap_or_default();
            q = q.bind(m.volume).bind(m.turnover).bind(m.trend).bind(m.buy_sell_rate);
        }
        q.execute(&self.pool).await?;
        Ok(())
    }

    pub async fn get(&self, item_id: i64) -> Result<Option<CanonicalItem>> {
        let row = sqlx::query_as::<_, CanonicalItem>("SELECT * FROM canonical_items WHERE item_id = ?")
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Rows ordered by `max_profit` descending, rows without one last.
    pub async fn list(&self, min_roi: Option<f64>, limit: i64) -> Result<Vec<CanonicalItem>> {
        let rows = sqlx::query_as::<_, CanonicalItem>(
            r#"
            SELECT * FROM canonical_items
            WHERE ? IS NULL OR roi_percent >= ?
            ORDER BY max_profit IS NULL, max_profit DESC, item_id ASC
            LIMIT ?
            "#,
        )
        .bind(min_roi)
        .bind(min_roi)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

fn build_upsert_sql() -> String {
    let mut columns: Vec<String> = CORE_COLUMNS.iter().map(|c| c.to_string()).collect();
    for w in Window::ALL {
        let s = w.as_str();
        columns.push(format!("volume_{s}"));
        columns.push(format!("turnover_{s}"));
        columns.push(format!("trend_{s}"));
        columns.push(format!("buy_sell_rate_{s}"));
    }
    let placeholders = vec!["?"; columns.len()].join(", ");
    let updates = columns
        .iter()
        .skip(1)
        .map(|c| format!("{c} = excluded.{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO canonical_items ({}) VALUES ({placeholders}) ON CONFLICT(item_id) DO UPDATE SET {updates}",
        columns.join(", ")
    )
}
