use sqlx::{SqliteConnection, SqlitePool};

use crate::error::Result;

/// The `dirty_items` set: items whose canonical row is stale.
#[derive(Clone)]
pub struct DirtyQueue {
    pool: SqlitePool,
}

impl DirtyQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn mark(&self, item_id: i64) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        mark_on(&mut *conn, item_id).await
    }

    /// Queue depth. Read by the scheduler every tick.
    pub async fn depth(&self) -> Result<i64> {
        let depth: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dirty_items")
            .fetch_one(&self.pool)
            .await?;
        Ok(depth)
    }

    /// Current members, lowest item id first.
    pub async fn snapshot(&self) -> Result<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar("SELECT item_id FROM dirty_items ORDER BY item_id")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    /// Take an item off the queue before projecting it. Returns false when
    /// another refresh already claimed it. A write that lands after the claim
    /// marks the item again, so the flag is never lost to a stale projection.
    pub async fn claim(&self, item_id: i64) -> Result<bool> {
        let res = sqlx::query("DELETE FROM dirty_items WHERE item_id = ?")
            .bind(item_id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }
}

/// Mark inside an existing transaction so the write and its dirty flag land together.
pub(crate) async fn mark_on(conn: &mut SqliteConnection, item_id: i64) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO dirty_items (item_id) VALUES (?)")
        .bind(item_id)
        .execute(conn)
        .await?;
    Ok(())
}
