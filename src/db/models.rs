//! Row types for the derived `canonical_items` table.
use std::collections::BTreeMap;

use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

use crate::types::Window;

/// Per-window derived metrics. Every field is independently nullable: a
/// missing value means the series did not cover the window, not zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WindowMetrics {
    pub volume: Option<i64>,
    pub turnover: Option<f64>,
    pub trend: Option<f64>,
    pub buy_sell_rate: Option<f64>,
}

/// The denormalized row the API serves. Written only by the projector.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CanonicalItem {
    pub item_id: i64,
    pub name: Option<String>,
    pub buy_limit: Option<i64>,
    pub high: Option<i64>,
    pub low: Option<i64>,
    pub margin: Option<i64>,
    pub roi_percent: Option<f64>,
    pub spread_percent: Option<f64>,
    pub max_profit: Option<i64>,
    pub max_investment: Option<i64>,
    pub windows: BTreeMap<Window, WindowMetrics>,
    pub updated_at: i64,
}

impl CanonicalItem {
    pub fn window(&self, w: Window) -> Option<&WindowMetrics> {
        self.windows.get(&w)
    }
}

impl<'r> FromRow<'r, SqliteRow> for CanonicalItem {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let mut windows = BTreeMap::new();
        for w in Window::ALL {
            let suffix = w.as_str();
            windows.insert(
                w,
                WindowMetrics {
                    volume: row.try_get(format!("volume_{suffix}").as_str())?,
                    turnover: row.try_get(format!("turnover_{suffix}").as_str())?,
                    trend: row.try_get(format!("trend_{suffix}").as_str())?,
                    buy_sell_rate: row.try_get(format!("buy_sell_rate_{suffix}").as_str())?,
                },
            );
        }

        Ok(Self {
            item_id: row.try_get("item_id")?,
            name: row.try_get("name")?,
            buy_limit: row.try_get("buy_limit")?,
            high: row.try_get("high")?,
            low: row.try_get("low")?,
            margin: row.try_get("margin")?,
            roi_percent: row.try_get("roi_percent")?,
            spread_percent: row.try_get("spread_percent")?,
            max_profit: row.try_get("max_profit")?,
            max_investment: row.try_get("max_investment")?,
            windows,
            updated_at: row.try_get("updated_at")?,
        })
    }
}
