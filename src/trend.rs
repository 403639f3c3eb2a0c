//! Percentage change over a lookback window, resolved against gapped series.

use serde::Serialize;

use crate::config::Retention;
use crate::db::SeriesStore;
use crate::error::Result;
use crate::types::{Granularity, PricePoint, Window};

/// The two points and parameters behind one trend value. Kept whole so the
/// audit endpoint can show exactly how a percentage was produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendResolution {
    pub item_id: i64,
    pub window: Window,
    pub source: Granularity,
    /// `current.timestamp − period`; None without a current point.
    pub target: Option<i64>,
    pub tolerance_secs: i64,
    pub current: Option<PricePoint>,
    pub previous: Option<PricePoint>,
    pub percent: Option<f64>,
}

impl TrendResolution {
    /// Human-readable derivation, e.g. `100 * (110 - 100) / 100 = 10.00%`.
    pub fn formula(&self) -> String {
        let current_mid = self.current.as_ref().and_then(PricePoint::mid);
        let previous_mid = self.previous.as_ref().and_then(PricePoint::mid);
        match (current_mid, previous_mid, self.percent) {
            (Some(c), Some(p), Some(pct)) => format!("100 * ({c} - {p}) / {p} = {pct:.2}%"),
            (Some(_), Some(p), None) if p == 0.0 => "previous mid is 0; no trend".to_string(),
            (None, _, _) => format!("no {} point at or before now", self.source),
            (Some(_), None, _) => match self.target {
                Some(t) => format!(
                    "no {} point within {}s of {t}",
                    self.source, self.tolerance_secs
                ),
                None => "no lookback target".to_string(),
            },
            _ => "no trend".to_string(),
        }
    }
}

/// `100 * (current − previous) / previous`, rounded to 2 decimals. None when
/// the previous mid is zero.
pub fn percent_change(current_mid: f64, previous_mid: f64) -> Option<f64> {
    if previous_mid == 0.0 {
        return None;
    }
    Some(round2(100.0 * (current_mid - previous_mid) / previous_mid))
}

pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[derive(Clone)]
pub struct TrendResolver {
    store: SeriesStore,
    retention: Retention,
}

impl TrendResolver {
    pub fn new(store: SeriesStore, retention: Retention) -> Self {
        Self { store, retention }
    }

    pub async fn resolve(&self, item_id: i64, window: Window, now: i64) -> Result<TrendResolution> {
        let source = window.source();
        let tolerance_secs = window.tolerance_secs();
        let mut res = TrendResolution {
            item_id,
            window,
            source,
            target: None,
            tolerance_secs,
            current: None,
            previous: None,
            percent: None,
        };

        // Latest available point: anything within the source's retention.
        let current = self
            .store
            .nearest(item_id, source, now, self.retention.secs(source), now)
            .await?;
        let Some(current) = current else {
            return Ok(res);
        };

        let target = current.timestamp - window.period_secs();
        let previous = self
            .store
            .nearest(item_id, source, target, tolerance_secs, current.timestamp)
            .await?;

        res.percent = match (current.mid(), previous.as_ref().and_then(PricePoint::mid)) {
            (Some(c), Some(p)) => percent_change(c, p),
            _ => None,
        };
        res.target = Some(target);
        res.current = Some(current);
        res.previous = previous;
        Ok(res)
    }

    /// The trend percentage alone.
    pub async fn resolve_trend(&self, item_id: i64, window: Window, now: i64) -> Result<Option<f64>> {
        Ok(self.resolve(item_id, window, now).await?.percent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;

    // 2024-01-01T12:00:00Z
    const NOON: i64 = 1_704_067_200 + 12 * 3_600;

    fn pt(item_id: i64, timestamp: i64, avg_high: Option<f64>, avg_low: Option<f64>) -> PricePoint {
        PricePoint { item_id, timestamp, avg_high, avg_low, high_volume: Some(1), low_volume: Some(1) }
    }

    async fn resolver() -> (SeriesStore, TrendResolver) {
        let store = SeriesStore::new(memory_pool().await);
        let resolver = TrendResolver::new(store.clone(), Retention::default());
        (store, resolver)
    }

    #[test]
    fn percent_change_rounds_and_refuses_zero_base() {
        assert_eq!(percent_change(110.0, 100.0), Some(10.0));
        assert_eq!(percent_change(100.0, 300.0), Some(-66.67));
        assert_eq!(percent_change(5.0, 0.0), None);
    }

    #[tokio::test]
    async fn six_hour_trend_from_mid_prices() {
        let (store, resolver) = resolver().await;
        let g = Granularity::FiveMinutes;
        store.upsert(g, &pt(1, NOON, Some(120.0), Some(100.0))).await.unwrap();
        store.upsert(g, &pt(1, NOON - 21_600, Some(100.0), Some(100.0))).await.unwrap();

        let res = resolver.resolve(1, Window::SixHours, NOON + 200).await.unwrap();
        assert_eq!(res.percent, Some(10.0));
        assert_eq!(res.target, Some(NOON - 21_600));
        assert_eq!(res.previous.as_ref().map(|p| p.timestamp), Some(NOON - 21_600));
        assert_eq!(res.formula(), "100 * (110 - 100) / 100 = 10.00%");
    }

    #[tokio::test]
    async fn previous_outside_tolerance_gives_null_not_zero() {
        let (store, resolver) = resolver().await;
        let g = Granularity::FiveMinutes;
        store.upsert(g, &pt(1, NOON, Some(100.0), Some(100.0))).await.unwrap();
        // 25 minutes away from the 6h target; tolerance is 20 minutes.
        store.upsert(g, &pt(1, NOON - 21_600 + 1_500, Some(100.0), Some(100.0))).await.unwrap();

        let res = resolver.resolve(1, Window::SixHours, NOON).await.unwrap();
        assert!(res.current.is_some());
        assert!(res.previous.is_none());
        assert_eq!(res.percent, None);
        assert!(res.formula().contains("within 1200s"), "{}", res.formula());
    }

    #[tokio::test]
    async fn zero_previous_mid_gives_null() {
        let (store, resolver) = resolver().await;
        let g = Granularity::FiveMinutes;
        store.upsert(g, &pt(1, NOON, Some(10.0), Some(10.0))).await.unwrap();
        store.upsert(g, &pt(1, NOON - 3_600, Some(0.0), Some(0.0))).await.unwrap();

        assert_eq!(resolver.resolve_trend(1, Window::OneHour, NOON).await.unwrap(), None);
    }

    #[tokio::test]
    async fn no_data_gives_empty_resolution() {
        let (_store, resolver) = resolver().await;
        let res = resolver.resolve(1, Window::SevenDays, NOON).await.unwrap();
        assert_eq!(res.current, None);
        assert_eq!(res.target, None);
        assert_eq!(res.percent, None);
    }

    #[tokio::test]
    async fn current_is_the_latest_point_not_after_now() {
        let (store, resolver) = resolver().await;
        let g = Granularity::OneHour;
        store.upsert(g, &pt(1, NOON - 3_600, Some(200.0), Some(200.0))).await.unwrap();
        store.upsert(g, &pt(1, NOON, Some(300.0), Some(300.0))).await.unwrap();
        store.upsert(g, &pt(1, NOON - 86_400, Some(100.0), Some(100.0))).await.unwrap();

        // At 11:30 the noon point is in the future and must be ignored.
        let res = resolver.resolve(1, Window::OneDay, NOON - 1_800).await.unwrap();
        assert_eq!(res.current.as_ref().map(|p| p.timestamp), Some(NOON - 3_600));
        // Target is 11:00 yesterday; the 12:00 yesterday point is within an hour.
        assert_eq!(res.previous.as_ref().map(|p| p.timestamp), Some(NOON - 86_400));
        assert_eq!(res.percent, Some(100.0));
    }

    #[tokio::test]
    async fn one_sided_previous_loses_to_two_sided_neighbour() {
        let (store, resolver) = resolver().await;
        let g = Granularity::FiveMinutes;
        let target = NOON - 3_600;
        store.upsert(g, &pt(1, NOON, Some(110.0), Some(110.0))).await.unwrap();
        store.upsert(g, &pt(1, target, Some(500.0), None)).await.unwrap();
        store.upsert(g, &pt(1, target + 300, Some(100.0), Some(100.0))).await.unwrap();

        let res = resolver.resolve(1, Window::OneHour, NOON).await.unwrap();
        assert_eq!(res.previous.as_ref().map(|p| p.timestamp), Some(target + 300));
        assert_eq!(res.percent, Some(10.0));
    }
}
