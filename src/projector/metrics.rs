use crate::config::{GE_TAX_CAP, GE_TAX_RATE, TAX_EXEMPT_ITEMS};
use crate::db::models::WindowMetrics;
use crate::trend::round2;
use crate::types::PricePoint;

/// Sell-side marketplace fee for one unit sold at `sell_price`.
pub fn ge_tax(sell_price: i64, item_name: Option<&str>) -> i64 {
    if item_name.is_some_and(is_tax_exempt) {
        return 0;
    }
    ((sell_price as f64 * GE_TAX_RATE).floor() as i64).min(GE_TAX_CAP)
}

pub fn is_tax_exempt(name: &str) -> bool {
    TAX_EXEMPT_ITEMS.iter().any(|n| n.eq_ignore_ascii_case(name))
}

/// Margin-derived fields for one buy (`low`) / sell (`high`) pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Margins {
    pub margin: i64,
    pub roi_percent: Option<f64>,
    pub spread_percent: Option<f64>,
    pub max_profit: Option<i64>,
    pub max_investment: Option<i64>,
}

pub fn margins(high: i64, low: i64, buy_limit: Option<i64>, item_name: Option<&str>) -> Margins {
    let margin = high - ge_tax(high, item_name) - low;
    let (roi_percent, spread_percent) = if low > 0 {
        (
            Some(round2(margin as f64 / low as f64 * 100.0)),
            Some(round2((high - low) as f64 / low as f64 * 100.0)),
        )
    } else {
        (None, None)
    };
    Margins {
        margin,
        roi_percent,
        spread_percent,
        max_profit: buy_limit.map(|l| margin.saturating_mul(l)),
        max_investment: buy_limit.map(|l| low.saturating_mul(l)),
    }
}

/// Volume, turnover and buy/sell rate over the points of one window. `trend`
/// is left for the caller.
pub fn window_aggregates(points: &[PricePoint]) -> WindowMetrics {
    if points.is_empty() {
        return WindowMetrics::default();
    }

    let mut buy_volume = 0i64;
    let mut sell_volume = 0i64;
    let mut turnover = 0.0f64;
    for p in points {
        let hv = p.high_volume.unwrap_or(0);
        let lv = p.low_volume.unwrap_or(0);
        buy_volume += hv;
        sell_volume += lv;
        turnover += p.avg_high.unwrap_or(0.0) * hv as f64 + p.avg_low.unwrap_or(0.0) * lv as f64;
    }

    WindowMetrics {
        volume: Some(buy_volume + sell_volume),
        turnover: Some(turnover.round()),
        trend: None,
        buy_sell_rate: (sell_volume > 0).then(|| round2(buy_volume as f64 / sell_volume as f64)),
    }
}
