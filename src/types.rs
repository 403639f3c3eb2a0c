use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Current wall-clock time in epoch seconds.
pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

// ---------------------------------------------------------------------------
// Granularity
// ---------------------------------------------------------------------------

/// Sampling resolution of a stored price series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Granularity {
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "6h")]
    SixHours,
    #[serde(rename = "24h")]
    OneDay,
}

impl Granularity {
    pub const ALL: [Granularity; 4] = [
        Granularity::FiveMinutes,
        Granularity::OneHour,
        Granularity::SixHours,
        Granularity::OneDay,
    ];

    pub fn interval_secs(self) -> i64 {
        match self {
            Granularity::FiveMinutes => 300,
            Granularity::OneHour => 3_600,
            Granularity::SixHours => 21_600,
            Granularity::OneDay => 86_400,
        }
    }

    /// Position in [`Granularity::ALL`], used to index per-granularity arrays.
    pub fn index(self) -> usize {
        match self {
            Granularity::FiveMinutes => 0,
            Granularity::OneHour => 1,
            Granularity::SixHours => 2,
            Granularity::OneDay => 3,
        }
    }

    pub fn table(self) -> &'static str {
        match self {
            Granularity::FiveMinutes => "price_5m",
            Granularity::OneHour => "price_1h",
            Granularity::SixHours => "price_6h",
            Granularity::OneDay => "price_24h",
        }
    }

    /// Path segment of the upstream endpoint and the public label.
    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::FiveMinutes => "5m",
            Granularity::OneHour => "1h",
            Granularity::SixHours => "6h",
            Granularity::OneDay => "24h",
        }
    }

    /// End of the most recently closed interval at `now`.
    pub fn closed_interval_end(self, now: i64) -> i64 {
        let interval = self.interval_secs();
        now.div_euclid(interval) * interval
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Granularity {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "5m" => Ok(Granularity::FiveMinutes),
            "1h" => Ok(Granularity::OneHour),
            "6h" => Ok(Granularity::SixHours),
            "24h" => Ok(Granularity::OneDay),
            other => Err(AppError::BadRequest(format!("unknown granularity '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Lookback windows
// ---------------------------------------------------------------------------

/// Lookback window of a derived metric (trend, volume, turnover, buy/sell rate).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Window {
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "6h")]
    SixHours,
    #[serde(rename = "24h")]
    OneDay,
    #[serde(rename = "7d")]
    SevenDays,
    #[serde(rename = "1m")]
    OneMonth,
}

impl Window {
    pub const ALL: [Window; 6] = [
        Window::FiveMinutes,
        Window::OneHour,
        Window::SixHours,
        Window::OneDay,
        Window::SevenDays,
        Window::OneMonth,
    ];

    /// Column suffix in `canonical_items` and the public label.
    pub fn as_str(self) -> &'static str {
        match self {
            Window::FiveMinutes => "5m",
            Window::OneHour => "1h",
            Window::SixHours => "6h",
            Window::OneDay => "24h",
            Window::SevenDays => "7d",
            Window::OneMonth => "1m",
        }
    }

    pub fn period_secs(self) -> i64 {
        match self {
            Window::FiveMinutes => 300,
            Window::OneHour => 3_600,
            Window::SixHours => 21_600,
            Window::OneDay => 86_400,
            Window::SevenDays => 604_800,
            Window::OneMonth => 2_592_000,
        }
    }

    /// Series the window is resolved against. Coarser windows read coarser
    /// tables because the fine tables do not retain that far back.
    pub fn source(self) -> Granularity {
        match self {
            Window::FiveMinutes | Window::OneHour | Window::SixHours => Granularity::FiveMinutes,
            Window::OneDay | Window::SevenDays => Granularity::OneHour,
            Window::OneMonth => Granularity::SixHours,
        }
    }

    /// Maximum distance between the lookback target and the accepted point.
    pub fn tolerance_secs(self) -> i64 {
        match self {
            Window::FiveMinutes => 120,
            Window::OneHour => 600,
            Window::SixHours => 1_200,
            Window::OneDay => 3_600,
            Window::SevenDays => 21_600,
            Window::OneMonth => 86_400,
        }
    }
}

impl std::fmt::Display for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Window {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Window::ALL
            .into_iter()
            .find(|w| w.as_str() == s)
            .ok_or_else(|| AppError::BadRequest(format!("unknown window '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// Price points
// ---------------------------------------------------------------------------

/// One stored interval reading. `timestamp` is the END of the interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PricePoint {
    pub item_id: i64,
    pub timestamp: i64,
    pub avg_high: Option<f64>,
    pub avg_low: Option<f64>,
    pub high_volume: Option<i64>,
    pub low_volume: Option<i64>,
}

impl PricePoint {
    /// Mean of both sides, or whichever side exists.
    pub fn mid(&self) -> Option<f64> {
        match (self.avg_high, self.avg_low) {
            (Some(h), Some(l)) => Some((h + l) / 2.0),
            (Some(h), None) => Some(h),
            (None, Some(l)) => Some(l),
            (None, None) => None,
        }
    }

    /// A point with neither side is "no data" and is never persisted.
    pub fn has_price(&self) -> bool {
        self.avg_high.is_some() || self.avg_low.is_some()
    }
}

// ---------------------------------------------------------------------------
// Upstream payloads (already decoded)
// ---------------------------------------------------------------------------

/// Instant quote from the `/latest` endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct LatestQuote {
    pub item_id: i64,
    pub high: Option<i64>,
    pub high_time: Option<i64>,
    pub low: Option<i64>,
    pub low_time: Option<i64>,
}

/// Averaged reading for one item over one completed interval.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntervalQuote {
    pub avg_high: Option<f64>,
    pub avg_low: Option<f64>,
    pub high_volume: Option<i64>,
    pub low_volume: Option<i64>,
}

impl IntervalQuote {
    pub fn into_point(self, item_id: i64, timestamp: i64) -> PricePoint {
        PricePoint {
            item_id,
            timestamp,
            avg_high: self.avg_high,
            avg_low: self.avg_low,
            high_volume: self.high_volume,
            low_volume: self.low_volume,
        }
    }
}

/// Item metadata from the `/mapping` endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ItemMeta {
    pub item_id: i64,
    pub name: String,
    pub buy_limit: Option<i64>,
    pub members: bool,
}
