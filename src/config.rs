use std::time::Duration;

use crate::error::{AppError, Result};
use crate::types::Granularity;

pub const PRICES_API_URL: &str = "https://prices.runescape.wiki/api/v1/osrs";

/// The wiki asks every client to identify itself; anonymous agents get blocked.
pub const DEFAULT_USER_AGENT: &str = "ge-price-ingest/0.1 (set USER_AGENT to a contact address)";

/// Channel capacity for job completion reports.
pub const CHANNEL_CAPACITY: usize = 1024;

/// Coordination loop resolution (seconds).
pub const SCHEDULER_TICK_SECS: u64 = 1;

/// Longest the coordinator waits on the dirty-queue depth before deciding
/// with the previous reading.
pub const DEPTH_READ_TIMEOUT_MS: u64 = 500;

/// Live `/latest` poll cadence (seconds within the minute).
pub const LIVE_POLL_EVERY_SECS: i64 = 15;

/// Per-granularity polls wait this many seconds past the boundary so upstream
/// has settled the interval that just closed.
pub const POLL_SETTLE_SECS: i64 = 30;

/// Cleanup runs every N minutes at `CLEANUP_OFFSET_MINUTE`.
pub const CLEANUP_EVERY_MINUTES: i64 = 10;
pub const CLEANUP_OFFSET_MINUTE: i64 = 7;

/// Marketplace fee charged on the sell side.
pub const GE_TAX_RATE: f64 = 0.02;
pub const GE_TAX_CAP: i64 = 5_000_000;

/// Items exempt from the marketplace fee.
pub const TAX_EXEMPT_ITEMS: &[&str] = &[
    "Old school bond",
    "Chisel",
    "Gardening trowel",
    "Glassblowing pipe",
    "Hammer",
    "Needle",
    "Pestle and mortar",
    "Rake",
    "Saw",
    "Secateurs",
    "Seed dibber",
    "Shears",
    "Spade",
    "Watering can(0)",
];

/// Canonical refresh cadence thresholds on dirty-queue depth.
pub mod refresh_cadence {
    pub const IDLE_SECS: i64 = 60;
    pub const LIGHT_MAX_DEPTH: i64 = 200;
    pub const LIGHT_SECS: i64 = 30;
    pub const HEAVY_MAX_DEPTH: i64 = 1_000;
    pub const HEAVY_SECS: i64 = 15;
}

/// Retention per granularity, stated as N base intervals plus one extra step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
    secs: [i64; 4],
}

impl Retention {
    pub fn from_hours(hours: [f64; 4]) -> Self {
        Self { secs: hours.map(hours_to_secs) }
    }

    pub fn secs(&self, g: Granularity) -> i64 {
        self.secs[g.index()]
    }

    /// Rejects windows that cannot hold at least one base interval plus the
    /// extra step. Such a window would yield an empty or reversed grid.
    pub fn validate(&self) -> Result<()> {
        for g in Granularity::ALL {
            let secs = self.secs(g);
            let interval = g.interval_secs();
            if secs < 2 * interval {
                return Err(AppError::Config(format!(
                    "retention for {g} is {secs}s; it must cover at least one {interval}s interval plus the extra step"
                )));
            }
        }
        Ok(())
    }
}

impl Default for Retention {
    /// 24h+5m, 7d+1h, 30d+6h, 365d+24h.
    fn default() -> Self {
        Self::from_hours([24.0 + 5.0 / 60.0, 169.0, 726.0, 8_784.0])
    }
}

/// Hours are rounded to whole seconds, so `24.0833` means exactly 24h+5m.
pub fn hours_to_secs(hours: f64) -> i64 {
    (hours * 3600.0).round() as i64
}

#[derive(Debug, Clone)]
pub struct Config {
    pub prices_api_url: String,
    pub user_agent: String,
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Per-request timeout for upstream calls (REQUEST_TIMEOUT_SECS)
    pub request_timeout: Duration,
    /// Minimum spacing between any two upstream requests (FEED_MIN_SPACING_MS)
    pub feed_min_spacing: Duration,
    /// Fixed pause between historical fetches during backfill (BACKFILL_DELAY_MS)
    pub backfill_delay: Duration,
    /// RETENTION_{5M,1H,6H,24H}_HOURS
    pub retention: Retention,
    /// Run a synchronous backfill of every granularity before scheduling (COLD_START_BACKFILL)
    pub cold_start_backfill: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Retention::default();
        let retention_hours = [
            env_hours("RETENTION_5M_HOURS", defaults.secs(Granularity::FiveMinutes))?,
            env_hours("RETENTION_1H_HOURS", defaults.secs(Granularity::OneHour))?,
            env_hours("RETENTION_6H_HOURS", defaults.secs(Granularity::SixHours))?,
            env_hours("RETENTION_24H_HOURS", defaults.secs(Granularity::OneDay))?,
        ];

        let cfg = Self {
            prices_api_url: std::env::var("PRICES_API_URL")
                .unwrap_or_else(|_| PRICES_API_URL.to_string()),
            user_agent: std::env::var("USER_AGENT")
                .unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "prices.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            request_timeout: Duration::from_secs(env_u64("REQUEST_TIMEOUT_SECS", 30)?),
            feed_min_spacing: Duration::from_millis(env_u64("FEED_MIN_SPACING_MS", 250)?),
            backfill_delay: Duration::from_millis(env_u64("BACKFILL_DELAY_MS", 1_000)?),
            retention: Retention::from_hours(retention_hours),
            cold_start_backfill: std::env::var("COLD_START_BACKFILL")
                .map(|v| !matches!(v.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no"))
                .unwrap_or(true),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.request_timeout.is_zero() {
            return Err(AppError::Config("REQUEST_TIMEOUT_SECS must be positive".to_string()));
        }
        if self.user_agent.trim().is_empty() {
            return Err(AppError::Config("USER_AGENT must not be empty".to_string()));
        }
        self.retention.validate()
    }
}

fn env_u64(key: &str, default: u64) -> Result<u64> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|_| AppError::Config(format!("{key} must be a non-negative integer, got '{raw}'"))),
        Err(_) => Ok(default),
    }
}

fn env_hours(key: &str, default_secs: i64) -> Result<f64> {
    match std::env::var(key) {
        Ok(raw) => {
            let hours = raw
                .trim()
                .parse::<f64>()
                .map_err(|_| AppError::Config(format!("{key} must be a number of hours, got '{raw}'")))?;
            if !hours.is_finite() || hours <= 0.0 {
                return Err(AppError::Config(format!("{key} must be positive, got {hours}")));
            }
            Ok(hours)
        }
        Err(_) => Ok(default_secs as f64 / 3600.0),
    }
}

#[cfg(test)]
impl Config {
    /// Configuration for tests: no pacing, default retention.
    pub fn for_tests() -> Self {
        Self {
            prices_api_url: "http://127.0.0.1:9".to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            log_level: "debug".to_string(),
            db_path: ":memory:".to_string(),
            api_port: 0,
            request_timeout: Duration::from_secs(1),
            feed_min_spacing: Duration::ZERO,
            backfill_delay: Duration::ZERO,
            retention: Retention::default(),
            cold_start_backfill: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_retention_is_base_window_plus_one_step() {
        let r = Retention::default();
        assert_eq!(r.secs(Granularity::FiveMinutes), 86_400 + 300);
        assert_eq!(r.secs(Granularity::OneHour), 7 * 86_400 + 3_600);
        assert_eq!(r.secs(Granularity::SixHours), 30 * 86_400 + 21_600);
        assert_eq!(r.secs(Granularity::OneDay), 366 * 86_400);
        assert!(r.validate().is_ok());
    }

    #[test]
    fn rounded_hours_hit_the_exact_extra_step() {
        assert_eq!(hours_to_secs(24.0833), 86_700);
    }

    #[test]
    fn too_short_retention_is_a_config_error() {
        let r = Retention::from_hours([24.0833, 169.0, 6.0, 8_784.0]);
        match r.validate() {
            Err(AppError::Config(msg)) => assert!(msg.contains("6h"), "{msg}"),
            other => panic!("expected config error, got {other:?}"),
        }
        assert!(Retention::from_hours([0.0, 169.0, 726.0, 8_784.0]).validate().is_err());
    }
}
