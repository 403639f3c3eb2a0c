use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::feed::messages::{parse_interval, parse_latest, parse_mapping, Keyed};
use crate::feed::PriceFeed;
use crate::types::{Granularity, IntervalQuote, ItemMeta, LatestQuote};

/// reqwest-backed client for the OSRS Wiki real-time prices API.
///
/// All requests share one pacing gate so the combined request rate of every
/// concurrently running job stays under `feed_min_spacing`.
pub struct WikiClient {
    http: reqwest::Client,
    base_url: String,
    min_spacing: Duration,
    last_request: Mutex<Option<Instant>>,
    bad_item_keys: AtomicU64,
}

impl WikiClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.request_timeout)
            .user_agent(cfg.user_agent.clone())
            .build()?;
        Ok(Self {
            http,
            base_url: cfg.prices_api_url.trim_end_matches('/').to_string(),
            min_spacing: cfg.feed_min_spacing,
            last_request: Mutex::new(None),
            bad_item_keys: AtomicU64::new(0),
        })
    }

    /// Count entries dropped for non-numeric keys and hand back the quotes.
    /// Warns for the first ten and then every thousandth.
    fn keep_quotes<T>(&self, parsed: Keyed<T>) -> HashMap<i64, T> {
        for key in &parsed.bad_keys {
            let count = self.bad_item_keys.fetch_add(1, Ordering::Relaxed) + 1;
            if count <= 10 || count % 1000 == 0 {
                warn!(count, "[FEED PARSE] non-numeric item key: {key}");
            }
        }
        parsed.quotes
    }

    /// Non-numeric item keys seen since startup.
    #[cfg(test)]
    pub fn bad_item_keys(&self) -> u64 {
        self.bad_item_keys.load(Ordering::Relaxed)
    }

    /// Wait until at least `min_spacing` has passed since the previous request.
    async fn pace(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let ready_at = prev + self.min_spacing;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        self.pace().await;
        debug!("[FEED] GET {url}");
        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::Upstream {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(resp.text().await?)
    }
}

/// Upstream query parameter for the interval ending at `end_ts`. The API
/// addresses intervals by their start.
pub fn upstream_timestamp(granularity: Granularity, end_ts: i64) -> i64 {
    end_ts - granularity.interval_secs()
}

impl PriceFeed for WikiClient {
    async fn latest(&self) -> Result<HashMap<i64, LatestQuote>> {
        let body = self.get_text(&format!("{}/latest", self.base_url)).await?;
        Ok(self.keep_quotes(parse_latest(&body)?))
    }

    async fn interval(&self, granularity: Granularity, end_ts: i64) -> Result<HashMap<i64, IntervalQuote>> {
        let url = format!(
            "{}/{}?timestamp={}",
            self.base_url,
            granularity.as_str(),
            upstream_timestamp(granularity, end_ts)
        );
        let body = self.get_text(&url).await?;
        Ok(self.keep_quotes(parse_interval(&body)?))
    }

    async fn mapping(&self) -> Result<Vec<ItemMeta>> {
        let body = self.get_text(&format!("{}/mapping", self.base_url)).await?;
        parse_mapping(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_addresses_interval_by_its_start() {
        assert_eq!(upstream_timestamp(Granularity::FiveMinutes, 1_700_000_100), 1_699_999_800);
        assert_eq!(upstream_timestamp(Granularity::OneHour, 7_200), 3_600);
    }

    #[tokio::test(start_paused = true)]
    async fn pacing_spaces_consecutive_requests() {
        let mut cfg = Config::for_tests();
        cfg.feed_min_spacing = Duration::from_millis(500);
        let client = WikiClient::new(&cfg).unwrap();

        let started = Instant::now();
        client.pace().await;
        client.pace().await;
        client.pace().await;
        assert!(started.elapsed() >= Duration::from_millis(1_000));
    }

    #[test]
    fn bad_item_keys_accumulate_per_client() {
        let client = WikiClient::new(&Config::for_tests()).unwrap();
        let raw = r#"{"data":{"abc":{"avgHighPrice":1},"x1":{},"3":{"avgLowPrice":2}}}"#;
        let quotes = client.keep_quotes(parse_interval(raw).unwrap());
        assert_eq!(quotes.len(), 1);
        assert_eq!(client.bad_item_keys(), 2);

        let other = WikiClient::new(&Config::for_tests()).unwrap();
        assert_eq!(other.bad_item_keys(), 0);
    }
}
