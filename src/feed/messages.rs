use std::collections::HashMap;

use serde::Deserialize;

use crate::error::Result;
use crate::types::{IntervalQuote, ItemMeta, LatestQuote};

/// A keyed snapshot plus the keys dropped because they were not numeric
/// item ids.
#[derive(Debug)]
pub struct Keyed<T> {
    pub quotes: HashMap<i64, T>,
    pub bad_keys: Vec<String>,
}

impl<T> Keyed<T> {
    fn collect<R>(data: HashMap<String, R>, convert: impl Fn(i64, R) -> T) -> Self {
        let mut quotes = HashMap::with_capacity(data.len());
        let mut bad_keys = Vec::new();
        for (key, raw) in data {
            match key.parse::<i64>() {
                Ok(item_id) => {
                    quotes.insert(item_id, convert(item_id, raw));
                }
                Err(_) => bad_keys.push(key),
            }
        }
        Self { quotes, bad_keys }
    }
}

/// Envelope shared by `/latest` and the interval endpoints: `{"data": {"<id>": {...}}}`.
/// Interval responses also carry the interval START as `timestamp`; the
/// client already knows which interval it asked for, so it is not read.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: HashMap<String, T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLatest {
    high: Option<i64>,
    high_time: Option<i64>,
    low: Option<i64>,
    low_time: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawInterval {
    avg_high_price: Option<f64>,
    avg_low_price: Option<f64>,
    high_price_volume: Option<i64>,
    low_price_volume: Option<i64>,
}

/// One entry of the `/mapping` array. Only the fields the projector needs.
#[derive(Debug, Deserialize)]
struct RawMapping {
    id: i64,
    name: String,
    limit: Option<i64>,
    #[serde(default)]
    members: bool,
}

/// Decode a `/latest` body into quotes keyed by item id.
pub fn parse_latest(raw: &str) -> Result<Keyed<LatestQuote>> {
    let env: Envelope<RawLatest> = serde_json::from_str(raw)?;
    Ok(Keyed::collect(env.data, |item_id, v| LatestQuote {
        item_id,
        high: v.high,
        high_time: v.high_time,
        low: v.low,
        low_time: v.low_time,
    }))
}

/// Decode a `/5m`, `/1h`, `/6h` or `/24h` body into averaged quotes keyed by item id.
pub fn parse_interval(raw: &str) -> Result<Keyed<IntervalQuote>> {
    let env: Envelope<RawInterval> = serde_json::from_str(raw)?;
    Ok(Keyed::collect(env.data, |_, v| IntervalQuote {
        avg_high: v.avg_high_price,
        avg_low: v.avg_low_price,
        high_volume: v.high_price_volume,
        low_volume: v.low_price_volume,
    }))
}

pub fn parse_mapping(raw: &str) -> Result<Vec<ItemMeta>> {
    let rows: Vec<RawMapping> = serde_json::from_str(raw)?;
    Ok(rows
        .into_iter()
        .map(|m| ItemMeta {
            item_id: m.id,
            name: m.name,
            buy_limit: m.limit,
            members: m.members,
        })
        .collect())
}
