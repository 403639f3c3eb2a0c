pub mod client;
pub mod messages;

pub use client::WikiClient;

use std::collections::HashMap;
use std::future::Future;

use crate::error::Result;
use crate::types::{Granularity, IntervalQuote, ItemMeta, LatestQuote};

/// Boundary to the upstream price API.
///
/// Interval snapshots are addressed by the END of the interval, the only
/// timestamp convention used anywhere in this crate.
pub trait PriceFeed: Send + Sync + 'static {
    /// Instant high/low quotes for every traded item.
    fn latest(&self) -> impl Future<Output = Result<HashMap<i64, LatestQuote>>> + Send;

    /// Averaged quotes for the completed interval ending at `end_ts`.
    fn interval(
        &self,
        granularity: Granularity,
        end_ts: i64,
    ) -> impl Future<Output = Result<HashMap<i64, IntervalQuote>>> + Send;

    /// Item names and buy limits.
    fn mapping(&self) -> impl Future<Output = Result<Vec<ItemMeta>>> + Send;
}
