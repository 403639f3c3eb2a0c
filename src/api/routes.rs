use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::config::Retention;
use crate::db::models::CanonicalItem;
use crate::db::{CanonicalRepo, DirtyQueue, SeriesStore};
use crate::error::{AppError, Result};
use crate::scheduler::stats::JobSnapshot;
use crate::scheduler::JobStats;
use crate::trend::{TrendResolution, TrendResolver};
use crate::types::{unix_now, Granularity, PricePoint, Window};

const DEFAULT_LIST_LIMIT: i64 = 100;
const MAX_LIST_LIMIT: i64 = 1_000;

#[derive(Clone)]
pub struct ApiState {
    pub series: SeriesStore,
    pub canonical: CanonicalRepo,
    pub dirty: DirtyQueue,
    pub resolver: TrendResolver,
    pub stats: Arc<JobStats>,
}

impl ApiState {
    pub fn new(pool: sqlx::SqlitePool, retention: Retention, stats: Arc<JobStats>) -> Self {
        let series = SeriesStore::new(pool.clone());
        Self {
            resolver: TrendResolver::new(series.clone(), retention),
            series,
            canonical: CanonicalRepo::new(pool.clone()),
            dirty: DirtyQueue::new(pool),
            stats,
        }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/items", get(get_items))
        .route("/items/:id", get(get_item))
        .route("/items/:id/prices", get(get_item_prices))
        .route("/items/:id/trends", get(get_item_trends))
        .route("/items/:id/trends/:window", get(get_item_trend))
        .route("/stats/jobs", get(get_stats_jobs))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct ItemsQuery {
    pub limit: Option<i64>,
    pub min_roi: Option<f64>,
}

#[derive(Deserialize)]
pub struct PricesQuery {
    pub granularity: Option<String>,
    pub since: Option<i64>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct PricesResponse {
    pub item_id: i64,
    pub granularity: Granularity,
    pub points: Vec<PricePoint>,
}

#[derive(Debug, Serialize)]
pub struct TrendResponse {
    #[serde(flatten)]
    pub resolution: TrendResolution,
    pub formula: String,
}

#[derive(Debug, Serialize)]
pub struct JobsResponse {
    pub dirty_depth: i64,
    pub series_rows: BTreeMap<Granularity, i64>,
    pub jobs: Vec<JobSnapshot>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_items(
    State(state): State<ApiState>,
    Query(params): Query<ItemsQuery>,
) -> Result<Json<Vec<CanonicalItem>>> {
    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    if !(1..=MAX_LIST_LIMIT).contains(&limit) {
        return Err(AppError::BadRequest(format!(
            "limit must be between 1 and {MAX_LIST_LIMIT}"
        )));
    }
    let rows = state.canonical.list(params.min_roi, limit).await?;
    Ok(Json(rows))
}

async fn get_item(
    State(state): State<ApiState>,
    Path(item_id): Path<i64>,
) -> Result<Json<CanonicalItem>> {
    state
        .canonical
        .get(item_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("item {item_id}")))
}

async fn get_item_prices(
    State(state): State<ApiState>,
    Path(item_id): Path<i64>,
    Query(params): Query<PricesQuery>,
) -> Result<Json<PricesResponse>> {
    let granularity = match params.granularity.as_deref() {
        Some(g) => g.parse::<Granularity>()?,
        None => Granularity::FiveMinutes,
    };
    let now = unix_now();
    let since = params
        .since
        .unwrap_or_else(|| now - granularity.interval_secs() * 288);
    let points = state.series.range(item_id, granularity, since, now).await?;
    Ok(Json(PricesResponse { item_id, granularity, points }))
}

/// Live trend percentages for every window.
async fn get_item_trends(
    State(state): State<ApiState>,
    Path(item_id): Path<i64>,
) -> Result<Json<BTreeMap<Window, Option<f64>>>> {
    let now = unix_now();
    let mut trends = BTreeMap::new();
    for w in Window::ALL {
        trends.insert(w, state.resolver.resolve_trend(item_id, w, now).await?);
    }
    Ok(Json(trends))
}

/// Live trend audit: the two points, target and tolerance behind a trend.
async fn get_item_trend(
    State(state): State<ApiState>,
    Path((item_id, window)): Path<(i64, String)>,
) -> Result<Json<TrendResponse>> {
    let window: Window = window.parse()?;
    let resolution = state.resolver.resolve(item_id, window, unix_now()).await?;
    let formula = resolution.formula();
    Ok(Json(TrendResponse { resolution, formula }))
}

async fn get_stats_jobs(State(state): State<ApiState>) -> Result<Json<JobsResponse>> {
    let mut series_rows = BTreeMap::new();
    for g in Granularity::ALL {
        series_rows.insert(g, state.series.count(g).await?);
    }
    Ok(Json(JobsResponse {
        dirty_depth: state.dirty.depth().await?,
        series_rows,
        jobs: state.stats.snapshot(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;

    async fn state() -> ApiState {
        ApiState::new(memory_pool().await, Retention::default(), Arc::new(JobStats::new()))
    }

    #[tokio::test]
    async fn missing_item_is_not_found() {
        let state = state().await;
        let err = get_item(State(state), Path(42)).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn unknown_window_is_bad_request() {
        let state = state().await;
        let err = get_item_trend(State(state), Path((2, "3d".to_string())))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn prices_default_to_recent_five_minute_points() {
        let state = state().await;
        let now = unix_now();
        let ts = Granularity::FiveMinutes.closed_interval_end(now);
        let point = PricePoint {
            item_id: 2,
            timestamp: ts,
            avg_high: Some(150.0),
            avg_low: Some(140.0),
            high_volume: Some(3),
            low_volume: Some(4),
        };
        state.series.upsert(Granularity::FiveMinutes, &point).await.unwrap();

        let Json(res) = get_item_prices(
            State(state),
            Path(2),
            Query(PricesQuery { granularity: None, since: None }),
        )
        .await
        .unwrap();
        assert_eq!(res.granularity, Granularity::FiveMinutes);
        assert_eq!(res.points, vec![point]);
    }

    #[tokio::test]
    async fn items_limit_is_bounded() {
        let state = state().await;
        let err = get_items(State(state), Query(ItemsQuery { limit: Some(0), min_roi: None }))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn job_stats_include_dirty_depth() {
        let state = state().await;
        state.dirty.mark(7).await.unwrap();
        let Json(res) = get_stats_jobs(State(state)).await.unwrap();
        assert_eq!(res.dirty_depth, 1);
        assert_eq!(res.series_rows.get(&Granularity::OneDay), Some(&0));
        assert!(res.jobs.is_empty());
    }

    #[tokio::test]
    async fn trends_cover_every_window_with_nulls_when_empty() {
        let state = state().await;
        let Json(trends) = get_item_trends(State(state), Path(2)).await.unwrap();
        assert_eq!(trends.len(), Window::ALL.len());
        assert!(trends.values().all(Option::is_none));
        let json = serde_json::to_value(&trends).unwrap();
        assert!(json.get("7d").is_some());
    }
}
