mod api;
mod backfill;
mod config;
mod db;
mod error;
mod feed;
mod jobs;
mod projector;
mod scheduler;
mod timegrid;
mod trend;
mod types;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::{router, ApiState};
use crate::config::Config;
use crate::error::Result;
use crate::feed::WikiClient;
use crate::jobs::Jobs;
use crate::scheduler::{JobStats, SchedulerRunner};
use crate::types::unix_now;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let pool = db::connect(&cfg.db_path).await?;
    info!("Database ready at {}", cfg.db_path);

    // --- Upstream feed ---
    let feed = Arc::new(WikiClient::new(&cfg)?);
    let jobs = Arc::new(Jobs::new(pool.clone(), feed, &cfg));
    if let Err(e) = jobs.refresh_mapping(unix_now()).await {
        warn!("Initial mapping refresh failed, names and limits stay empty until the daily poll: {e}");
    }

    // --- HTTP API server ---
    let stats = Arc::new(JobStats::new());
    let app = router(ApiState::new(pool.clone(), cfg.retention, Arc::clone(&stats)));
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");
    let server = tokio::spawn(async move { axum::serve(listener, app).await });

    // --- Cold start: fill every retention window before scheduling ---
    if cfg.cold_start_backfill {
        info!("Cold-start backfill of {} granularities", types::Granularity::ALL.len());
        jobs.cold_start(unix_now()).await;
    } else {
        info!("COLD_START_BACKFILL disabled; gaps are repaired by scheduled backfills");
    }

    // --- Scheduler ---
    let runner = SchedulerRunner::new(jobs, stats);
    tokio::spawn(async move { runner.run().await });

    server.await.map_err(|e| std::io::Error::other(e.to_string()))??;
    Ok(())
}
