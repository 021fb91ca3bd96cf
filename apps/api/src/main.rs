mod config;
mod db;
mod errors;
mod identity;
mod live;
mod models;
mod rename;
mod review;
mod routes;
mod state;
mod storage;
mod store;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::db::create_pool;
use crate::identity::{IdentityService, PgAuthProvider, TokenIssuer};
use crate::live::LiveHub;
use crate::rename::RenameService;
use crate::review::service::ReviewService;
use crate::routes::build_router;
use crate::state::AppState;
use crate::storage::S3BlobStore;
use crate::store::{PgProfileStore, PgRenameLedger, PgResumeStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting ReviewDesk API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let db = create_pool(&config.database_url).await?;

    // Live updates: Redis pub/sub when configured, in-process otherwise
    let live = match &config.redis_url {
        Some(url) => {
            let client = redis::Client::open(url.as_str()).context("Invalid REDIS_URL")?;
            let hub = LiveHub::with_redis(client);
            hub.spawn_bridge();
            info!("Live updates fan out through Redis");
            hub
        }
        None => {
            warn!("REDIS_URL not set, live updates only reach this instance");
            LiveHub::local()
        }
    };

    // Initialize S3 / MinIO
    let blobs = Arc::new(S3BlobStore::from_config(&config).await);
    info!("S3 client initialized (bucket: {})", config.s3_bucket);

    let profiles = Arc::new(PgProfileStore::new(db.clone()));
    let review = ReviewService::new(
        Arc::new(PgResumeStore::new(db.clone())),
        profiles.clone(),
        blobs,
        live,
        config.max_upload_bytes,
    );
    let identity = IdentityService::new(
        Arc::new(PgAuthProvider::new(db.clone())),
        profiles.clone(),
        TokenIssuer::new(&config.jwt_secret, config.jwt_ttl_hours),
    );
    let rename = RenameService::new(
        review.clone(),
        profiles,
        Arc::new(PgRenameLedger::new(db)),
    );

    // Pick up name changes interrupted by the last shutdown
    rename.resume_unfinished().await?;

    spawn_upload_sweeper(review.clone(), config.upload_sweep_after);

    // Build app state
    let state = AppState {
        identity,
        review,
        rename,
        config: config.clone(),
    };

    // Build router
    let app = build_router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(TimeoutLayer::new(config.request_timeout))
            .layer(CorsLayer::permissive()),
    );

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Periodically removes resumes whose upload never completed.
fn spawn_upload_sweeper(review: ReviewService, after: std::time::Duration) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(after.max(std::time::Duration::from_secs(60)) / 2);
        loop {
            tick.tick().await;
            let cutoff = match chrono::Duration::from_std(after) {
                Ok(age) => chrono::Utc::now() - age,
                Err(e) => {
                    warn!("Upload sweep disabled, bad interval: {e}");
                    return;
                }
            };
            if let Err(e) = review.sweep_stale_uploads(cutoff).await {
                warn!("Upload sweep failed: {e}");
            }
        }
    });
}
