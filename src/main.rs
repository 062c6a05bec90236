use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod db;
mod state;

use searchlight_backend::config;
use searchlight_backend::es::EsClient;
use searchlight_backend::sync;
use searchlight_backend::sync::blocked::BlocklistSync;
use searchlight_backend::sync::claims::ClaimSync;
use searchlight_backend::sync::counters::CounterSync;
use state::{AppState, SearchCache};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "searchlight_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration / 加载配置
    let mut app_config = config::load_config().map_err(anyhow::Error::msg)?;

    // Deployment overrides / 部署环境覆盖
    if let Ok(url) = std::env::var("DATABASE_URL") {
        app_config.chainquery.url = url;
    }
    if let Ok(url) = std::env::var("ELASTIC_URL") {
        app_config.elastic.url = url;
    }
    config::init_config(app_config.clone());

    // Create state directory if not exists / 创建状态目录
    let state_dir = std::path::PathBuf::from(&app_config.sync.state_dir);
    if !state_dir.exists() {
        std::fs::create_dir_all(&state_dir)?;
        tracing::info!("Created state directory: {:?}", state_dir);
    }

    let pool = db::connect_chainquery(&app_config.chainquery).await?;
    tracing::info!("Connected to chainquery at {}", app_config.chainquery.url);

    let es = EsClient::new(&app_config.elastic.url);
    es.ping()
        .await
        .with_context(|| format!("index engine unreachable at {}", app_config.elastic.url))?;
    es.ensure_claims_index().await?;
    tracing::info!("Index engine ready at {}", app_config.elastic.url);

    let claim_sync = ClaimSync::new(pool.clone(), es.clone());
    let counter_sync = CounterSync::new(es.clone());
    let blocklist_sync = BlocklistSync::new(pool.clone(), es.clone());

    let app_state = Arc::new(AppState {
        db: pool,
        es,
        search_cache: SearchCache::new(Duration::from_secs(app_config.search.cache_ttl_secs)),
        total_searches: AtomicU64::new(0),
        claim_sync: claim_sync.clone(),
        counter_sync: counter_sync.clone(),
        blocklist_sync: blocklist_sync.clone(),
    });

    sync::spawn_jobs(claim_sync, counter_sync, blocklist_sync);

    let app = Router::new()
        .route("/search", get(api::search::search))
        .route("/autocomplete", get(api::search::autocomplete))
        .route("/status", get(api::status::status))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let bind_addr = app_config.get_bind_address();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("could not bind {}", bind_addr))?;
    tracing::info!("Listening on {}", bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}
