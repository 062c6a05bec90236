//! Status endpoint / 状态接口

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use searchlight_backend::es::index;

use crate::api::ApiResponse;
use crate::state::AppState;

/// GET /status / 服务状态
///
/// Reports engine health alongside service-level counters. A failing
/// engine surfaces here as an error instead of a degraded payload.
pub async fn status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Value>>, (StatusCode, Json<Value>)> {
    let health = state.es.cluster_health().await.map_err(|e| {
        tracing::error!("cluster health check failed: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "search backend unavailable" })),
        )
    })?;
    let claims_in_index = state.es.count(index::CLAIMS).await.map_err(|e| {
        tracing::error!("claims count failed: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "search backend unavailable" })),
        )
    })?;

    let chainquery_ok = sqlx::query("SELECT 1").execute(&state.db).await.is_ok();

    Ok(Json(ApiResponse::success(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "build_time": env!("BUILD_TIME"),
        "cluster_status": health["status"],
        "chainquery_ok": chainquery_ok,
        "claims_in_index": claims_in_index,
        "total_searches": state.total_searches.load(Ordering::Relaxed),
        "sync": {
            "claims_running": state.claim_sync.is_running(),
            "counters_running": state.counter_sync.is_running(),
            "blocklist_running": state.blocklist_sync.is_running(),
        },
    }))))
}
