use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tradeloop_engine::error::EngineError;
use tradeloop_engine::types::Mutation;
use tradeloop_engine::LoopQuery;

use crate::state::AppState;

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/build-version", get(build_version))
        .route("/tenants/:id/status", get(status))
        .route("/tenants/:id/loops", get(loops))
        .route("/tenants/:id/mutations", post(submit_mutation))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn build_version() -> &'static str {
    tradeloop_engine::build_version()
}

struct ApiError(EngineError);

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self.0 {
            EngineError::TenantNotFound(_) => StatusCode::NOT_FOUND,
            EngineError::InvalidInput(_) | EngineError::Conflict(_) => StatusCode::BAD_REQUEST,
            EngineError::Busy(_) => StatusCode::TOO_MANY_REQUESTS,
            EngineError::SccExceedsMaxVertices(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::TransportFailure(_) | EngineError::StoreFailure(_) | EngineError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError(err)
    }
}

async fn status(State(state): State<AppState>, Path(tenant_id): Path<String>) -> Result<Json<serde_json::Value>, ApiError> {
    let runtime = state.tenant(&tenant_id).await?;
    let status = runtime.status();
    Ok(Json(serde_json::json!({
        "nftCount": status.nft_count,
        "walletCount": status.wallet_count,
        "activeLoopCount": status.active_loop_count,
        "pendingMutations": status.pending_mutations,
        "lastUpdated": status.last_updated,
        "truncated": status.truncated,
        "degraded": status.degraded,
    })))
}

#[derive(Deserialize)]
struct LoopsQuery {
    #[serde(rename = "walletId")]
    wallet_id: Option<String>,
    #[serde(rename = "minScore")]
    min_score: Option<f64>,
    limit: Option<usize>,
}

async fn loops(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Query(query): Query<LoopsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let runtime = state.tenant(&tenant_id).await?;
    let loops = runtime.query_loops(&LoopQuery {
        wallet_id: query.wallet_id,
        min_score: query.min_score,
        limit: query.limit,
    });
    Ok(Json(serde_json::json!({ "loops": loops })))
}

async fn submit_mutation(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(mutation): Json<Mutation>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let runtime = state.tenant(&tenant_id).await?;
    let outcome = runtime.submit(mutation).await?;
    Ok(Json(serde_json::json!({
        "eventCount": outcome.events.len(),
        "truncated": outcome.truncated,
    })))
}
