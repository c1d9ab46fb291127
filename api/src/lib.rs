//! HTTP surface over the fills and ingestion-run tables: filtered trade
//! reads, TWAP grouping, ingestion status, and a manual run trigger.
//! Everything under `/api/v1` requires the configured `x-api-key` header.

mod handlers;
mod models;

pub use models::*;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use ingestion_service::IngestionService;
use std::sync::Arc;
use storage::Store;

#[derive(Clone)]
pub struct ApiState {
    pub store: Store,
    pub ingestion: Arc<IngestionService>,
    pub api_key: String,
}

pub fn router(state: ApiState) -> Router {
    let secured = Router::new()
        .route("/api/v1/trades", get(handlers::get_trades))
        .route("/api/v1/twap/:twap_id", get(handlers::get_twap_order))
        .route(
            "/api/v1/wallets/:wallet_address/twaps",
            get(handlers::get_wallet_twaps),
        )
        .route("/api/v1/status", get(handlers::get_ingestion_status))
        .route("/api/v1/ingestion/run", post(handlers::trigger_ingestion))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .merge(secured)
        .with_state(state)
}

async fn require_api_key(
    State(state): State<ApiState>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok());
    if presented != Some(state.api_key.as_str()) {
        return (
            StatusCode::FORBIDDEN,
            Json(ErrorResponse {
                error: "FORBIDDEN".to_string(),
                message: "invalid API key".to_string(),
            }),
        )
            .into_response();
    }
    next.run(request).await
}
