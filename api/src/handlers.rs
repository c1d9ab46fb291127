use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use chrono::Utc;
use ingestion_service::RunError;
use log::error;
use storage::FillFilter;

use crate::models::*;
use crate::ApiState;

type ApiError = (StatusCode, Json<ErrorResponse>);

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: "BAD_REQUEST".to_string(),
            message: message.into(),
        }),
    )
}

fn internal(err: impl std::fmt::Display) -> ApiError {
    error!("request failed: {err}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: "INTERNAL".to_string(),
            message: "internal server error".to_string(),
        }),
    )
}

pub async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "message": "Hyperliquid fill ingestion service",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn health(State(state): State<ApiState>) -> Result<Json<HealthResponse>, ApiError> {
    match state.store.total_fills().await {
        Ok(total_trades) => Ok(Json(HealthResponse {
            status: "healthy".to_string(),
            timestamp: Utc::now(),
            database: "connected".to_string(),
            total_trades,
        })),
        Err(err) => {
            error!("health check failed: {err}");
            Err((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse {
                    error: "UNAVAILABLE".to_string(),
                    message: "service unavailable".to_string(),
                }),
            ))
        }
    }
}

pub async fn get_trades(
    State(state): State<ApiState>,
    Query(query): Query<TradesQuery>,
) -> Result<Json<Vec<TradeResponse>>, ApiError> {
    let limit = query.limit.unwrap_or(100);
    if !(1..=1000).contains(&limit) {
        return Err(bad_request("limit must be between 1 and 1000"));
    }
    let offset = query.offset.unwrap_or(0);
    if offset < 0 {
        return Err(bad_request("offset must be non-negative"));
    }
    let wallets = query
        .wallet_addresses
        .as_deref()
        .map(|csv| {
            csv.split(',')
                .map(str::trim)
                .filter(|w| !w.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let filter = FillFilter {
        wallets,
        asset: query.asset,
        twap_id: query.twap_id,
        start_ms: query.start_date.map(|dt| dt.timestamp_millis()),
        end_ms: query.end_date.map(|dt| dt.timestamp_millis()),
        limit,
        offset,
    };
    let fills = state.store.query_fills(&filter).await.map_err(internal)?;
    Ok(Json(fills.into_iter().map(TradeResponse::from).collect()))
}

pub async fn get_twap_order(
    State(state): State<ApiState>,
    Path(twap_id): Path<String>,
) -> Result<Json<TwapGroupResponse>, ApiError> {
    let fills = state.store.twap_fills(&twap_id).await.map_err(internal)?;
    if fills.is_empty() {
        return Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "NOT_FOUND".to_string(),
                message: format!("TWAP order {twap_id} not found"),
            }),
        ));
    }
    let total_volume: f64 = fills.iter().map(|f| f.fill.quantity).sum();
    let avg_price = if total_volume > 0.0 {
        fills
            .iter()
            .map(|f| f.fill.price * f.fill.quantity)
            .sum::<f64>()
            / total_volume
    } else {
        0.0
    };
    Ok(Json(TwapGroupResponse {
        twap_id,
        total_trades: fills.len(),
        total_volume,
        avg_price,
        trades: fills.into_iter().map(TradeResponse::from).collect(),
    }))
}

pub async fn get_wallet_twaps(
    State(state): State<ApiState>,
    Path(wallet_address): Path<String>,
    Query(range): Query<TimeRangeQuery>,
) -> Result<Json<Vec<String>>, ApiError> {
    let ids = state
        .store
        .wallet_twap_ids(
            &wallet_address,
            range.start_date.map(|dt| dt.timestamp_millis()),
            range.end_date.map(|dt| dt.timestamp_millis()),
        )
        .await
        .map_err(internal)?;
    Ok(Json(ids))
}

pub async fn get_ingestion_status(
    State(state): State<ApiState>,
) -> Result<Json<IngestionStatusResponse>, ApiError> {
    let latest = state.store.latest_run().await.map_err(internal)?;
    let total_records = state.store.total_fills().await.map_err(internal)?;
    let response = match latest {
        Some(run) => IngestionStatusResponse {
            last_ingestion: chrono::DateTime::from_timestamp_millis(run.finished_at_ms),
            total_records,
            status: run.status.as_str().to_string(),
            last_error: run.error.clone(),
            last_run: Some(run),
        },
        None => IngestionStatusResponse {
            last_ingestion: None,
            total_records,
            status: "no_data".to_string(),
            last_error: None,
            last_run: None,
        },
    };
    Ok(Json(response))
}

/// Manual trigger for one ingestion run. Blocks until the run finalizes;
/// callers wanting frequent small runs pass a low `max_blocks`.
pub async fn trigger_ingestion(
    State(state): State<ApiState>,
    payload: Option<Json<RunRequest>>,
) -> Result<Json<core_types::types::RunRecord>, ApiError> {
    let request = payload.map(|Json(r)| r).unwrap_or_default();
    let max_blocks = request
        .max_blocks
        .unwrap_or_else(|| state.ingestion.default_max_blocks());
    match state.ingestion.run_ingestion(max_blocks).await {
        Ok(run) => Ok(Json(run)),
        Err(RunError::Busy) => Err((
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: "BUSY".to_string(),
                message: "an ingestion run is already in progress".to_string(),
            }),
        )),
        Err(err) => Err(internal(err)),
    }
}
