use chrono::{DateTime, Utc};
use core_types::types::RunRecord;
use serde::{Deserialize, Serialize};
use storage::StoredFill;

/// One stored fill, as returned by the trades endpoints.
#[derive(Debug, Serialize)]
pub struct TradeResponse {
    pub id: i64,
    pub twap_id: String,
    pub wallet_address: String,
    pub timestamp: DateTime<Utc>,
    pub asset: String,
    pub quantity: f64,
    pub price: f64,
    pub side: String,
    pub fee: f64,
    pub exchange: String,
}

impl From<StoredFill> for TradeResponse {
    fn from(stored: StoredFill) -> Self {
        let fill = stored.fill;
        Self {
            id: stored.id,
            timestamp: fill.timestamp().unwrap_or_default(),
            twap_id: fill.twap_id,
            wallet_address: fill.wallet_address,
            asset: fill.asset,
            quantity: fill.quantity,
            price: fill.price,
            side: fill.side.as_str().to_string(),
            fee: fill.fee,
            exchange: fill.exchange,
        }
    }
}

/// Fills grouped under one order id. Volume-weighted average price over the
/// group; note that the grouping assumes the parent order was a TWAP order.
#[derive(Debug, Serialize)]
pub struct TwapGroupResponse {
    pub twap_id: String,
    pub total_trades: usize,
    pub total_volume: f64,
    pub avg_price: f64,
    pub trades: Vec<TradeResponse>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub database: String,
    pub total_trades: i64,
}

#[derive(Debug, Serialize)]
pub struct IngestionStatusResponse {
    pub last_ingestion: Option<DateTime<Utc>>,
    pub total_records: i64,
    pub status: String,
    pub last_error: Option<String>,
    pub last_run: Option<RunRecord>,
}

#[derive(Debug, Deserialize)]
pub struct TradesQuery {
    /// Comma-separated wallet addresses.
    pub wallet_addresses: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub asset: Option<String>,
    pub twap_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct TimeRangeQuery {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RunRequest {
    pub max_blocks: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
