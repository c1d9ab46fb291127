use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Exchange tag stamped on every fill ingested from this source.
pub const EXCHANGE: &str = "hyperliquid";

/// Taker direction of a fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "buy" => Some(Side::Buy),
            "sell" => Some(Side::Sell),
            _ => None,
        }
    }
}

/// Canonical fill record persisted in the `fills` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub wallet_address: String,
    /// Execution time, milliseconds since epoch (UTC).
    pub timestamp_ms: i64,
    pub asset: String,
    pub quantity: f64,
    pub price: f64,
    pub side: Side,
    pub fee: f64,
    /// Source order id carried through verbatim. Grouping fills by this id
    /// assumes every parent order was a TWAP order, which the source does
    /// not guarantee; treat aggregations over it as heuristic.
    pub twap_id: String,
    pub exchange: String,
    /// Source trade id, when the feed provides one.
    pub tid: Option<i64>,
}

impl Fill {
    /// Unique identity of a real-world fill. The source trade id wins when
    /// present; otherwise a composite of the fields that cannot collide for
    /// two distinct fills.
    pub fn natural_key(&self) -> String {
        match self.tid {
            Some(tid) => format!("{}:t{}", self.exchange, tid),
            None => format!(
                "{}:{}:{}:{}:{}:{}:{}",
                self.exchange,
                self.wallet_address,
                self.timestamp_ms,
                self.asset,
                self.price,
                self.quantity,
                self.side.as_str()
            ),
        }
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp_millis(self.timestamp_ms)
    }
}

/// One listable unit of remote data: a position-addressable object key.
/// Positions are block heights; the source only ever appends higher ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDescriptor {
    pub position: u64,
    pub key: String,
    pub size: i64,
}

/// Terminal outcome of one ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Partial,
    Failed,
    NoData,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
            RunStatus::NoData => "no_data",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "success" => Some(RunStatus::Success),
            "partial" => Some(RunStatus::Partial),
            "failed" => Some(RunStatus::Failed),
            "no_data" => Some(RunStatus::NoData),
            _ => None,
        }
    }
}

/// Per-block failure summary kept on the run record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockFailure {
    pub position: u64,
    pub key: String,
    pub error: String,
}

/// Finalized metadata for one ingestion run. Built in memory while the run
/// is in progress and written exactly once at the end; never mutated after.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub started_at_ms: i64,
    pub finished_at_ms: i64,
    pub watermark_start: u64,
    pub watermark_end: u64,
    pub blocks_attempted: u32,
    pub blocks_succeeded: u32,
    pub blocks_failed: u32,
    pub failed_blocks: Vec<BlockFailure>,
    pub records_written: u64,
    pub records_skipped: u64,
    pub duplicates_skipped: u64,
    pub status: RunStatus,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(tid: Option<i64>) -> Fill {
        Fill {
            wallet_address: "0xabc".to_string(),
            timestamp_ms: 1_704_110_400_000,
            asset: "BTC".to_string(),
            quantity: 1.5,
            price: 45000.0,
            side: Side::Buy,
            fee: 10.0,
            twap_id: "12345".to_string(),
            exchange: EXCHANGE.to_string(),
            tid,
        }
    }

    #[test]
    fn natural_key_prefers_trade_id() {
        assert_eq!(fill(Some(67890)).natural_key(), "hyperliquid:t67890");
    }

    #[test]
    fn natural_key_composite_without_trade_id() {
        let key = fill(None).natural_key();
        assert_eq!(
            key,
            "hyperliquid:0xabc:1704110400000:BTC:45000:1.5:buy"
        );
    }

    #[test]
    fn natural_key_distinguishes_side() {
        let buy = fill(None);
        let mut sell = fill(None);
        sell.side = Side::Sell;
        assert_ne!(buy.natural_key(), sell.natural_key());
    }

    #[test]
    fn run_status_round_trips() {
        for status in [
            RunStatus::Success,
            RunStatus::Partial,
            RunStatus::Failed,
            RunStatus::NoData,
        ] {
            assert_eq!(RunStatus::from_str(status.as_str()), Some(status));
        }
    }
}
