//! Relational store: the `fills` table (unique on `natural_key`), the
//! `ingestion_runs` table, and the deduplicating loader.

mod loader;

pub use loader::LoadResult;

use core_types::types::{BlockFailure, Fill, RunRecord, RunStatus, Side};
use log::info;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::{FromRow, QueryBuilder, Sqlite};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("invalid stored data: {0}")]
    Corrupt(String),
}

/// The uniqueness constraint on `natural_key` is what makes re-ingesting a
/// block a no-op; everything else is supporting indexes for the query API.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS fills (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        natural_key TEXT NOT NULL UNIQUE,
        twap_id TEXT NOT NULL,
        wallet_address TEXT NOT NULL,
        timestamp_ms INTEGER NOT NULL,
        asset TEXT NOT NULL,
        quantity REAL NOT NULL,
        price REAL NOT NULL,
        side TEXT NOT NULL,
        fee REAL NOT NULL DEFAULT 0,
        exchange TEXT NOT NULL,
        tid INTEGER
    )",
    "CREATE INDEX IF NOT EXISTS idx_fills_wallet_timestamp
        ON fills(wallet_address, timestamp_ms)",
    "CREATE INDEX IF NOT EXISTS idx_fills_twap_timestamp
        ON fills(twap_id, timestamp_ms)",
    "CREATE TABLE IF NOT EXISTS ingestion_runs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        started_at_ms INTEGER NOT NULL,
        finished_at_ms INTEGER NOT NULL,
        watermark_start INTEGER NOT NULL,
        watermark_end INTEGER NOT NULL,
        blocks_attempted INTEGER NOT NULL,
        blocks_succeeded INTEGER NOT NULL,
        blocks_failed INTEGER NOT NULL,
        failed_blocks TEXT NOT NULL DEFAULT '[]',
        records_written INTEGER NOT NULL,
        records_skipped INTEGER NOT NULL,
        duplicates_skipped INTEGER NOT NULL,
        status TEXT NOT NULL,
        error TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_runs_finished
        ON ingestion_runs(finished_at_ms)",
];

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

/// A fill as stored, with its row id.
#[derive(Debug, Clone)]
pub struct StoredFill {
    pub id: i64,
    pub fill: Fill,
}

/// Filters for the trades query surface. `limit`/`offset` are always
/// applied; everything else is optional.
#[derive(Debug, Clone)]
pub struct FillFilter {
    pub wallets: Vec<String>,
    pub asset: Option<String>,
    pub twap_id: Option<String>,
    pub start_ms: Option<i64>,
    pub end_ms: Option<i64>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for FillFilter {
    fn default() -> Self {
        Self {
            wallets: Vec::new(),
            asset: None,
            twap_id: None,
            start_ms: None,
            end_ms: None,
            limit: 100,
            offset: 0,
        }
    }
}

#[derive(Debug, FromRow)]
struct FillRow {
    id: i64,
    twap_id: String,
    wallet_address: String,
    timestamp_ms: i64,
    asset: String,
    quantity: f64,
    price: f64,
    side: String,
    fee: f64,
    exchange: String,
    tid: Option<i64>,
}

impl FillRow {
    fn into_stored(self) -> Result<StoredFill, StorageError> {
        let side = Side::from_str(&self.side)
            .ok_or_else(|| StorageError::Corrupt(format!("side {:?}", self.side)))?;
        Ok(StoredFill {
            id: self.id,
            fill: Fill {
                wallet_address: self.wallet_address,
                timestamp_ms: self.timestamp_ms,
                asset: self.asset,
                quantity: self.quantity,
                price: self.price,
                side,
                fee: self.fee,
                twap_id: self.twap_id,
                exchange: self.exchange,
                tid: self.tid,
            },
        })
    }
}

#[derive(Debug, FromRow)]
struct RunRow {
    started_at_ms: i64,
    finished_at_ms: i64,
    watermark_start: i64,
    watermark_end: i64,
    blocks_attempted: i64,
    blocks_succeeded: i64,
    blocks_failed: i64,
    failed_blocks: String,
    records_written: i64,
    records_skipped: i64,
    duplicates_skipped: i64,
    status: String,
    error: Option<String>,
}

impl RunRow {
    fn into_record(self) -> Result<RunRecord, StorageError> {
        let status = RunStatus::from_str(&self.status)
            .ok_or_else(|| StorageError::Corrupt(format!("run status {:?}", self.status)))?;
        let failed_blocks: Vec<BlockFailure> = serde_json::from_str(&self.failed_blocks)
            .map_err(|err| StorageError::Corrupt(format!("failed_blocks: {err}")))?;
        Ok(RunRecord {
            started_at_ms: self.started_at_ms,
            finished_at_ms: self.finished_at_ms,
            watermark_start: self.watermark_start as u64,
            watermark_end: self.watermark_end as u64,
            blocks_attempted: self.blocks_attempted as u32,
            blocks_succeeded: self.blocks_succeeded as u32,
            blocks_failed: self.blocks_failed as u32,
            failed_blocks,
            records_written: self.records_written as u64,
            records_skipped: self.records_skipped as u64,
            duplicates_skipped: self.duplicates_skipped as u64,
            status,
            error: self.error,
        })
    }
}

const FILL_COLUMNS: &str =
    "id, twap_id, wallet_address, timestamp_ms, asset, quantity, price, side, fee, exchange, tid";

impl Store {
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Single-connection in-memory store, already initialized. Used by
    /// tests and local experiments.
    pub async fn in_memory() -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    /// Apply the schema. Idempotent; run once at startup.
    pub async fn init(&self) -> Result<(), StorageError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("database schema ready");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert one finalized run record. Run records are write-once.
    pub async fn record_run(&self, run: &RunRecord) -> Result<i64, StorageError> {
        let failed_blocks = serde_json::to_string(&run.failed_blocks)
            .map_err(|err| StorageError::Corrupt(format!("failed_blocks: {err}")))?;
        let result = sqlx::query(
            "INSERT INTO ingestion_runs (
                started_at_ms, finished_at_ms, watermark_start, watermark_end,
                blocks_attempted, blocks_succeeded, blocks_failed, failed_blocks,
                records_written, records_skipped, duplicates_skipped, status, error
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(run.started_at_ms)
        .bind(run.finished_at_ms)
        .bind(run.watermark_start as i64)
        .bind(run.watermark_end as i64)
        .bind(run.blocks_attempted as i64)
        .bind(run.blocks_succeeded as i64)
        .bind(run.blocks_failed as i64)
        .bind(failed_blocks)
        .bind(run.records_written as i64)
        .bind(run.records_skipped as i64)
        .bind(run.duplicates_skipped as i64)
        .bind(run.status.as_str())
        .bind(&run.error)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// The most recently finalized run, if any.
    pub async fn latest_run(&self) -> Result<Option<RunRecord>, StorageError> {
        let row: Option<RunRow> = sqlx::query_as(
            "SELECT started_at_ms, finished_at_ms, watermark_start, watermark_end,
                    blocks_attempted, blocks_succeeded, blocks_failed, failed_blocks,
                    records_written, records_skipped, duplicates_skipped, status, error
             FROM ingestion_runs ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        row.map(RunRow::into_record).transpose()
    }

    /// Watermark carried by the latest finalized run. Every run records its
    /// end watermark (unchanged on failure), so the latest row is always
    /// authoritative.
    pub async fn current_watermark(&self) -> Result<Option<u64>, StorageError> {
        Ok(self.latest_run().await?.map(|run| run.watermark_end))
    }

    pub async fn total_fills(&self) -> Result<i64, StorageError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM fills")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    pub async fn query_fills(&self, filter: &FillFilter) -> Result<Vec<StoredFill>, StorageError> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {FILL_COLUMNS} FROM fills WHERE 1=1"));
        if !filter.wallets.is_empty() {
            qb.push(" AND wallet_address IN (");
            let mut separated = qb.separated(", ");
            for wallet in &filter.wallets {
                separated.push_bind(wallet);
            }
            qb.push(")");
        }
        if let Some(asset) = &filter.asset {
            qb.push(" AND asset = ").push_bind(asset);
        }
        if let Some(twap_id) = &filter.twap_id {
            qb.push(" AND twap_id = ").push_bind(twap_id);
        }
        if let Some(start_ms) = filter.start_ms {
            qb.push(" AND timestamp_ms >= ").push_bind(start_ms);
        }
        if let Some(end_ms) = filter.end_ms {
            qb.push(" AND timestamp_ms <= ").push_bind(end_ms);
        }
        qb.push(" ORDER BY timestamp_ms DESC, id DESC LIMIT ")
            .push_bind(filter.limit)
            .push(" OFFSET ")
            .push_bind(filter.offset);
        let rows: Vec<FillRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(FillRow::into_stored).collect()
    }

    /// All fills belonging to one order id, oldest first.
    pub async fn twap_fills(&self, twap_id: &str) -> Result<Vec<StoredFill>, StorageError> {
        let rows: Vec<FillRow> = sqlx::query_as(&format!(
            "SELECT {FILL_COLUMNS} FROM fills WHERE twap_id = ?
             ORDER BY timestamp_ms ASC, id ASC"
        ))
        .bind(twap_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(FillRow::into_stored).collect()
    }

    /// Distinct order ids a wallet traded under, optionally time-bounded.
    /// Grouping by order id treats every parent order as a TWAP order; the
    /// source does not distinguish strategies, so this is best-effort.
    pub async fn wallet_twap_ids(
        &self,
        wallet: &str,
        start_ms: Option<i64>,
        end_ms: Option<i64>,
    ) -> Result<Vec<String>, StorageError> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT DISTINCT twap_id FROM fills WHERE twap_id <> '' AND wallet_address = ",
        );
        qb.push_bind(wallet);
        if let Some(start_ms) = start_ms {
            qb.push(" AND timestamp_ms >= ").push_bind(start_ms);
        }
        if let Some(end_ms) = end_ms {
            qb.push(" AND timestamp_ms <= ").push_bind(end_ms);
        }
        qb.push(" ORDER BY twap_id");
        let rows: Vec<(String,)> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::types::EXCHANGE;

    fn fill(wallet: &str, asset: &str, ts: i64, twap_id: &str, tid: i64) -> Fill {
        Fill {
            wallet_address: wallet.to_string(),
            timestamp_ms: ts,
            asset: asset.to_string(),
            quantity: 2.0,
            price: 10.0,
            side: Side::Sell,
            fee: 0.0,
            twap_id: twap_id.to_string(),
            exchange: EXCHANGE.to_string(),
            tid: Some(tid),
        }
    }

    fn run(status: RunStatus, watermark_end: u64) -> RunRecord {
        RunRecord {
            started_at_ms: 1_000,
            finished_at_ms: 2_000,
            watermark_start: 5,
            watermark_end,
            blocks_attempted: 3,
            blocks_succeeded: 2,
            blocks_failed: 1,
            failed_blocks: vec![BlockFailure {
                position: 8,
                key: "node_fills_by_block/8/0.lz4".to_string(),
                error: "source unavailable: timeout".to_string(),
            }],
            records_written: 40,
            records_skipped: 2,
            duplicates_skipped: 1,
            status,
            error: None,
        }
    }

    #[tokio::test]
    async fn run_records_round_trip() {
        let store = Store::in_memory().await.unwrap();
        assert!(store.latest_run().await.unwrap().is_none());
        assert!(store.current_watermark().await.unwrap().is_none());

        store.record_run(&run(RunStatus::Partial, 7)).await.unwrap();
        let latest = store.latest_run().await.unwrap().unwrap();
        assert_eq!(latest.status, RunStatus::Partial);
        assert_eq!(latest.watermark_end, 7);
        assert_eq!(latest.failed_blocks.len(), 1);
        assert_eq!(latest.failed_blocks[0].position, 8);
        assert_eq!(store.current_watermark().await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn latest_run_is_the_newest_row() {
        let store = Store::in_memory().await.unwrap();
        store.record_run(&run(RunStatus::Success, 7)).await.unwrap();
        store.record_run(&run(RunStatus::Failed, 7)).await.unwrap();
        let latest = store.latest_run().await.unwrap().unwrap();
        assert_eq!(latest.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn query_filters_compose() {
        let store = Store::in_memory().await.unwrap();
        let fills = vec![
            fill("0xA", "BTC", 100, "1", 1),
            fill("0xA", "ETH", 200, "2", 2),
            fill("0xB", "BTC", 300, "3", 3),
        ];
        store.load_fills(&fills, 500).await.unwrap();

        let by_wallet = store
            .query_fills(&FillFilter {
                wallets: vec!["0xA".to_string()],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_wallet.len(), 2);

        let by_asset = store
            .query_fills(&FillFilter {
                asset: Some("BTC".to_string()),
                start_ms: Some(150),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_asset.len(), 1);
        assert_eq!(by_asset[0].fill.wallet_address, "0xB");

        let paged = store
            .query_fills(&FillFilter {
                limit: 1,
                offset: 1,
                ..Default::default()
            })
            .await
            .unwrap();
        // Newest first; offset 1 skips ts=300.
        assert_eq!(paged.len(), 1);
        assert_eq!(paged[0].fill.timestamp_ms, 200);
    }

    #[tokio::test]
    async fn wallet_twap_ids_excludes_blank_order_ids() {
        let store = Store::in_memory().await.unwrap();
        let fills = vec![
            fill("0xA", "BTC", 100, "1", 1),
            fill("0xA", "BTC", 200, "", 2),
            fill("0xA", "BTC", 300, "1", 3),
        ];
        store.load_fills(&fills, 500).await.unwrap();
        let ids = store.wallet_twap_ids("0xA", None, None).await.unwrap();
        assert_eq!(ids, vec!["1".to_string()]);
    }
}
