use core_types::types::Fill;
use log::info;
use sqlx::{QueryBuilder, Sqlite};
use std::collections::HashSet;

use crate::{Store, StorageError};

/// Outcome of one bulk load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadResult {
    /// Net-new rows committed.
    pub written: u64,
    /// Input records dropped as duplicates, in-batch or already stored.
    pub duplicates_skipped: u64,
}

impl Store {
    /// Deduplicate and persist a batch of fills.
    ///
    /// In-batch duplicates keep the first occurrence; rows whose natural key
    /// already exists in the store are left untouched (fills are immutable
    /// once recorded). The whole batch commits in one transaction, chunked
    /// into multi-row inserts of `chunk_rows` to bound bind-parameter
    /// counts; a failure anywhere rolls back every chunk.
    pub async fn load_fills(
        &self,
        fills: &[Fill],
        chunk_rows: usize,
    ) -> Result<LoadResult, StorageError> {
        if fills.is_empty() {
            return Ok(LoadResult::default());
        }
        let mut seen = HashSet::with_capacity(fills.len());
        let mut unique: Vec<(String, &Fill)> = Vec::with_capacity(fills.len());
        for fill in fills {
            let key = fill.natural_key();
            if seen.insert(key.clone()) {
                unique.push((key, fill));
            }
        }

        let chunk_rows = chunk_rows.max(1);
        let mut written = 0u64;
        let mut tx = self.pool().begin().await?;
        for chunk in unique.chunks(chunk_rows) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO fills (natural_key, twap_id, wallet_address, timestamp_ms, \
                 asset, quantity, price, side, fee, exchange, tid) ",
            );
            qb.push_values(chunk, |mut row, (key, fill)| {
                row.push_bind(key)
                    .push_bind(&fill.twap_id)
                    .push_bind(&fill.wallet_address)
                    .push_bind(fill.timestamp_ms)
                    .push_bind(&fill.asset)
                    .push_bind(fill.quantity)
                    .push_bind(fill.price)
                    .push_bind(fill.side.as_str())
                    .push_bind(fill.fee)
                    .push_bind(&fill.exchange)
                    .push_bind(fill.tid);
            });
            qb.push(" ON CONFLICT(natural_key) DO NOTHING");
            let result = qb.build().execute(&mut *tx).await?;
            written += result.rows_affected();
        }
        tx.commit().await?;

        let duplicates_skipped = fills.len() as u64 - written;
        info!(
            "loaded {} fills ({} written, {} duplicates skipped)",
            fills.len(),
            written,
            duplicates_skipped
        );
        Ok(LoadResult {
            written,
            duplicates_skipped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::types::{Side, EXCHANGE};

    fn fill(wallet: &str, ts: i64, price: f64, tid: Option<i64>) -> Fill {
        Fill {
            wallet_address: wallet.to_string(),
            timestamp_ms: ts,
            asset: "BTC".to_string(),
            quantity: 1.0,
            price,
            side: Side::Buy,
            fee: 0.5,
            twap_id: "42".to_string(),
            exchange: EXCHANGE.to_string(),
            tid,
        }
    }

    #[tokio::test]
    async fn in_batch_duplicate_keeps_first_occurrence() {
        let store = Store::in_memory().await.unwrap();
        let first = fill("0xA", 1, 100.0, Some(7));
        let second = fill("0xA", 1, 999.0, Some(7));
        let result = store.load_fills(&[first, second], 500).await.unwrap();
        assert_eq!(result.written, 1);
        assert_eq!(result.duplicates_skipped, 1);

        let stored = store.twap_fills("42").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].fill.price, 100.0);
    }

    #[tokio::test]
    async fn reloading_the_same_batch_is_a_noop() {
        let store = Store::in_memory().await.unwrap();
        let batch: Vec<Fill> = (0..10).map(|i| fill("0xA", i, 100.0, Some(i))).collect();
        let first = store.load_fills(&batch, 500).await.unwrap();
        assert_eq!(first.written, 10);
        let second = store.load_fills(&batch, 500).await.unwrap();
        assert_eq!(second.written, 0);
        assert_eq!(second.duplicates_skipped, 10);
        assert_eq!(store.total_fills().await.unwrap(), 10);
    }

    #[tokio::test]
    async fn conflict_never_overwrites_an_existing_fill() {
        let store = Store::in_memory().await.unwrap();
        store
            .load_fills(&[fill("0xA", 1, 100.0, Some(7))], 500)
            .await
            .unwrap();
        store
            .load_fills(&[fill("0xA", 1, 999.0, Some(7))], 500)
            .await
            .unwrap();
        let stored = store.twap_fills("42").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].fill.price, 100.0);
    }

    #[tokio::test]
    async fn chunked_batches_commit_together() {
        let store = Store::in_memory().await.unwrap();
        let batch: Vec<Fill> = (0..137).map(|i| fill("0xA", i, 100.0, Some(i))).collect();
        let result = store.load_fills(&batch, 10).await.unwrap();
        assert_eq!(result.written, 137);
        assert_eq!(store.total_fills().await.unwrap(), 137);
    }

    #[tokio::test]
    async fn failure_in_a_later_chunk_rolls_back_the_whole_batch() {
        let store = Store::in_memory().await.unwrap();
        sqlx::query(
            "CREATE TRIGGER poison_wallet BEFORE INSERT ON fills
             WHEN NEW.wallet_address = 'poison'
             BEGIN SELECT RAISE(ABORT, 'poison wallet'); END",
        )
        .execute(store.pool())
        .await
        .unwrap();

        let mut batch: Vec<Fill> = (0..20).map(|i| fill("0xA", i, 100.0, Some(i))).collect();
        batch.push(fill("poison", 99, 1.0, Some(999)));
        let err = store.load_fills(&batch, 5).await;
        assert!(err.is_err());
        assert_eq!(store.total_fills().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn empty_batch_short_circuits() {
        let store = Store::in_memory().await.unwrap();
        let result = store.load_fills(&[], 500).await.unwrap();
        assert_eq!(result, LoadResult::default());
    }
}
