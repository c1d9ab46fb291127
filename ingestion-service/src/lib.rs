//! Ingestion orchestrator. One call to [`IngestionService::run_ingestion`]
//! performs a bounded incremental run: read the watermark from the last
//! finalized run record, list new blocks, fetch/decompress/normalize each
//! with per-block failure isolation, bulk-load the survivors, and finalize
//! exactly one run record.

use block_source::BlockSource;
use chrono::Utc;
use core_types::config::IngestConfig;
use core_types::types::{BlockDescriptor, BlockFailure, RunRecord, RunStatus};
use log::{info, warn};
use std::collections::BTreeSet;
use std::sync::Arc;
use storage::{Store, StorageError};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum RunError {
    /// Another run holds the single-run gate. Normal outcome under
    /// concurrent triggers, not a fault.
    #[error("an ingestion run is already in progress")]
    Busy,
    /// The run record itself (or the starting watermark) could not be read
    /// or written; nothing about this run is recorded.
    #[error("run metadata unavailable: {0}")]
    Metadata(#[from] StorageError),
}

pub struct IngestionService {
    source: Arc<dyn BlockSource>,
    store: Store,
    config: IngestConfig,
    // Two concurrent runs would race on the watermark; this gate makes the
    // second one resolve to Busy instead.
    run_gate: Semaphore,
    cancel: CancellationToken,
}

impl IngestionService {
    pub fn new(source: Arc<dyn BlockSource>, store: Store, config: IngestConfig) -> Self {
        Self {
            source,
            store,
            config,
            run_gate: Semaphore::new(1),
            cancel: CancellationToken::new(),
        }
    }

    /// Token cancelling in-flight runs between blocks; the load transaction
    /// stays all-or-none regardless.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn default_max_blocks(&self) -> usize {
        self.config.max_blocks
    }

    /// Execute one ingestion run, bounded to `max_blocks` new blocks.
    pub async fn run_ingestion(&self, max_blocks: usize) -> Result<RunRecord, RunError> {
        let _permit = self.run_gate.try_acquire().map_err(|_| RunError::Busy)?;
        let started_at_ms = Utc::now().timestamp_millis();
        let watermark_start = self
            .store
            .current_watermark()
            .await?
            .unwrap_or(self.config.default_start_block);
        info!("ingestion run starting from watermark {watermark_start} (max_blocks={max_blocks})");

        let listed = match self.source.list_blocks_since(watermark_start, max_blocks).await {
            Ok(listed) => listed,
            Err(err) => {
                warn!("block listing failed: {err}");
                return self
                    .finalize(RunRecord {
                        started_at_ms,
                        finished_at_ms: Utc::now().timestamp_millis(),
                        watermark_start,
                        watermark_end: watermark_start,
                        blocks_attempted: 0,
                        blocks_succeeded: 0,
                        blocks_failed: 0,
                        failed_blocks: Vec::new(),
                        records_written: 0,
                        records_skipped: 0,
                        duplicates_skipped: 0,
                        status: RunStatus::Failed,
                        error: Some(format!("listing failed: {err}")),
                    })
                    .await;
            }
        };

        if listed.is_empty() {
            info!("no new blocks above watermark {watermark_start}");
            return self
                .finalize(RunRecord {
                    started_at_ms,
                    finished_at_ms: Utc::now().timestamp_millis(),
                    watermark_start,
                    watermark_end: watermark_start,
                    blocks_attempted: 0,
                    blocks_succeeded: 0,
                    blocks_failed: 0,
                    failed_blocks: Vec::new(),
                    records_written: 0,
                    records_skipped: 0,
                    duplicates_skipped: 0,
                    status: RunStatus::NoData,
                    error: None,
                })
                .await;
        }

        let outcome = self.process_blocks(&listed).await;
        let (load_result, load_error) = if outcome.fills.is_empty() {
            (storage::LoadResult::default(), None)
        } else {
            match self
                .store
                .load_fills(&outcome.fills, self.config.insert_chunk_rows)
                .await
            {
                Ok(result) => (result, None),
                Err(err) => {
                    warn!("bulk load failed: {err}");
                    (storage::LoadResult::default(), Some(err))
                }
            }
        };

        let listed_positions: BTreeSet<u64> = listed.iter().map(|b| b.position).collect();
        let succeeded = outcome.attempted.len() - outcome.failed.len();
        let (status, watermark_end, error) = if let Some(err) = load_error {
            // Nothing committed; the whole run is retryable.
            (
                RunStatus::Failed,
                watermark_start,
                Some(format!("load failed: {err}")),
            )
        } else if outcome.attempted.is_empty() {
            (
                RunStatus::Failed,
                watermark_start,
                Some("run cancelled before any block was attempted".to_string()),
            )
        } else if outcome.failed.is_empty() {
            (
                RunStatus::Success,
                advance_watermark(watermark_start, &listed_positions, &outcome),
                None,
            )
        } else if succeeded > 0 {
            (
                RunStatus::Partial,
                advance_watermark(watermark_start, &listed_positions, &outcome),
                None,
            )
        } else {
            (
                RunStatus::Failed,
                watermark_start,
                Some("all attempted blocks failed".to_string()),
            )
        };

        self.finalize(RunRecord {
            started_at_ms,
            finished_at_ms: Utc::now().timestamp_millis(),
            watermark_start,
            watermark_end,
            blocks_attempted: outcome.attempted.len() as u32,
            blocks_succeeded: succeeded as u32,
            blocks_failed: outcome.failed.len() as u32,
            failed_blocks: outcome.failures,
            records_written: load_result.written,
            records_skipped: outcome.records_skipped,
            duplicates_skipped: load_result.duplicates_skipped,
            status,
            error,
        })
        .await
    }

    async fn process_blocks(&self, listed: &[BlockDescriptor]) -> BlockOutcome {
        let mut outcome = BlockOutcome::default();
        for block in listed {
            if self.cancel.is_cancelled() {
                warn!("run cancelled; abandoning remaining blocks");
                if outcome.attempted.contains(&block.position) {
                    // A partially processed position must not advance the
                    // watermark.
                    outcome.failed.insert(block.position);
                    outcome.failures.push(BlockFailure {
                        position: block.position,
                        key: block.key.clone(),
                        error: "run cancelled mid-block".to_string(),
                    });
                }
                break;
            }
            outcome.attempted.insert(block.position);
            match self.source.fetch_block(block).await {
                Ok(payload) => {
                    let mut records = normalizer::normalize_block(&payload);
                    if records.skipped > 0 {
                        warn!(
                            "block {}: skipped {} malformed records ({})",
                            block.position,
                            records.skipped,
                            records.sample_errors.join("; ")
                        );
                    }
                    outcome.records_skipped += records.skipped;
                    outcome.fills.append(&mut records.fills);
                }
                Err(err) => {
                    warn!("block {} ({}): {err}", block.position, block.key);
                    outcome.failed.insert(block.position);
                    outcome.failures.push(BlockFailure {
                        position: block.position,
                        key: block.key.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }
        outcome
    }

    async fn finalize(&self, run: RunRecord) -> Result<RunRecord, RunError> {
        self.store.record_run(&run).await?;
        info!(
            "ingestion run finalized: {} (blocks {}/{} ok, {} written, watermark {} -> {})",
            run.status.as_str(),
            run.blocks_succeeded,
            run.blocks_attempted,
            run.records_written,
            run.watermark_start,
            run.watermark_end
        );
        Ok(run)
    }
}

#[derive(Default)]
struct BlockOutcome {
    fills: Vec<core_types::types::Fill>,
    records_skipped: u64,
    attempted: BTreeSet<u64>,
    failed: BTreeSet<u64>,
    failures: Vec<BlockFailure>,
}

/// The watermark moves to the end of the longest unbroken successful prefix
/// of the listed positions; a gap pins it so the next run retries from
/// there.
fn advance_watermark(start: u64, listed: &BTreeSet<u64>, outcome: &BlockOutcome) -> u64 {
    let mut watermark = start;
    for position in listed {
        if outcome.attempted.contains(position) && !outcome.failed.contains(position) {
            watermark = *position;
        } else {
            break;
        }
    }
    watermark
}
