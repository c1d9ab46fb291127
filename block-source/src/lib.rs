//! Block source adapter: lists and fetches compressed fill blocks from the
//! remote object store and hands back decompressed payloads.

mod codec;

pub use codec::decode_payload;

use async_trait::async_trait;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::types::RequestPayer;
use aws_sdk_s3::Client;
use bytes::Bytes;
use core_types::config::S3Config;
use core_types::retry::RetryPolicy;
use core_types::types::BlockDescriptor;
use log::{debug, info};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

#[derive(Debug, Error)]
pub enum SourceError {
    /// Transient network/storage failure; the next run retries the block.
    #[error("source unavailable: {0}")]
    Unavailable(String),
    /// Access-control or payment-model rejection.
    #[error("source auth rejected: {0}")]
    Auth(String),
    /// Object disappeared between list and fetch.
    #[error("object not found: {0}")]
    NotFound(String),
    /// Corrupt compressed payload.
    #[error("corrupt block payload: {0}")]
    Decode(String),
}

impl SourceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Unavailable(_))
    }
}

/// Stateless-per-call view of the remote block store. The ingestion
/// orchestrator only talks to this trait, which keeps it testable against
/// an in-memory source.
#[async_trait]
pub trait BlockSource: Send + Sync + 'static {
    /// Blocks with position strictly greater than `position`, ascending,
    /// bounded to at most `max_blocks` distinct positions.
    async fn list_blocks_since(
        &self,
        position: u64,
        max_blocks: usize,
    ) -> Result<Vec<BlockDescriptor>, SourceError>;

    /// Fetch one object and return its decompressed payload.
    async fn fetch_block(&self, block: &BlockDescriptor) -> Result<Bytes, SourceError>;
}

/// S3-backed implementation against the node fill archive.
pub struct S3BlockSource {
    client: Client,
    bucket: String,
    prefix: String,
    request_payer: Option<RequestPayer>,
    retry: RetryPolicy,
}

impl S3BlockSource {
    pub fn new(config: &S3Config) -> Self {
        let credentials = Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
            None,
            None,
            "block-source",
        );
        let timeouts = TimeoutConfig::builder()
            .connect_timeout(Duration::from_secs(10))
            .operation_attempt_timeout(Duration::from_secs(60))
            .build();
        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .timeout_config(timeouts);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint.clone()).force_path_style(true);
        }
        let client = Client::from_conf(builder.build());
        let request_payer = match config.request_payer.as_str() {
            "" => None,
            payer => Some(RequestPayer::from(payer)),
        };
        Self {
            client,
            bucket: config.bucket.clone(),
            prefix: config.prefix.clone(),
            request_payer,
            retry: RetryPolicy::default_network(),
        }
    }

    async fn list_all_since(&self, position: u64) -> Result<Vec<BlockDescriptor>, SourceError> {
        let mut entries = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(self.bucket.clone())
            .prefix(self.prefix.clone())
            .set_request_payer(self.request_payer.clone())
            .into_paginator()
            .send();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|err| classify_sdk(&self.prefix, &err))?;
            for object in page.contents() {
                let Some(key) = object.key() else { continue };
                if key.ends_with('/') {
                    continue;
                }
                let Some(pos) = parse_position(&self.prefix, key) else {
                    debug!("skipping unrecognized key {key}");
                    continue;
                };
                if pos <= position {
                    continue;
                }
                entries.push(BlockDescriptor {
                    position: pos,
                    key: key.to_string(),
                    size: object.size().unwrap_or(0),
                });
            }
        }
        entries.sort_by(|a, b| (a.position, a.key.as_str()).cmp(&(b.position, b.key.as_str())));
        Ok(entries)
    }
}

#[async_trait]
impl BlockSource for S3BlockSource {
    async fn list_blocks_since(
        &self,
        position: u64,
        max_blocks: usize,
    ) -> Result<Vec<BlockDescriptor>, SourceError> {
        let entries =
            retry_transient(&self.retry, || self.list_all_since(position)).await?;
        let total = entries.len();
        let bounded = bound_to_positions(entries, max_blocks);
        info!(
            "listed {} objects above position {} ({} within max_blocks={})",
            total,
            position,
            bounded.len(),
            max_blocks
        );
        Ok(bounded)
    }

    async fn fetch_block(&self, block: &BlockDescriptor) -> Result<Bytes, SourceError> {
        let raw = retry_transient(&self.retry, || async {
            let resp = self
                .client
                .get_object()
                .bucket(self.bucket.clone())
                .key(block.key.clone())
                .set_request_payer(self.request_payer.clone())
                .send()
                .await
                .map_err(|err| classify_sdk(&block.key, &err))?;
            let data = resp.body.collect().await.map_err(|err| {
                SourceError::Unavailable(format!("{}: body read: {err}", block.key))
            })?;
            Ok(data.into_bytes())
        })
        .await?;
        codec::decode_payload(&block.key, raw).await
    }
}

/// Retry transient failures only; auth, not-found, and decode outcomes are
/// final for this run.
async fn retry_transient<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, SourceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < policy.max_attempts => {
                attempt += 1;
                sleep(policy.delay_for(attempt - 1)).await;
            }
            Err(err) => return Err(err),
        }
    }
}

fn classify_sdk<E>(key: &str, err: &SdkError<E>) -> SourceError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let code = err.as_service_error().and_then(|service| service.code());
    let status = match err {
        SdkError::ServiceError(ctx) => Some(ctx.raw().status().as_u16()),
        _ => None,
    };
    let detail = format!("{key}: {}", DisplayErrorContext(err));
    match (code, status) {
        (Some("NoSuchKey"), _) => SourceError::NotFound(detail),
        (Some("AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch"), _) => {
            SourceError::Auth(detail)
        }
        (_, Some(401 | 403)) => SourceError::Auth(detail),
        _ => SourceError::Unavailable(detail),
    }
}

/// Extract the block height from `node_fills_by_block/<height>/<file>`.
fn parse_position(prefix: &str, key: &str) -> Option<u64> {
    let rest = key.strip_prefix(prefix)?;
    let (height, file) = rest.split_once('/')?;
    if file.is_empty() {
        return None;
    }
    height.parse().ok()
}

/// Keep at most `max_blocks` distinct positions from ascending-sorted
/// entries; objects sharing a position stay together.
fn bound_to_positions(entries: Vec<BlockDescriptor>, max_blocks: usize) -> Vec<BlockDescriptor> {
    let mut bounded = Vec::with_capacity(entries.len().min(max_blocks));
    let mut positions = 0usize;
    let mut current = None;
    for entry in entries {
        if current != Some(entry.position) {
            if positions == max_blocks {
                break;
            }
            positions += 1;
            current = Some(entry.position);
        }
        bounded.push(entry);
    }
    bounded
}
