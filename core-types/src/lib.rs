//! Shared schemas, enums, config, and retry policy for the fill ingestion system.

pub mod config;
pub mod raw;
pub mod retry;
pub mod types;

pub use config::AppConfig;
pub use types::{BlockDescriptor, BlockFailure, Fill, RunRecord, RunStatus, Side, EXCHANGE};
