use config::{Config, ConfigError};
use serde::{Deserialize, Serialize};

/// Application configuration, layered from `config.toml` and `APP_`-prefixed
/// environment variables.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default)]
    pub s3: S3Config,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

fn default_database_url() -> String {
    "sqlite://hl_twap.db?mode=rwc".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Cost-attribution parameter; the node data bucket bills the requester,
    /// so requests must carry a billable identity.
    #[serde(default = "default_request_payer")]
    pub request_payer: String,
    #[serde(default)]
    pub access_key_id: String,
    #[serde(default)]
    pub secret_access_key: String,
    /// Override for S3-compatible stores in local setups.
    #[serde(default)]
    pub endpoint: Option<String>,
}

fn default_bucket() -> String {
    "hl-mainnet-node-data".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_prefix() -> String {
    "node_fills_by_block/".to_string()
}

fn default_request_payer() -> String {
    "requester".to_string()
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            region: default_region(),
            prefix: default_prefix(),
            request_payer: default_request_payer(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
            endpoint: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub key: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            key: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Daily trigger time, UTC.
    #[serde(default = "default_hour")]
    pub hour: u32,
    #[serde(default)]
    pub minute: u32,
}

fn default_enabled() -> bool {
    true
}

fn default_hour() -> u32 {
    2
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            hour: default_hour(),
            minute: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Upper bound on blocks attempted per run; keeps runs incrementally
    /// sized and memory bounded.
    #[serde(default = "default_max_blocks")]
    pub max_blocks: usize,
    /// Rows per INSERT statement inside the load transaction.
    #[serde(default = "default_insert_chunk_rows")]
    pub insert_chunk_rows: usize,
    /// Block height ingestion starts from when no run record exists.
    #[serde(default)]
    pub default_start_block: u64,
}

fn default_max_blocks() -> usize {
    100
}

fn default_insert_chunk_rows() -> usize {
    500
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_blocks: default_max_blocks(),
            insert_chunk_rows: default_insert_chunk_rows(),
            default_start_block: 0,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(config::File::with_name("config.toml").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;
        let config: Self = settings.try_deserialize()?;
        if config.api.key.is_empty() {
            return Err(ConfigError::Message("APP_API__KEY is required".to_string()));
        }
        if config.s3.access_key_id.is_empty() {
            return Err(ConfigError::Message(
                "APP_S3__ACCESS_KEY_ID is required".to_string(),
            ));
        }
        if config.s3.secret_access_key.is_empty() {
            return Err(ConfigError::Message(
                "APP_S3__SECRET_ACCESS_KEY is required".to_string(),
            ));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_source_layout() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.s3.bucket, "hl-mainnet-node-data");
        assert_eq!(cfg.s3.prefix, "node_fills_by_block/");
        assert_eq!(cfg.s3.request_payer, "requester");
        assert_eq!(cfg.ingest.max_blocks, 100);
    }
}
