//! Server configuration from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use actors::{CommandSpec, InvokerConfig};
use api::GatewayConfig;
use db::DbConfig;
use queue_core::PoolConfig;
use storage::StorageConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}")]
    Invalid { var: &'static str, value: String },
}

/// Server configuration loaded from environment variables.
///
/// All fields default to values suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `4000`).
    pub port: u16,
    /// Request body limit for the upload routes (default: 1 GiB).
    pub max_upload_bytes: usize,
    pub gateway: GatewayConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                  |
    /// |---------------------------|--------------------------|
    /// | `HOST`                    | `0.0.0.0`                |
    /// | `PORT`                    | `4000`                   |
    /// | `UPLOAD_DIR`              | `./uploads`              |
    /// | `RESULT_DIR`              | `./results`              |
    /// | `DB_ENDPOINT`             | `mem://`                 |
    /// | `QUEUE_CHANNEL`           | `pdf-processing`         |
    /// | `WORKER_COUNT`            | `2`                      |
    /// | `CONVERSION_TIMEOUT_SECS` | `600`                    |
    /// | `RETRY_LIMIT`             | `0`                      |
    /// | `JOB_TTL_SECS`            | unset (no pruning)       |
    /// | `CONVERTER_SINGLE`        | `python worker.py`       |
    /// | `CONVERTER_BATCH`         | `python batch_worker.py` |
    /// | `MAX_UPLOAD_BYTES`        | `1073741824`             |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let host = var("HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = parse_or(&var, "PORT", 4000u16)?;
        let max_upload_bytes = parse_or(&var, "MAX_UPLOAD_BYTES", 1024 * 1024 * 1024usize)?;

        let db = var("DB_ENDPOINT").map(DbConfig::endpoint).unwrap_or_default();

        let storage = StorageConfig::new(
            var("UPLOAD_DIR").map_or_else(|| PathBuf::from("./uploads"), PathBuf::from),
            var("RESULT_DIR").map_or_else(|| PathBuf::from("./results"), PathBuf::from),
        );

        let mut pool = PoolConfig::default()
            .with_workers(parse_or(&var, "WORKER_COUNT", 2usize)?)
            .with_retry_limit(parse_or(&var, "RETRY_LIMIT", 0u32)?)
            .with_job_ttl(parse_opt(&var, "JOB_TTL_SECS")?);
        if let Some(channel) = var("QUEUE_CHANNEL") {
            pool = pool.with_channel(channel);
        }

        let timeout_secs = parse_or(&var, "CONVERSION_TIMEOUT_SECS", 600u64)?;
        if timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "CONVERSION_TIMEOUT_SECS",
                value: "0".to_string(),
            });
        }
        let mut invoker = InvokerConfig {
            timeout: Duration::from_secs(timeout_secs),
            ..InvokerConfig::default()
        };
        if let Some(command) = command(&var, "CONVERTER_SINGLE")? {
            invoker.single = command;
        }
        if let Some(command) = command(&var, "CONVERTER_BATCH")? {
            invoker.batch = command;
        }

        Ok(Self {
            host,
            port,
            max_upload_bytes,
            gateway: GatewayConfig {
                db,
                storage,
                pool,
                invoker,
            },
        })
    }
}

fn parse_opt<T: FromStr>(
    var: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    var(name)
        .map(|value| {
            value.trim().parse().map_err(|_| ConfigError::Invalid {
                var: name,
                value,
            })
        })
        .transpose()
}

fn parse_or<T: FromStr>(
    var: impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    Ok(parse_opt(var, name)?.unwrap_or(default))
}

fn command(
    var: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<CommandSpec>, ConfigError> {
    var(name)
        .map(|line| CommandSpec::parse(&line).ok_or(ConfigError::Invalid { var: name, value: line }))
        .transpose()
}
