//! Node configuration.

use crate::logging::LogFormat;
use config::{Environment, File, FileFormat};
use nitro_crypto::SecretKey;
use nitro_engine::EngineConfig;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::path::Path;
use thiserror::Error;
use validator::{Validate, ValidationError, ValidationErrors};

/// Prefix of environment overrides, e.g. `NITRO__ENGINE__MAX_IN_FLIGHT_SENDS=8`.
pub const ENV_PREFIX: &str = "NITRO";

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file or environment could not be read.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(#[from] ValidationErrors),

    /// The signing key is not a valid secp256k1 key.
    #[error("invalid secret key: {0}")]
    SecretKey(String),
}

/// Configuration for a nitro node.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct NodeConfig {
    /// Hex-encoded secp256k1 signing key. A fresh key is generated when empty.
    #[validate(custom(function = "validate_secret_key"))]
    pub secret_key: String,
    /// Log level for `nitro*` targets.
    #[validate(custom(function = "validate_log_level"))]
    pub log_level: String,
    /// `pretty` or `json`.
    #[validate(custom(function = "validate_log_format"))]
    pub log_format: String,
    /// In-process peers started next to this node.
    #[validate(range(max = 16))]
    pub local_peers: usize,
    /// Amount each side deposits into a ledger opened with every local peer; 0 opens none.
    pub ledger_deposit: u64,
    /// Challenge window of those ledgers, in seconds.
    #[validate(range(min = 1))]
    pub challenge_duration: u32,
    /// Engine tuning.
    #[validate(custom(function = "validate_engine"))]
    pub engine: EngineConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            local_peers: 0,
            ledger_deposit: 0,
            challenge_duration: 60,
            engine: EngineConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Reads `path` if it exists, applies `NITRO__*` overrides and validates the result.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file = File::from(path).required(false);
        Self::build(file, Self::environment())
    }

    /// Parses YAML text and applies `NITRO__*` overrides.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Self::build(File::from_str(yaml, FileFormat::Yaml), Self::environment())
    }

    fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
    }

    fn build<S>(file: S, env: Environment) -> Result<Self, ConfigError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let config: NodeConfig = config::Config::builder()
            .add_source(file)
            .add_source(env)
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// The configured key, or a new one.
    pub fn signing_key(&self) -> Result<SecretKey, ConfigError> {
        if self.secret_key.is_empty() {
            return Ok(SecretKey::generate());
        }
        SecretKey::from_hex(&self.secret_key)
            .map_err(|e| ConfigError::SecretKey(e.to_string()))
    }

    /// The parsed log format.
    pub fn format(&self) -> LogFormat {
        self.log_format.parse().unwrap_or(LogFormat::Pretty)
    }
}

fn invalid(code: &'static str, message: String) -> ValidationError {
    ValidationError::new(code).with_message(Cow::Owned(message))
}

fn validate_secret_key(key: &str) -> Result<(), ValidationError> {
    if key.is_empty() {
        return Ok(());
    }
    SecretKey::from_hex(key)
        .map(|_| ())
        .map_err(|e| invalid("secret_key", e.to_string()))
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    match level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        other => Err(invalid("log_level", format!("unknown log level '{other}'"))),
    }
}

fn validate_log_format(format: &str) -> Result<(), ValidationError> {
    format
        .parse::<LogFormat>()
        .map(|_| ())
        .map_err(|e| invalid("log_format", e))
}

fn validate_engine(engine: &EngineConfig) -> Result<(), ValidationError> {
    if engine.request_buffer == 0 || engine.event_buffer == 0 || engine.max_in_flight_sends == 0 {
        return Err(invalid(
            "engine",
            "engine buffers and send limit must be positive".to_string(),
        ));
    }
    Ok(())
}
