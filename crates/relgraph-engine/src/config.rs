//! Configuration management for the relgraph engine.
//!
//! Configuration is layered from three sources:
//! 1. Default values (hardcoded)
//! 2. Configuration file (YAML)
//! 3. Environment variables (override)
//!
//! Environment variables take precedence over file values, which take
//! precedence over defaults. Variables use the `RELGRAPH_` prefix and `__`
//! as the nested key separator, e.g. `RELGRAPH_RESOLVER__MAX_DEPTH=40`.
//!
//! # Example YAML Configuration
//!
//! ```yaml
//! resolver:
//!   max_depth: 25
//!   timeout_ms: 30000
//!   max_concurrency: 32
//! cache:
//!   enabled: true
//!   max_capacity: 100000
//!   ttl_secs: 300
//! logging:
//!   level: info
//!   json: false
//! ```

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use tracing::Level;

use relgraph_domain::cache::QueryCacheConfig;
use relgraph_domain::resolver::ResolverConfig;

use crate::observability::LoggingConfig;

/// Engine configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct EngineConfig {
    /// Evaluator limits
    #[serde(default)]
    pub resolver: ResolverSettings,

    /// Query cache settings
    #[serde(default)]
    pub cache: CacheSettings,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Evaluator limits.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ResolverSettings {
    /// Maximum nested (object, relation) steps on one evaluation path.
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Default per-query deadline in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Sub-queries evaluated concurrently per fan-out.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Share one computation between concurrent identical sub-queries.
    #[serde(default = "default_true")]
    pub dedup: bool,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            timeout_ms: default_timeout_ms(),
            max_concurrency: default_max_concurrency(),
            dedup: true,
        }
    }
}

fn default_max_depth() -> u32 {
    25
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_concurrency() -> usize {
    32
}

fn default_true() -> bool {
    true
}

/// Query cache settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CacheSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum number of memoized sub-query results.
    #[serde(default = "default_max_capacity")]
    pub max_capacity: u64,

    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_capacity: default_max_capacity(),
            ttl_secs: default_ttl_secs(),
        }
    }
}

fn default_max_capacity() -> u64 {
    100_000
}

fn default_ttl_secs() -> u64 {
    300
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LoggingSettings {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Use JSON format (true for production, false for development)
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

impl EngineConfig {
    /// Loads configuration from a YAML file with environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigLoadError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let config = Config::builder()
            .add_source(Config::try_from(&EngineConfig::default())?)
            .add_source(File::from(path).format(FileFormat::Yaml))
            .add_source(environment())
            .build()?;

        let engine_config: EngineConfig = config.try_deserialize()?;
        engine_config.validate()?;
        Ok(engine_config)
    }

    /// Loads defaults with environment overrides only.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let config = Config::builder()
            .add_source(Config::try_from(&EngineConfig::default())?)
            .add_source(environment())
            .build()?;

        let engine_config: EngineConfig = config.try_deserialize()?;
        engine_config.validate()?;
        Ok(engine_config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.resolver.max_depth == 0 {
            return Err(invalid("resolver.max_depth must be greater than 0"));
        }
        if self.resolver.timeout_ms == 0 {
            return Err(invalid("resolver.timeout_ms must be greater than 0"));
        }
        if self.resolver.max_concurrency == 0 {
            return Err(invalid("resolver.max_concurrency must be greater than 0"));
        }
        if self.cache.enabled && self.cache.max_capacity == 0 {
            return Err(invalid("cache.max_capacity must be greater than 0"));
        }
        if Level::from_str(&self.logging.level).is_err() {
            return Err(ConfigLoadError::Invalid {
                message: format!(
                    "logging.level must be one of: [\"trace\", \"debug\", \"info\", \"warn\", \"error\"], got: {}",
                    self.logging.level
                ),
            });
        }
        Ok(())
    }

    /// Evaluator settings, without a cache attached.
    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig::default()
            .with_max_depth(self.resolver.max_depth)
            .with_timeout(Duration::from_millis(self.resolver.timeout_ms))
            .with_max_concurrency(self.resolver.max_concurrency)
            .with_dedup(self.resolver.dedup)
    }

    pub fn cache_config(&self) -> QueryCacheConfig {
        QueryCacheConfig::default()
            .with_enabled(self.cache.enabled)
            .with_max_capacity(self.cache.max_capacity)
            .with_ttl(Duration::from_secs(self.cache.ttl_secs))
    }

    /// Logging setup; an unparsable level falls back to INFO.
    pub fn logging_config(&self) -> LoggingConfig {
        LoggingConfig {
            level: Level::from_str(&self.logging.level).unwrap_or(Level::INFO),
            json: self.logging.json,
        }
    }
}

fn environment() -> Environment {
    Environment::with_prefix("RELGRAPH")
        .prefix_separator("_")
        .separator("__")
}

fn invalid(message: &str) -> ConfigLoadError {
    ConfigLoadError::Invalid {
        message: message.to_string(),
    }
}
