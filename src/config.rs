//! Configuration management for Tollgate.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use tracing::info;

use crate::error::{Result, TollgateError};

/// Prefix for environment variable overrides, e.g. `TOLLGATE__SERVER__LISTEN_ADDR`.
const ENV_PREFIX: &str = "TOLLGATE";

/// Main configuration for the Tollgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Artificial latency of the demonstration handler in milliseconds
    #[serde(default = "default_handler_delay_ms")]
    pub handler_delay_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            handler_delay_ms: default_handler_delay_ms(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_handler_delay_ms() -> u64 {
    3000
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// When false the admission middleware forwards every request
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Limiter built for every identity without an override
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Per-identity limiter overrides, keyed by identity (client IP)
    #[serde(default)]
    pub overrides: HashMap<String, LimiterConfig>,

    /// Evict limiters idle for this many seconds; unset keeps them forever
    #[serde(default)]
    pub idle_ttl_secs: Option<u64>,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            limiter: LimiterConfig::default(),
            overrides: HashMap::new(),
            idle_ttl_secs: None,
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// Algorithm and parameters for one limiter, as written in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LimiterConfig {
    /// Continuous-refill token bucket
    TokenBucket {
        /// Tokens added per second
        fill_rate: f64,
        /// Burst capacity
        capacity: u64,
    },
    /// Timestamp log over a trailing window
    SlidingWindow {
        /// Window length in seconds
        window_secs: u64,
        /// Admissions allowed per window
        limit: usize,
    },
}

impl Default for LimiterConfig {
    fn default() -> Self {
        LimiterConfig::TokenBucket {
            fill_rate: 1.0,
            capacity: 10,
        }
    }
}

impl TollgateConfig {
    /// Load configuration from an optional file, then apply environment overrides.
    ///
    /// The file format is inferred from its extension (YAML, TOML or JSON).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(config::File::from(path));
        }

        let config = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Check settings that serde alone cannot reject.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limiting.idle_ttl_secs == Some(0) {
            return Err(TollgateError::Config(
                "rate_limiting.idle_ttl_secs must be positive when set".to_string(),
            ));
        }
        Ok(())
    }

    /// Idle eviction period, if one is configured.
    pub fn idle_ttl(&self) -> Option<std::time::Duration> {
        self.rate_limiting
            .idle_ttl_secs
            .map(std::time::Duration::from_secs)
    }
}
