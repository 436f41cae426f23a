//! Construction of per-identity limiters from configuration.
//!
//! Configuration is validated once, when the factory is built. After that,
//! creating a limiter cannot fail, which lets the registry construct limiters
//! lazily on the request path.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::clock::{Clock, MonotonicClock};
use super::identity::IdentityKey;
use super::limiter::RateLimiter;
use super::sliding_window::{SlidingWindowLog, SlidingWindowParams};
use super::token_bucket::{TokenBucket, TokenBucketParams};
use crate::config::{LimiterConfig, RateLimitingConfig};
use crate::error::{Result, TollgateError};

/// Validated algorithm choice and parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LimiterParams {
    TokenBucket(TokenBucketParams),
    SlidingWindow(SlidingWindowParams),
}

impl LimiterParams {
    /// Build a fresh limiter reading time from `clock`.
    pub fn build(&self, clock: Arc<dyn Clock>) -> Arc<dyn RateLimiter> {
        match *self {
            LimiterParams::TokenBucket(params) => Arc::new(TokenBucket::from_params(params, clock)),
            LimiterParams::SlidingWindow(params) => {
                Arc::new(SlidingWindowLog::from_params(params, clock))
            }
        }
    }
}

impl TryFrom<&LimiterConfig> for LimiterParams {
    type Error = TollgateError;

    fn try_from(config: &LimiterConfig) -> Result<Self> {
        match *config {
            LimiterConfig::TokenBucket {
                fill_rate,
                capacity,
            } => TokenBucketParams::new(fill_rate, capacity).map(LimiterParams::TokenBucket),
            LimiterConfig::SlidingWindow { window_secs, limit } => {
                SlidingWindowParams::new(Duration::from_secs(window_secs), limit)
                    .map(LimiterParams::SlidingWindow)
            }
        }
    }
}

/// Produces an independent limiter for each identity.
#[derive(Debug, Clone)]
pub struct LimiterFactory {
    default: LimiterParams,
    overrides: HashMap<IdentityKey, LimiterParams>,
    clock: Arc<dyn Clock>,
}

impl LimiterFactory {
    /// Create a factory that gives every identity the same parameters.
    pub fn new(default: LimiterParams) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
            clock: Arc::new(MonotonicClock::new()),
        }
    }

    /// Validate the rate limiting section and build a factory from it.
    pub fn from_config(config: &RateLimitingConfig) -> Result<Self> {
        let default = LimiterParams::try_from(&config.limiter)?;

        let mut overrides = HashMap::with_capacity(config.overrides.len());
        for (identity, limiter) in &config.overrides {
            let params = LimiterParams::try_from(limiter).map_err(|e| {
                TollgateError::InvalidLimiter(format!("override for {}: {}", identity, e))
            })?;
            overrides.insert(IdentityKey::new(identity.as_str()), params);
        }

        info!(
            default = ?default,
            overrides = overrides.len(),
            "Limiter factory configured"
        );

        Ok(Self {
            default,
            overrides,
            clock: Arc::new(MonotonicClock::new()),
        })
    }

    /// Use a specific override for one identity.
    pub fn with_override(mut self, identity: IdentityKey, params: LimiterParams) -> Self {
        self.overrides.insert(identity, params);
        self
    }

    /// Read time from `clock` in every limiter this factory creates.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Parameters that apply to `identity`.
    pub fn params_for(&self, identity: &IdentityKey) -> LimiterParams {
        self.overrides.get(identity).copied().unwrap_or(self.default)
    }

    /// Create a new limiter for `identity`. Each call returns a distinct instance.
    pub fn create(&self, identity: &IdentityKey) -> Arc<dyn RateLimiter> {
        self.params_for(identity).build(self.clock.clone())
    }
}
