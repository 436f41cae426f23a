//! Continuous-refill token bucket.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tracing::trace;

use super::clock::{Clock, MonotonicClock};
use super::limiter::RateLimiter;
use crate::error::{Result, TollgateError};

/// Validated token bucket parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBucketParams {
    fill_rate: f64,
    capacity: u64,
}

impl TokenBucketParams {
    /// Validate a fill rate (tokens per second) and a burst capacity.
    pub fn new(fill_rate: f64, capacity: u64) -> Result<Self> {
        if !fill_rate.is_finite() || fill_rate <= 0.0 {
            return Err(TollgateError::InvalidLimiter(format!(
                "token bucket fill_rate must be a positive number, got {}",
                fill_rate
            )));
        }
        if capacity == 0 {
            return Err(TollgateError::InvalidLimiter(
                "token bucket capacity must be at least 1".to_string(),
            ));
        }
        Ok(Self { fill_rate, capacity })
    }

    /// Tokens added per second.
    pub fn fill_rate(&self) -> f64 {
        self.fill_rate
    }

    /// Maximum number of tokens the bucket holds.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }
}

struct BucketState {
    /// Token level at `anchor`, minus every token spent since. May go
    /// negative while refill credit accrues; the level itself never does.
    base: f64,
    /// Refill is measured from here in one multiplication, so rounding
    /// does not compound across many short intervals.
    anchor: Instant,
    /// Latest instant observed; time is never allowed to run backwards.
    last_seen: Instant,
}

/// A token bucket that refills continuously at `fill_rate` tokens per second.
///
/// The bucket starts full, so the first `capacity` calls are admitted
/// immediately.
pub struct TokenBucket {
    params: TokenBucketParams,
    state: Mutex<BucketState>,
    clock: Arc<dyn Clock>,
}

impl TokenBucket {
    /// Create a token bucket reading the process monotonic clock.
    pub fn new(fill_rate: f64, capacity: u64) -> Result<Self> {
        let params = TokenBucketParams::new(fill_rate, capacity)?;
        Ok(Self::from_params(params, Arc::new(MonotonicClock::new())))
    }

    /// Create a token bucket from already validated parameters.
    pub fn from_params(params: TokenBucketParams, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            params,
            state: Mutex::new(BucketState {
                base: params.capacity as f64,
                anchor: now,
                last_seen: now,
            }),
            clock,
        }
    }

    /// The parameters this bucket was built with.
    pub fn params(&self) -> TokenBucketParams {
        self.params
    }

    /// Current token level, after refilling up to now.
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state)
    }

    /// Bring the bucket up to date and return its token level.
    ///
    /// Must be called with the state lock held; the clock is read inside it.
    fn refill(&self, state: &mut BucketState) -> f64 {
        let now = self.clock.now().max(state.last_seen);
        state.last_seen = now;

        let capacity = self.params.capacity as f64;
        let accrued = now.duration_since(state.anchor).as_secs_f64() * self.params.fill_rate;
        let tokens = state.base + accrued;

        if tokens >= capacity {
            // Full: restart the refill clock so no credit is banked above capacity.
            state.base = capacity;
            state.anchor = now;
            return capacity;
        }
        tokens.max(0.0)
    }
}

impl RateLimiter for TokenBucket {
    fn allow(&self) -> bool {
        let mut state = self.state.lock();
        let tokens = self.refill(&mut state);

        if tokens >= 1.0 {
            state.base -= 1.0;
            trace!(tokens = tokens - 1.0, "Token bucket admitted request");
            true
        } else {
            trace!(tokens, "Token bucket empty");
            false
        }
    }
}

impl std::fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucket")
            .field("fill_rate", &self.params.fill_rate)
            .field("capacity", &self.params.capacity)
            .field("tokens", &self.available())
            .finish()
    }
}
