//! Sliding window log limiter.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

use super::clock::{Clock, MonotonicClock};
use super::limiter::RateLimiter;
use crate::error::{Result, TollgateError};

/// Validated sliding window parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlidingWindowParams {
    window: Duration,
    limit: usize,
}

impl SlidingWindowParams {
    /// Validate a window length and the number of admissions allowed inside it.
    pub fn new(window: Duration, limit: usize) -> Result<Self> {
        if window.is_zero() {
            return Err(TollgateError::InvalidLimiter(
                "sliding window duration must be positive".to_string(),
            ));
        }
        if limit == 0 {
            return Err(TollgateError::InvalidLimiter(
                "sliding window limit must be at least 1".to_string(),
            ));
        }
        Ok(Self { window, limit })
    }

    /// Length of the trailing window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Admissions allowed per window.
    pub fn limit(&self) -> usize {
        self.limit
    }
}

/// A limiter that remembers when each admitted request happened and admits a
/// new one only while fewer than `limit` of them fall inside the trailing
/// window.
pub struct SlidingWindowLog {
    params: SlidingWindowParams,
    /// Admission instants, oldest at the front.
    logs: Mutex<VecDeque<Instant>>,
    clock: Arc<dyn Clock>,
}

impl SlidingWindowLog {
    /// Create a sliding window log reading the process monotonic clock.
    pub fn new(window: Duration, limit: usize) -> Result<Self> {
        let params = SlidingWindowParams::new(window, limit)?;
        Ok(Self::from_params(params, Arc::new(MonotonicClock::new())))
    }

    /// Create a sliding window log from already validated parameters.
    pub fn from_params(params: SlidingWindowParams, clock: Arc<dyn Clock>) -> Self {
        Self {
            params,
            logs: Mutex::new(VecDeque::with_capacity(params.limit)),
            clock,
        }
    }

    /// The parameters this log was built with.
    pub fn params(&self) -> SlidingWindowParams {
        self.params
    }

    /// Number of admissions currently inside the window.
    pub fn in_window(&self) -> usize {
        let mut logs = self.logs.lock();
        self.evict(&mut logs, self.clock.now());
        logs.len()
    }

    fn evict(&self, logs: &mut VecDeque<Instant>, now: Instant) {
        // Nothing can be older than an edge that precedes the clock's origin.
        let Some(edge) = now.checked_sub(self.params.window) else {
            return;
        };

        while let Some(&oldest) = logs.front() {
            if oldest < edge {
                logs.pop_front();
            } else {
                break;
            }
        }
    }
}

impl RateLimiter for SlidingWindowLog {
    fn allow(&self) -> bool {
        // Read the clock under the lock so entries are pushed in time order.
        let mut logs = self.logs.lock();
        let now = self.clock.now();
        self.evict(&mut logs, now);

        if logs.len() < self.params.limit {
            logs.push_back(now);
            trace!(in_window = logs.len(), "Sliding window admitted request");
            true
        } else {
            trace!(in_window = logs.len(), "Sliding window full");
            false
        }
    }
}

impl std::fmt::Debug for SlidingWindowLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlidingWindowLog")
            .field("window", &self.params.window)
            .field("limit", &self.params.limit)
            .field("logged", &self.logs.lock().len())
            .finish()
    }
}
