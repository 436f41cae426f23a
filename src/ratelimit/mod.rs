//! Rate limiting algorithms and per-identity state management.

mod clock;
mod factory;
mod identity;
mod limiter;
mod registry;
mod sliding_window;
mod token_bucket;

pub use clock::{Clock, MonotonicClock};
#[cfg(test)]
pub use clock::ManualClock;
pub use factory::{LimiterFactory, LimiterParams};
pub use identity::{extract_identity, IdentityKey};
pub use limiter::RateLimiter;
pub use registry::LimiterRegistry;
pub use sliding_window::{SlidingWindowLog, SlidingWindowParams};
pub use token_bucket::{TokenBucket, TokenBucketParams};
