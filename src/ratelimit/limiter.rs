//! Rate limiter trait shared by every admission algorithm.

/// Trait for rate limiter implementations.
///
/// `allow` both evaluates and consumes quota: a `true` result means one unit
/// was taken. Implementations serialize concurrent calls internally, so an
/// instance can be shared behind an `Arc` by any number of tasks.
pub trait RateLimiter: Send + Sync {
    /// Decide whether one more request may proceed right now.
    fn allow(&self) -> bool;
}
