//! Clock abstractions used by the limiters and the registry.

use std::time::Instant;

/// Source of monotonic time, so timing can be faked in tests.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> Instant;
}

/// Monotonic clock backed by `Instant::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl MonotonicClock {
    /// Create a new monotonic clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[cfg(test)]
pub use mock::{ManualClock, TickingClock};

/// Controllable clocks for tests.
#[cfg(test)]
mod mock {
    use super::Clock;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    /// Clock that only moves when told to.
    ///
    /// Clones share the same underlying instant, so advancing one clone is
    /// observed by every limiter holding another.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        current: Arc<Mutex<Instant>>,
    }

    impl ManualClock {
        /// Create a manual clock frozen at `start`.
        pub fn new(start: Instant) -> Self {
            Self {
                current: Arc::new(Mutex::new(start)),
            }
        }

        /// Move the clock forward by `duration`.
        pub fn advance(&self, duration: Duration) {
            *self.current.lock() += duration;
        }

        /// Jump the clock to a specific instant, which may lie in the past.
        pub fn set(&self, instant: Instant) {
            *self.current.lock() = instant;
        }
    }

    impl Default for ManualClock {
        fn default() -> Self {
            Self::new(Instant::now())
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.current.lock()
        }
    }

    /// Clock that moves forward by `step` on every read, so concurrent
    /// callers each observe a distinct instant.
    #[derive(Debug)]
    pub struct TickingClock {
        start: Instant,
        step: Duration,
        reads: AtomicU32,
    }

    impl TickingClock {
        pub fn new(step: Duration) -> Self {
            Self {
                start: Instant::now(),
                step,
                reads: AtomicU32::new(0),
            }
        }
    }

    impl Clock for TickingClock {
        fn now(&self) -> Instant {
            self.start + self.step * self.reads.fetch_add(1, Ordering::SeqCst)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_monotonic_clock_never_goes_backwards() {
        let clock = MonotonicClock::new();
        let t1 = clock.now();
        std::thread::sleep(Duration::from_millis(5));
        let t2 = clock.now();

        assert!(t2 >= t1);
    }

    #[test]
    fn test_manual_clock_advance_and_set() {
        let start = Instant::now();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);

        clock.advance(Duration::from_secs(10));
        assert_eq!(clock.now(), start + Duration::from_secs(10));

        clock.set(start + Duration::from_secs(3));
        assert_eq!(clock.now(), start + Duration::from_secs(3));
    }

    #[test]
    fn test_ticking_clock_advances_per_read() {
        let clock = TickingClock::new(Duration::from_millis(2));
        let first = clock.now();
        let second = clock.now();

        assert_eq!(second - first, Duration::from_millis(2));
    }

    #[test]
    fn test_manual_clock_clones_share_time() {
        let clock = ManualClock::default();
        let other = clock.clone();

        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.now(), other.now());
    }
}
