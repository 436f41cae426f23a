//! Per-identity limiter registry.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::clock::{Clock, MonotonicClock};
use super::identity::IdentityKey;
use super::limiter::RateLimiter;

type Factory<K> = dyn Fn(&K) -> Arc<dyn RateLimiter> + Send + Sync;

struct Entry {
    limiter: Arc<dyn RateLimiter>,
    last_seen: Mutex<Instant>,
}

impl Entry {
    /// Record a use at `now`. Racing resolvers may arrive out of order, so
    /// `last_seen` only ever moves forward.
    fn touch(&self, now: Instant) {
        let mut last_seen = self.last_seen.lock();
        if now > *last_seen {
            *last_seen = now;
        }
    }
}

/// Maps each identity to its own limiter, creating limiters on first use.
///
/// Lookups for different identities proceed in parallel; concurrent first
/// lookups for the same identity construct exactly one limiter and all
/// callers receive it.
pub struct LimiterRegistry<K = IdentityKey>
where
    K: Eq + Hash,
{
    limiters: DashMap<K, Entry>,
    factory: Box<Factory<K>>,
    clock: Arc<dyn Clock>,
}

impl<K> LimiterRegistry<K>
where
    K: Eq + Hash + Clone + std::fmt::Display + Send + Sync + 'static,
{
    /// Create a registry that builds limiters with `factory`.
    ///
    /// The factory must return a new instance on every call; handing out one
    /// shared limiter would merge every identity into a single quota.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&K) -> Arc<dyn RateLimiter> + Send + Sync + 'static,
    {
        Self {
            limiters: DashMap::new(),
            factory: Box::new(factory),
            clock: Arc::new(MonotonicClock::new()),
        }
    }

    /// Track idle time with `clock` instead of the process monotonic clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Return the limiter for `identity`, creating it if this is the first request.
    pub fn resolve(&self, identity: &K) -> Arc<dyn RateLimiter> {
        let now = self.clock.now();

        if let Some(entry) = self.limiters.get(identity) {
            entry.touch(now);
            return entry.limiter.clone();
        }

        // The shard stays write-locked while the factory runs, so a racing
        // resolver for the same key waits and then sees this entry.
        let entry = self
            .limiters
            .entry(identity.clone())
            .or_insert_with(|| {
                debug!(identity = %identity, "Creating new limiter");
                Entry {
                    limiter: (self.factory)(identity),
                    last_seen: Mutex::new(now),
                }
            });
        entry.touch(now);
        entry.limiter.clone()
    }

    /// Remove limiters that have not been resolved for at least `ttl`.
    ///
    /// Returns the number of evicted identities. An evicted identity starts
    /// over with a fresh limiter on its next request.
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        let now = self.clock.now();
        let before = self.limiters.len();

        self.limiters
            .retain(|_, entry| now.saturating_duration_since(*entry.last_seen.lock()) < ttl);

        let evicted = before.saturating_sub(self.limiters.len());
        if evicted > 0 {
            debug!(evicted, remaining = self.limiters.len(), "Evicted idle limiters");
        }
        evicted
    }

    /// Periodically evict limiters idle for at least `ttl`.
    ///
    /// Must be called from within a tokio runtime. The task runs until aborted.
    pub fn spawn_sweeper(self: Arc<Self>, ttl: Duration) -> JoinHandle<()> {
        info!(ttl_secs = ttl.as_secs_f64(), "Starting idle limiter sweeper");
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(ttl);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                self.evict_idle(ttl);
            }
        })
    }

    /// Whether a limiter currently exists for `identity`.
    pub fn contains(&self, identity: &K) -> bool {
        self.limiters.contains_key(identity)
    }

    /// Get the number of tracked identities.
    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }

    /// Drop every limiter.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.limiters.clear();
    }
}

impl<K: Eq + Hash> std::fmt::Debug for LimiterRegistry<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LimiterRegistry")
            .field("identities", &self.limiters.len())
            .finish()
    }
}
