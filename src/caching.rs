//! Time-limited value caching
//!
//! A `Cached` holds at most one value, which stays available for a fixed
//! validity period after it was stored and is then forgotten. Time is read
//! from a pluggable monotonic clock, so that expiration can be tested without
//! sleeping.

use crate::config::CacheConfig;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::trace;


/// Source of monotonic timestamps
pub trait Clock: Send + Sync {
    /// Time elapsed since some fixed origin
    fn now(&self) -> Duration;
}


/// Clock backed by the system's monotonic clock
#[derive(Clone, Copy, Debug)]
pub struct SystemClock {
    origin: Instant,
}
//
impl SystemClock {
    /// Create a clock whose origin is the present instant
    pub fn new() -> Self {
        SystemClock { origin: Instant::now() }
    }
}
//
impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}
//
impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}


/// Clock which only moves when told to, with millisecond resolution
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}
//
impl ManualClock {
    /// Create a clock reading zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the current reading
    pub fn set(&self, now: Duration) {
        self.millis.store(now.as_millis() as u64, Ordering::Release);
    }

    /// Move the clock forward
    pub fn advance(&self, delta: Duration) {
        self.millis.fetch_add(delta.as_millis() as u64, Ordering::AcqRel);
    }
}
//
impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_millis(self.millis.load(Ordering::Acquire))
    }
}


/// Single value that expires after a validity period
pub struct Cached<T> {
    /// How long a stored value remains available
    validity: Duration,

    /// Time source
    clock: Arc<dyn Clock>,

    /// Stored value and storage timestamp (mutex-protected)
    entry: Mutex<Option<(T, Duration)>>,
}
//
impl<T: Clone> Cached<T> {
    /// Default validity period of cached values
    pub const DEFAULT_VALIDITY: Duration = Duration::from_secs(60);

    /// Create an empty cache using the system clock
    pub fn new(validity: Duration) -> Self {
        Self::with_clock(validity, Arc::new(SystemClock::new()))
    }

    /// Create an empty cache using a specific clock
    pub fn with_clock(validity: Duration, clock: Arc<dyn Clock>) -> Self {
        Cached {
            validity,
            clock,
            entry: Mutex::new(None),
        }
    }

    /// Create an empty cache configured from settings
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.validity())
    }

    /// Get the stored value, if it is still valid
    ///
    /// Expired values are dropped on the spot.
    ///
    pub fn get(&self) -> Option<T> {
        let mut entry = self.lock_entry();
        let age = match &*entry {
            Some((_, stored_at)) => self.clock.now().saturating_sub(*stored_at),
            None => return None,
        };
        if age <= self.validity {
            entry.as_ref().map(|(value, _)| value.clone())
        } else {
            trace!(?age, validity = ?self.validity, "Cached value expired");
            *entry = None;
            None
        }
    }

    /// Store a value, or clear the cache with `None`
    pub fn set(&self, value: Option<T>) {
        let now = self.clock.now();
        *self.lock_entry() = value.map(|value| (value, now));
    }

    /// Validity period of stored values
    pub fn validity(&self) -> Duration {
        self.validity
    }

    fn lock_entry(&self) -> MutexGuard<Option<(T, Duration)>> {
        self.entry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
//
impl<T: Clone> Default for Cached<T> {
    fn default() -> Self {
        Self::new(Self::DEFAULT_VALIDITY)
    }
}
//
impl<T> fmt::Debug for Cached<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let filled = self.entry
                         .lock()
                         .map(|entry| entry.is_some())
                         .unwrap_or(false);
        f.debug_struct("Cached")
         .field("validity", &self.validity)
         .field("filled", &filled)
         .finish()
    }
}
