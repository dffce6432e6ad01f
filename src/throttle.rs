//! Site-keyed admission control for analysis requests.
//!
//! The registry remembers when each failure site was last admitted and
//! refuses further admissions for that site until the cooling-off window
//! has passed. Check-and-insert happens under a single mutex, so two
//! concurrent callers can never both be admitted for the same key inside
//! one window.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Source of "now" for the registry
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;
}

/// Wall clock backed by [`Instant::now`]
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        *offset += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = *self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        self.base + offset
    }
}

/// Outcome of [`ThrottleRegistry::admit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Throttled,
}

impl Admission {
    pub fn is_admitted(self) -> bool {
        matches!(self, Self::Admitted)
    }
}

pub struct ThrottleRegistry {
    // key -> last admission time
    entries: Mutex<HashMap<String, Instant>>,
    max_entries: usize,
    clock: Arc<dyn Clock>,
}

impl ThrottleRegistry {
    pub const DEFAULT_MAX_ENTRIES: usize = 1000;

    pub fn new(max_entries: usize) -> Self {
        Self::with_clock(max_entries, Arc::new(SystemClock))
    }

    pub fn with_clock(max_entries: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries: max_entries.max(1),
            clock,
        }
    }

    /// Atomically admit `key` if it has no live entry.
    ///
    /// Admission stamps the key with the current time. A throttled call
    /// leaves the registry untouched.
    pub fn admit(&self, key: &str, window: Duration) -> Admission {
        let now = self.clock.now();
        let mut entries = self.lock();

        if let Some(last) = entries.get(key) {
            if now.saturating_duration_since(*last) < window {
                return Admission::Throttled;
            }
        }

        entries.insert(key.to_string(), now);

        if entries.len() > self.max_entries {
            let before = entries.len();
            entries.retain(|_, last| now.saturating_duration_since(*last) < window);
            let evicted = before - entries.len();

            crate::metrics::record_throttle_evictions(evicted);
            tracing::debug!(
                evicted,
                remaining = entries.len(),
                max_entries = self.max_entries,
                "Evicted expired throttle entries"
            );

            if entries.len() > self.max_entries {
                tracing::warn!(
                    live = entries.len(),
                    max_entries = self.max_entries,
                    "Throttle registry over capacity with only live entries"
                );
            }
        }

        Admission::Admitted
    }

    /// More entries than `max_entries` are held. Only happens while every
    /// entry is still inside its window.
    pub fn is_over_capacity(&self) -> bool {
        self.lock().len() > self.max_entries
    }

    /// Time of the last admission for `key`, live or not
    pub fn last_admitted(&self, key: &str) -> Option<Instant> {
        self.lock().get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ThrottleRegistry {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ENTRIES)
    }
}

impl fmt::Debug for ThrottleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThrottleRegistry")
            .field("entries", &self.len())
            .field("max_entries", &self.max_entries)
            .finish()
    }
}
