//! Wall-clock abstraction.
//!
//! Cache expiry and the apply-token generations are expressed in
//! milliseconds since the Unix epoch. Everything that reads the time goes
//! through a [`Clock`] so tests can drive it by hand.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub type Millis = i64;

/// Source of the current time.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now_millis(&self) -> Millis;
}

/// Convert a `SystemTime` into epoch milliseconds (0 before the epoch).
pub fn system_time_millis(time: SystemTime) -> Millis {
    time.duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// The real clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now_millis(&self) -> Millis {
        system_time_millis(SystemTime::now())
    }
}

/// Hand-driven clock.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: Millis) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    pub fn set(&self, now: Millis) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Millis) {
        self.now.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    #[inline]
    fn now_millis(&self) -> Millis {
        self.now.load(Ordering::SeqCst)
    }
}
