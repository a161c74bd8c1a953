//! Time source for the scheduler

use chrono::{Duration, Local, NaiveDateTime};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Instant;

/// Source of local wall-clock time and of a monotonic reading.
///
/// Wall time places the daily slot; the monotonic reading paces intervals so
/// clock steps (DST, NTP) neither stall nor burst them.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    /// Time elapsed since a fixed, arbitrary origin
    fn monotonic(&self) -> std::time::Duration;
}

/// Local system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn monotonic(&self) -> std::time::Duration {
        static ORIGIN: OnceLock<Instant> = OnceLock::new();
        ORIGIN.get_or_init(Instant::now).elapsed()
    }
}

#[derive(Debug)]
struct ManualTime {
    wall: NaiveDateTime,
    elapsed: std::time::Duration,
}

/// Hand-driven clock; clones share the same time
#[derive(Debug, Clone)]
pub struct ManualClock {
    time: Arc<Mutex<ManualTime>>,
}

impl ManualClock {
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            time: Arc::new(Mutex::new(ManualTime {
                wall: start,
                elapsed: std::time::Duration::ZERO,
            })),
        }
    }

    fn time(&self) -> MutexGuard<'_, ManualTime> {
        self.time.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Step the wall clock only, as a DST change or NTP correction would
    pub fn set(&self, to: NaiveDateTime) {
        self.time().wall = to;
    }

    /// Let time pass. A negative `by` moves the wall clock only.
    pub fn advance(&self, by: Duration) {
        let mut time = self.time();
        time.wall += by;
        if let Ok(by) = by.to_std() {
            time.elapsed += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        self.time().wall
    }

    fn monotonic(&self) -> std::time::Duration {
        self.time().elapsed
    }
}
