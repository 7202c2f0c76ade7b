//! Wall-clock time sources.
//!
//! The dial model works in local calendar time (the dial shows what a
//! person in the room expects to read). Everything that needs "now" takes a
//! [`TimeSource`] so tests can pin or step the calendar.

use std::sync::{Mutex, PoisonError};

use chrono::{Local, NaiveDateTime, TimeDelta};

/// Provider of the current local calendar time.
pub trait TimeSource: Send + Sync {
    /// Return the current local date and time.
    fn now(&self) -> NaiveDateTime;
}

/// The system clock, in the local time zone.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTime;

impl TimeSource for LocalTime {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A settable clock for tests and simulated runs.
#[derive(Debug)]
pub struct ManualTime {
    now: Mutex<NaiveDateTime>,
}

impl ManualTime {
    /// Create a clock frozen at `start`.
    pub const fn new(start: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Jump to an absolute time.
    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    /// Move the clock forward by `minutes` whole minutes.
    pub fn advance_minutes(&self, minutes: i64) {
        let mut guard = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(next) = guard.checked_add_signed(TimeDelta::minutes(minutes)) {
            *guard = next;
        }
    }
}

impl TimeSource for ManualTime {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
