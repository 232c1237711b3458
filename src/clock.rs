//! Time source abstraction.
//!
//! Everything that needs "now" or the local hour-of-day takes an
//! `Arc<dyn Clock>` so tests can pin the instant.

use std::sync::Mutex;

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;

/// Source of the current instant, in UTC and in the service's local zone.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;

    /// The configured local timezone.
    fn timezone(&self) -> Tz;

    /// Current instant in the local timezone.
    fn local_now(&self) -> DateTime<Tz> {
        self.now().with_timezone(&self.timezone())
    }

    /// Hour-of-day (0–23) in the local timezone.
    fn local_hour(&self) -> u32 {
        self.local_now().hour()
    }
}

/// Wall-clock time in a fixed IANA zone.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    tz: Tz,
}

impl SystemClock {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn timezone(&self) -> Tz {
        self.tz
    }
}

/// A clock frozen at a given instant. Used by tests.
#[derive(Debug)]
pub struct FixedClock {
    instant: Mutex<DateTime<Utc>>,
    tz: Tz,
}

impl FixedClock {
    pub fn new(instant: DateTime<Utc>, tz: Tz) -> Self {
        Self {
            instant: Mutex::new(instant),
            tz,
        }
    }

    /// A clock whose local time is `hour:00` on 2026-01-15 in `tz`.
    pub fn at_local_hour(hour: u32, tz: Tz) -> Self {
        use chrono::TimeZone;
        let local = tz
            .with_ymd_and_hms(2026, 1, 15, hour.min(23), 0, 0)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        Self::new(local, tz)
    }

    /// Move the clock forward.
    pub fn advance(&self, by: chrono::Duration) {
        if let Ok(mut guard) = self.instant.lock() {
            *guard += by;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.instant
            .lock()
            .map(|guard| *guard)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }

    fn timezone(&self) -> Tz {
        self.tz
    }
}
