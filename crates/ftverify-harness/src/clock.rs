//! Clocks.
//!
//! Checks never read wall time. Inside a run they see a [`FrozenClock`]:
//! `now` stays fixed until [`FrozenClock::advance`] moves it by an exact
//! amount. [`SystemClock`] exists only for display-only run timestamps.

use std::cell::Cell;
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of "now" in milliseconds since the Unix epoch.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// Real wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }
}

/// Frozen clock: `now = base + cumulative advance`.
///
/// Single logical thread; interior mutability so a shared reference can be
/// advanced from inside a check.
#[derive(Debug)]
pub struct FrozenClock {
    base_ms: Cell<u64>,
    advanced_ms: Cell<u64>,
}

impl FrozenClock {
    #[must_use]
    pub fn new(base_ms: u64) -> Self {
        Self {
            base_ms: Cell::new(base_ms),
            advanced_ms: Cell::new(0),
        }
    }

    /// Move time forward by exactly `delta_ms`.
    pub fn advance(&self, delta_ms: u64) {
        self.advanced_ms
            .set(self.advanced_ms.get().saturating_add(delta_ms));
    }

    /// Reassign the base instant and zero the accumulated advance.
    pub fn reset(&self, base_ms: u64) {
        self.base_ms.set(base_ms);
        self.advanced_ms.set(0);
    }

    pub fn base_ms(&self) -> u64 {
        self.base_ms.get()
    }

    /// `now` as ISO 8601 UTC with millisecond precision.
    pub fn now_iso8601(&self) -> String {
        format_iso8601_from_ms(self.now_ms())
    }

    /// `now` as a `yyyy-mm-dd` calendar date.
    pub fn today(&self) -> String {
        format_date_from_ms(self.now_ms())
    }
}

impl Clock for FrozenClock {
    fn now_ms(&self) -> u64 {
        self.base_ms.get().saturating_add(self.advanced_ms.get())
    }
}

/// Format a Unix-epoch millisecond value as ISO 8601 UTC.
pub fn format_iso8601_from_ms(ms: u64) -> String {
    let secs = ms / 1000;
    let millis = ms % 1000;
    let time_of_day = secs % 86_400;
    let hours = time_of_day / 3600;
    let minutes = (time_of_day % 3600) / 60;
    let seconds = time_of_day % 60;
    let (year, month, day) = days_to_ymd(secs / 86_400);
    format!("{year:04}-{month:02}-{day:02}T{hours:02}:{minutes:02}:{seconds:02}.{millis:03}Z")
}

/// Format a Unix-epoch millisecond value as `yyyy-mm-dd`.
pub fn format_date_from_ms(ms: u64) -> String {
    let (year, month, day) = days_to_ymd(ms / 1000 / 86_400);
    format!("{year:04}-{month:02}-{day:02}")
}

/// Days since 1970-01-01 to (year, month, day), civil calendar (Howard Hinnant).
fn days_to_ymd(days: u64) -> (u64, u64, u64) {
    let z = days + 719_468;
    let era = z / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if m <= 2 { y + 1 } else { y };
    (y, m, d)
}
