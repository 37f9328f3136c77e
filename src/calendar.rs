//! Unix time to calendar conversion for document timestamps.
//!
//! Uses Howard Hinnant's `civil_from_days` algorithm
//! (<http://howardhinnant.github.io/date_algorithms.html>): O(1), correct for every
//! date of the proleptic Gregorian calendar, no year iteration.

use alloc::format;
use alloc::string::String;
use core::fmt;

const SECONDS_PER_DAY: i64 = 86_400;

/// A broken-down UTC (or offset-local) date and time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct CivilTime {
    /// Proleptic Gregorian year.
    pub year: i32,
    /// Month, 1 to 12.
    pub month: u8,
    /// Day of month, 1 to 31.
    pub day: u8,
    /// Hour, 0 to 23.
    pub hour: u8,
    /// Minute, 0 to 59.
    pub minute: u8,
    /// Second, 0 to 59.
    pub second: u8,
}

impl CivilTime {
    /// Breaks down `secs` seconds since the Unix epoch.
    pub fn from_unix(secs: i64) -> Self {
        let days = secs.div_euclid(SECONDS_PER_DAY);
        let secs_today = secs.rem_euclid(SECONDS_PER_DAY);
        let (year, month, day) = civil_from_days(days);
        Self {
            year,
            month,
            day,
            hour: (secs_today / 3_600) as u8,
            minute: ((secs_today % 3_600) / 60) as u8,
            second: (secs_today % 60) as u8,
        }
    }
}

/// `YYYY-MM-DDTHH:MM:SSZ`
impl fmt::Display for CivilTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

/// Formats `secs` seconds since the Unix epoch as `YYYY-MM-DDTHH:MM:SSZ`.
pub fn iso8601(secs: i64) -> String {
    format!("{}", CivilTime::from_unix(secs))
}

/// Days since 1970-01-01 to (year, month, day).
fn civil_from_days(days_since_epoch: i64) -> (i32, u8, u8) {
    // Shift the epoch to 0000-03-01 so the leap day ends the year.
    let z = days_since_epoch + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    // March is month 0.
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u8;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year as i32, month as u8, day)
}
