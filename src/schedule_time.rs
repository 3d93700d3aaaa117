use std::{fmt, str::FromStr};

const SECONDS_PER_DAY: u32 = 24 * 60 * 60;

/// Time of day on a service day, in seconds after midnight.
///
/// Feeds write times past midnight as hours above 23 (`25:10:00` is ten past one on the
/// following morning), so the value is not bounded by one day until it is normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScheduleTime(u32);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid schedule time {0:?}, expected HH:MM:SS")]
pub struct ParseScheduleTimeError(String);

impl ScheduleTime {
    pub fn from_seconds(seconds: u32) -> Self {
        ScheduleTime(seconds)
    }

    pub fn from_hms(hours: u32, minutes: u32, seconds: u32) -> Self {
        ScheduleTime(hours * 3600 + minutes * 60 + seconds)
    }

    pub fn seconds(self) -> u32 {
        self.0
    }

    pub fn hours(self) -> u32 {
        self.0 / 3600
    }

    /// Number of whole days this time runs past the service day it belongs to.
    pub fn day_overflow(self) -> u32 {
        self.0 / SECONDS_PER_DAY
    }

    /// Wraps hours of 24 and above back into the `00..24` range.
    pub fn normalized(self) -> Self {
        ScheduleTime(self.0 % SECONDS_PER_DAY)
    }
}

impl FromStr for ScheduleTime {
    type Err = ParseScheduleTimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseScheduleTimeError(s.to_string());
        let mut parts = s.trim().split(':');
        let mut next = || -> Result<u32, ParseScheduleTimeError> {
            parts.next().ok_or_else(err)?.parse().map_err(|_| err())
        };
        let (hours, minutes, seconds) = (next()?, next()?, next()?);
        if parts.next().is_some() || minutes >= 60 || seconds >= 60 {
            return Err(err());
        }
        hours
            .checked_mul(3600)
            .and_then(|total| total.checked_add(minutes * 60 + seconds))
            .map(ScheduleTime)
            .ok_or_else(err)
    }
}

impl fmt::Display for ScheduleTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}:{:02}",
            self.hours(),
            self.0 / 60 % 60,
            self.0 % 60
        )
    }
}
