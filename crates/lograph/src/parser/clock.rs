//! Timestamp reconstruction shared by the parsers.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use regex::Regex;
use tracing::debug;

/// Absolute time marker written by the probe scripts:
/// `[1466000000] Wed Jun 15 14:13:20 UTC 2016`.
///
/// Only the epoch in brackets is used; the human readable part is matched
/// for shape but ignored.
#[derive(Debug, Clone)]
pub struct TimeMarker {
    re: Regex,
}

impl TimeMarker {
    pub fn new() -> Result<Self, regex::Error> {
        let re = Regex::new(
            r"^\[(?P<epoch>\d+)\]\s+[A-Za-z]{3}\s+[A-Za-z]{3}\s+\d+\s+\d\d:\d\d:\d\d\s+[A-Za-z]{3,5}\s+\d{4}\s*$",
        )?;
        Ok(Self { re })
    }

    /// UTC timestamp of a marker line, `None` for any other line.
    pub fn parse(&self, line: &str) -> Option<NaiveDateTime> {
        let caps = self.re.captures(line)?;
        let epoch: i64 = caps["epoch"].parse().ok()?;
        DateTime::<Utc>::from_timestamp(epoch, 0).map(|dt| dt.naive_utc())
    }
}

/// Rebuilds full timestamps from time-of-day only captures.
///
/// A day boundary is assumed whenever the time of day goes backwards. Captures
/// spanning more than 24 hours, or with clock jumps, get mis-dated.
#[derive(Debug, Clone)]
pub struct DayClock {
    day: NaiveDate,
    last: Option<NaiveTime>,
}

impl DayClock {
    pub fn new(start: NaiveDate) -> Self {
        Self { day: start, last: None }
    }

    pub fn day(&self) -> NaiveDate {
        self.day
    }

    /// Full timestamp for `time`, advancing the day on wraparound.
    pub fn stamp(&mut self, time: NaiveTime) -> NaiveDateTime {
        if let Some(last) = self.last {
            if time < last {
                if let Some(next) = self.day.succ_opt() {
                    debug!(from = %self.day, to = %next, "time of day wrapped, advancing day");
                    self.day = next;
                }
            }
        }
        self.last = Some(time);
        self.day.and_time(time)
    }
}

/// `HH:MM:SS[.ffffff]`
pub fn parse_time_of_day(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M:%S%.f").ok()
}

/// Capture date from a dot separated `YYYYMMDD` file name component,
/// e.g. `edge.20160615.dump`.
pub fn date_from_file_name(name: &str) -> Option<NaiveDate> {
    name.split('.')
        .filter(|part| part.len() == 8 && part.bytes().all(|b| b.is_ascii_digit()))
        .find_map(|part| NaiveDate::parse_from_str(part, "%Y%m%d").ok())
}

/// Configured date, else the file name estimate, else today (UTC).
pub fn resolve_start_date(configured: Option<NaiveDate>, file_name: &str) -> NaiveDate {
    configured
        .or_else(|| date_from_file_name(file_name))
        .unwrap_or_else(|| Utc::now().date_naive())
}
