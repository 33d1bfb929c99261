//! HTTP access logs of the account API (`http*`, `*access*`).
//!
//! Clients are expected to poll every account resource on a fixed period.
//! For each account id the parser tracks when the next call is due and emits
//! how far the actual call drifted from it.
//!
//! ```text
//! api1 10.0.0.1 (198.51.100.7, 10.0.0.1) - alice [15/Jun/2016:14:13:20 +0000] "GET /v1/accounts/42/status?full=1 HTTP/1.1" 200 512 "-" "poller/2.0"
//! ```

use std::collections::HashMap;
use std::path::Path;

use chrono::{Duration, NaiveDateTime};
use regex::Regex;
use tracing::trace;

use crate::parser::driver::parse_lines;
use crate::parser::model::{dimension_from_path, file_name};
use crate::parser::traits::{LineParser, LogParser, ParseError};
use crate::series::{Series, SeriesMap, SeriesTemplate};

/// Expected polling period.
pub const CALL_PERIOD_SECS: i64 = 30;
/// Server errors are answered after the upstream timeout.
pub const TIMEOUT_SECS: i64 = 3;
/// Drifts beyond this are reported as gaps (`NaN`).
pub const MAX_DELAY_SECS: f64 = 300.0;

const TIMESTAMP_FORMAT: &str = "%d/%b/%Y:%H:%M:%S";

pub struct CallIntervalTracker {
    access: Regex,
    resource: Regex,
    due: HashMap<String, NaiveDateTime>,
    intervals: SeriesMap,
}

impl CallIntervalTracker {
    pub fn new(base: &[String]) -> Result<Self, regex::Error> {
        let access = Regex::new(concat!(
            r#"^(?P<host>\S+)\s+(?P<client>\S+)\s+\((?P<origin>[^, ]+)?(?P<hops>(?:,\s?[^, )]+)*)\)\s+"#,
            r#"(?P<user>\S+)\s+(?P<username>\S+)\s+"#,
            r#"\[(?P<datetime>[^\]]*)\]\s+"(?P<method>[A-Z]+)\s(?P<path>\S+)\s(?P<version>\S+)"\s+"#,
            r#"(?P<status>\d+)\s+(?P<length>\d+)\s+"(?P<referer>[^"]*)"\s+"(?P<agent>[^"]*)"\s*$"#,
        ))?;
        let resource = Regex::new(r"^/(?P<ver>[^/\s]+)/accounts/(?P<id>[^/\s]+)/(?P<resource>[^?\s]+)\?(?P<params>\S+)")?;

        let mut dimension = base.to_vec();
        dimension.push("interval".to_string());

        Ok(Self {
            access,
            resource,
            due: HashMap::new(),
            intervals: SeriesMap::new(dimension, SeriesTemplate::new("seconds")),
        })
    }
}

impl LineParser for CallIntervalTracker {
    fn feed(&mut self, line: &str) -> Result<(), ParseError> {
        let caps = self
            .access
            .captures(line)
            .ok_or_else(|| ParseError::InvalidFormat("not an access log line".into()))?;
        let path = self
            .resource
            .captures(&caps["path"])
            .ok_or_else(|| ParseError::InvalidFormat(format!("unexpected resource path {}", &caps["path"])))?;
        let id = &path["id"];

        // Zone suffix is ignored; every line of a file shares it
        let stamp = caps["datetime"].split_whitespace().next().unwrap_or_default();
        let mut called = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT)
            .map_err(|e| ParseError::InvalidFormat(format!("datetime {stamp}: {e}")))?;
        if &caps["status"] == "500" {
            called = called
                .checked_sub_signed(Duration::seconds(TIMEOUT_SECS))
                .ok_or_else(|| ParseError::InvalidFormat(format!("datetime {stamp} out of range")))?;
        }

        let (key, delay) = match self.due.get(id).copied() {
            None => (called, 0.0),
            Some(due) => {
                let delay = (called - due).num_milliseconds() as f64 / 1000.0;
                if delay < 0.0 {
                    trace!(account = id, delay, "call ahead of schedule, skipped");
                    return Ok(());
                }
                let next = due
                    .checked_add_signed(Duration::seconds(CALL_PERIOD_SECS))
                    .ok_or_else(|| ParseError::InvalidFormat(format!("next call after {due} out of range")))?;
                (next, if delay > MAX_DELAY_SECS { f64::NAN } else { delay })
            }
        };
        self.due.insert(id.to_string(), key);

        self.intervals.entry(id).push(key, delay);
        Ok(())
    }

    fn into_series(self) -> Vec<Series> {
        self.intervals.into_series()
    }
}

/// Parser for API access logs; one `interval` series per account id.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpAccessLogParser;

impl LogParser for HttpAccessLogParser {
    fn name(&self) -> &'static str {
        "http-access"
    }

    fn parse_file(&self, path: &Path) -> Result<Vec<Series>, ParseError> {
        let name = file_name(path)?;
        if !(name.starts_with("http") || name.contains("access")) {
            return Err(ParseError::Unsupported(name.to_string()));
        }
        let tracker = CallIntervalTracker::new(&dimension_from_path(path))?;
        parse_lines(path, tracker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::io::Cursor;

    use crate::parser::driver::parse_reader;

    fn line(time: &str, account: &str, status: u16) -> String {
        format!(
            r#"api1 10.0.0.1 (198.51.100.7, 10.0.0.1) - alice [15/Jun/2016:{time} +0000] "GET /v1/accounts/{account}/status?full=1 HTTP/1.1" {status} 512 "-" "poller/2.0""#
        )
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2016, 6, 15).unwrap().and_hms_opt(h, m, s).unwrap()
    }

    fn run(lines: &[String]) -> Vec<Series> {
        let tracker = CallIntervalTracker::new(&["http".into(), "api1".into()]).unwrap();
        parse_reader(Cursor::new(lines.join("\n").into_bytes()), "test", tracker)
    }

    #[test]
    fn test_intervals_follow_expected_schedule() {
        let out = run(&[
            line("10:00:00", "42", 200),
            line("10:00:35", "42", 200),
            line("10:01:00", "42", 200),
            line("10:00:50", "42", 200), // ahead of schedule
            line("10:01:33", "42", 500),
            line("10:10:00", "42", 200),
        ]);

        assert_eq!(out.len(), 1);
        let series = &out[0];
        assert_eq!(series.dimension, vec!["http", "api1", "interval", "42"]);
        assert_eq!(series.unit, "seconds");

        let keys: Vec<_> = series.keys().collect();
        assert_eq!(
            keys,
            vec![at(10, 0, 0), at(10, 0, 30), at(10, 1, 0), at(10, 1, 30), at(10, 2, 0)]
        );
        let values: Vec<_> = series.values().collect();
        assert_eq!(&values[..4], &[0.0, 35.0, 30.0, 30.0]);
        assert!(values[4].is_nan(), "drift above five minutes is a gap");
    }

    #[test]
    fn test_accounts_tracked_independently() {
        let out = run(&[
            line("10:00:00", "42", 200),
            line("10:00:10", "7", 200),
            line("10:00:31", "42", 200),
        ]);
        assert_eq!(out.len(), 2);
        let seven = out.iter().find(|s| s.has_labels(&["7"])).unwrap();
        assert_eq!(seven.len(), 1);
        assert_eq!(seven.samples[0].value, 0.0);
    }

    #[test]
    fn test_schedule_at_end_of_calendar_is_rejected() {
        let last = r#"api1 10.0.0.1 (198.51.100.7, 10.0.0.1) - alice [31/Dec/+262143:23:59:50 +0000] "GET /v1/accounts/42/status?full=1 HTTP/1.1" 200 512 "-" "poller/2.0""#;
        let mut tracker = CallIntervalTracker::new(&["http".into(), "api1".into()]).unwrap();
        let _ = tracker.feed(last);
        assert!(matches!(tracker.feed(last), Err(ParseError::InvalidFormat(_))));
        assert!(tracker.into_series().iter().all(|s| s.len() <= 1));
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let out = run(&[
            "GET / HTTP/1.1".to_string(),
            line("10:00:00", "42", 200).replace("/accounts/", "/users/"),
            line("10:00:00", "42", 200),
        ]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].len(), 1);
    }

    #[test]
    fn test_file_name_convention() {
        let parser = HttpAccessLogParser;
        assert!(matches!(
            parser.parse_file(Path::new("/tmp/pingtest_host1.log")),
            Err(ParseError::Unsupported(_))
        ));
        assert!(matches!(
            parser.parse_file(Path::new("/nonexistent/api_access.log")),
            Err(ParseError::Io(_))
        ));
    }
}
