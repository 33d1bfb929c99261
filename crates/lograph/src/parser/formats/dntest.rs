//! Download test (`dntest*`) logs: wget transcripts between time markers.
//!
//! Lines are matched in a fixed order (summary table, progress, marker,
//! explicit error, timeout detail, retry notice, finish summary). Rates are
//! read in bytes/sec and reported in bits/sec.

use std::path::Path;

use chrono::NaiveDateTime;
use regex::{Captures, Regex};
use tracing::{debug, info, trace};

use crate::parser::clock::TimeMarker;
use crate::parser::driver::parse_lines;
use crate::parser::model::{dimension_from_path, require_prefix};
use crate::parser::traits::{LineParser, LogParser, ParseError};
use crate::parser::units::{normalize_bytes, BYTES_TO_BITS};
use crate::series::{Series, SeriesMap, SeriesTemplate};

const DATE_TIME: &str = r"(?P<time>\d{4}-\d{2}-\d{2}\s+\d{2}:\d{2}:\d{2})";
const RATE: &str = r"\(\s*(?P<rate>\d+(?:\.\d+)?)\s*(?P<unit>[/A-Za-z]+)\s*\)";

struct Grammar {
    summary: Regex,
    progress: Regex,
    marker: TimeMarker,
    error: Regex,
    timeout: Regex,
    retry: Regex,
    finished: Regex,
    duration: Regex,
}

impl Grammar {
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            summary: Regex::new(r"^Length:\s*(?P<bytes>\d+)(?:\s*\((?P<human>[^)]*)\))?")?,
            progress: Regex::new(
                r"^\s*(?P<done>\d+)K[.\s]+?(?P<pct>\d+)%\s+(?P<rate>\d+(?:\.\d+)?)(?P<unit>[KMGkmg]?)(?:=(?P<elapsed>[\d.hms]+)|\s+(?P<eta>\S+))?\s*$",
            )?,
            marker: TimeMarker::new()?,
            error: Regex::new(&format!(r"^{DATE_TIME}\s+ERROR\s+(?P<code>\d+):\s*(?P<reason>.*)$"))?,
            timeout: Regex::new(&format!(r"^{DATE_TIME}\s*{RATE}\s*-\s*(?P<reason>[^.]*timed out[^.]*)\.?\s*$"))?,
            retry: Regex::new(&format!(r"^(?:{DATE_TIME}\s*{RATE}\s*-\s*(?P<reason>.*\.))?\s*Retrying\."))?,
            finished: Regex::new(&format!(
                r"^{DATE_TIME}\s*{RATE}\s*-\s*[\x{{2018}}\x{{201C}}'](?P<file>.*)[\x{{2019}}\x{{201D}}']\s*saved\s*\[(?P<got>\d+)(?:/(?P<size>\d+))?\]"
            ))?,
            duration: Regex::new(r"(?P<n>\d+(?:\.\d+)?)(?P<u>[hms])")?,
        })
    }

    /// wget elapsed notation: `3.5s`, `1m2s`, `1h2m3s`.
    fn seconds(&self, text: &str) -> Option<f64> {
        let mut total = None;
        for part in self.duration.captures_iter(text) {
            let n: f64 = part["n"].parse().ok()?;
            let scale = match &part["u"] {
                "h" => 3600.0,
                "m" => 60.0,
                _ => 1.0,
            };
            total = Some(total.unwrap_or(0.0) + n * scale);
        }
        total
    }
}

fn parse_time(caps: &Captures<'_>) -> Result<NaiveDateTime, ParseError> {
    let text = caps["time"].split_whitespace().collect::<Vec<_>>().join(" ");
    NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S")
        .map_err(|e| ParseError::InvalidFormat(format!("bad time '{text}': {e}")))
}

/// Bytes/sec of a `(rate unit)` group.
fn parse_rate(caps: &Captures<'_>) -> Result<f64, ParseError> {
    let rate: f64 = caps["rate"]
        .parse()
        .map_err(|e| ParseError::InvalidFormat(format!("bad rate '{}': {e}", &caps["rate"])))?;
    Ok(normalize_bytes(rate, &caps["unit"]))
}

/// Line state for one download test file.
pub struct DownloadTestState {
    grammar: Grammar,
    current_block: Option<String>,
    last_observed_bps: Option<f64>,
    last_retry_bps: Option<f64>,
    elapsed: f64,
    errors: Vec<NaiveDateTime>,
    last_time: Option<NaiveDateTime>,
    speed: SeriesMap,
    error: SeriesMap,
    elapsed_series: SeriesMap,
    retry: Series,
}

impl DownloadTestState {
    pub fn new(base: &[String]) -> Result<Self, regex::Error> {
        let under = |label: &str| base.iter().cloned().chain(std::iter::once(label.to_string()));
        Ok(Self {
            grammar: Grammar::new()?,
            current_block: None,
            last_observed_bps: None,
            last_retry_bps: None,
            elapsed: 0.0,
            errors: Vec::new(),
            last_time: None,
            speed: SeriesMap::new(under("speed"), SeriesTemplate::new("bps")),
            error: SeriesMap::new(under("error"), SeriesTemplate::discrete("count")),
            elapsed_series: SeriesMap::new(under("elapsed"), SeriesTemplate::new("seconds")),
            retry: Series::with_template(under("retry"), &SeriesTemplate::discrete("count")),
        })
    }

    fn on_progress(&mut self, caps: &Captures<'_>) -> Result<(), ParseError> {
        let rate: f64 = caps["rate"]
            .parse()
            .map_err(|e| ParseError::InvalidFormat(format!("bad progress rate: {e}")))?;
        self.last_observed_bps = Some(normalize_bytes(rate, &caps["unit"]));

        if &caps["pct"] != "100" {
            return Ok(());
        }

        if let Some(secs) = caps.name("elapsed").and_then(|m| self.grammar.seconds(m.as_str())) {
            self.elapsed += secs;
        }
        self.complete_block()
    }

    /// Flush elapsed time and pending errors of the current block.
    fn complete_block(&mut self) -> Result<(), ParseError> {
        let errors = std::mem::take(&mut self.errors);
        let elapsed = std::mem::replace(&mut self.elapsed, 0.0);
        self.last_observed_bps = None;

        let Some(block) = self.current_block.clone() else {
            debug!(errors = errors.len(), "download finished outside of any block");
            return Ok(());
        };
        let at = self.last_time.ok_or_else(|| {
            ParseError::Fatal(format!("block {block} finished before any time marker"))
        })?;

        self.elapsed_series.entry(&block).push(at, elapsed);
        if !errors.is_empty() {
            let error_series = self.error.entry(&block);
            for t in errors {
                error_series.push(t, 1.0);
            }
        }
        Ok(())
    }

    fn event_time(&self, caps: &Captures<'_>) -> Result<Option<NaiveDateTime>, ParseError> {
        match caps.name("time") {
            Some(_) => parse_time(caps).map(Some),
            None => Ok(self.last_time),
        }
    }
}

impl LineParser for DownloadTestState {
    fn feed(&mut self, line: &str) -> Result<(), ParseError> {
        if let Some(caps) = self.grammar.summary.captures(line) {
            let block = caps["bytes"].to_string();
            trace!(block = %block, human = ?caps.name("human").map(|m| m.as_str()), "download block");
            self.current_block = Some(block);
            return Ok(());
        }

        if let Some(caps) = self.grammar.progress.captures(line) {
            return self.on_progress(&caps);
        }

        if let Some(ts) = self.grammar.marker.parse(line) {
            self.last_time = Some(ts);
            return Ok(());
        }

        if let Some(caps) = self.grammar.error.captures(line) {
            let at = parse_time(&caps)?;
            info!(code = &caps["code"], reason = &caps["reason"], "download error");
            self.errors.push(at);
            return Ok(());
        }

        if let Some(caps) = self.grammar.timeout.captures(line) {
            let at = parse_time(&caps)?;
            debug!(reason = &caps["reason"], "download timed out");
            self.last_retry_bps = Some(parse_rate(&caps)?);
            self.errors.push(at);
            return Ok(());
        }

        if let Some(caps) = self.grammar.retry.captures(line) {
            self.last_retry_bps = if caps.name("rate").is_some() {
                Some(parse_rate(&caps)?)
            } else {
                self.last_observed_bps
            };
            match self.event_time(&caps)? {
                Some(at) => {
                    self.retry.push(at, 1.0);
                    self.errors.push(at);
                }
                None => debug!("retry before any time marker"),
            }
            return Ok(());
        }

        if let Some(caps) = self.grammar.finished.captures(line) {
            let at = parse_time(&caps)?;
            let bps = parse_rate(&caps)?;
            let block = caps.name("size").or_else(|| caps.name("got")).map_or("", |m| m.as_str());

            let sustained = match self.last_retry_bps.take() {
                Some(retry_bps) => retry_bps.min(bps),
                None => bps,
            };
            self.speed.entry(block).push(at, sustained * BYTES_TO_BITS);
            self.last_time = Some(at);
            return Ok(());
        }

        Ok(())
    }

    /// Errors of an abandoned transfer stay with its block.
    fn finish(&mut self) -> Result<(), ParseError> {
        let errors = std::mem::take(&mut self.errors);
        if errors.is_empty() {
            return Ok(());
        }
        let Some(block) = self.current_block.as_deref() else {
            debug!(errors = errors.len(), "pending errors outside of any block dropped");
            return Ok(());
        };

        let error_series = self.error.entry(block);
        for t in errors {
            error_series.push(t, 1.0);
        }
        Ok(())
    }

    fn into_series(self) -> Vec<Series> {
        let Self {
            mut speed,
            error,
            elapsed_series,
            retry,
            ..
        } = self;

        for (block, errors) in error.into_entries() {
            speed.entry(&block).subordinates.push(errors);
        }

        let mut out = speed.into_series();
        out.extend(elapsed_series.into_series());
        if !retry.is_empty() {
            out.push(retry);
        }
        out
    }
}

/// Parser for `dntest*` download test logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct DownloadTestLogParser;

impl LogParser for DownloadTestLogParser {
    fn name(&self) -> &'static str {
        "dntest"
    }

    fn parse_file(&self, path: &Path) -> Result<Vec<Series>, ParseError> {
        require_prefix(path, "dntest")?;
        parse_lines(path, DownloadTestState::new(&dimension_from_path(path))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::io::Cursor;

    use crate::parser::driver::parse_reader;

    const MARKER: &str = "[1466000000] Wed Jun 15 14:13:20 UTC 2016";

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2016, 6, 15).unwrap().and_hms_opt(h, m, s).unwrap()
    }

    fn run(lines: &[&str]) -> Vec<Series> {
        let state = DownloadTestState::new(&["dntest".into(), "host1".into()]).unwrap();
        parse_reader(Cursor::new(lines.join("\n").into_bytes()), "test", state)
    }

    fn find<'a>(series: &'a [Series], labels: &[&str]) -> &'a Series {
        series
            .iter()
            .find(|s| s.has_labels(labels))
            .unwrap_or_else(|| panic!("no series {labels:?}"))
    }

    #[test]
    fn test_clean_download() {
        let out = run(&[
            MARKER,
            "--2016-06-15 14:13:20--  http://192.0.2.1/blob",
            "Length: 3309568 (3.2M) [application/octet-stream]",
            "Saving to: \u{2018}blob\u{2019}",
            "     0K .......... .......... .......... .......... ..........  1%  120K 27s",
            "  3200K .......... ....                                      100%  1.2M=3.5s",
            "2016-06-15 14:13:24 (1 MB/s) - \u{2018}blob\u{2019} saved [3309568/3309568]",
        ]);

        let speed = find(&out, &["speed", "3309568"]);
        assert_eq!(speed.dimension, vec!["dntest", "host1", "speed", "3309568"]);
        assert_eq!(speed.unit, "bps");
        assert_eq!(speed.samples[0].key, at(14, 13, 24));
        assert_eq!(speed.samples[0].value, 8.0 * 1024.0 * 1024.0);
        assert!(speed.subordinates.is_empty());

        let elapsed = find(&out, &["elapsed", "3309568"]);
        assert_eq!(elapsed.unit, "seconds");
        assert_eq!(elapsed.samples[0].key, at(14, 13, 20));
        approx::assert_relative_eq!(elapsed.samples[0].value, 3.5);

        assert!(out.iter().all(|s| !s.has_labels(&["retry"])));
    }

    #[test]
    fn test_retry_caps_speed_and_attaches_errors() {
        let out = run(&[
            MARKER,
            "Length: 5524 (5.4K) [text/plain]",
            "     0K .....                                                 40%  10K 1s",
            "2016-06-15 14:13:30 (2 KB/s) - Read error at byte 2210/5524 (Connection timed out). Retrying.",
            "Length: 5524 (5.4K), 3314 (3.2K) remaining [text/plain]",
            "     0K .....                                                100%  8K=1m2s",
            "2016-06-15 14:14:32 (8 KB/s) - \u{201C}blob\u{201D} saved [5524/5524]",
        ]);

        let speed = find(&out, &["speed", "5524"]);
        assert_eq!(speed.samples[0].value, 2.0 * 1024.0 * 8.0, "retry rate is lower");

        let errors = &speed.subordinates[0];
        assert_eq!(errors.dimension, vec!["dntest", "host1", "error", "5524"]);
        assert_eq!(errors.samples[0].key, at(14, 13, 30));

        let retry = find(&out, &["retry"]);
        assert_eq!(retry.len(), 1);
        assert!(!retry.is_continuous);

        approx::assert_relative_eq!(find(&out, &["elapsed", "5524"]).samples[0].value, 62.0);
    }

    #[test]
    fn test_bare_retry_uses_last_observed_rate() {
        let out = run(&[
            MARKER,
            "Length: 5524 (5.4K) [text/plain]",
            "     0K .....                                                 40%  1K 5s",
            "Retrying.",
            "2016-06-15 14:14:32 (8 KB/s) - 'blob' saved [5524/5524]",
        ]);
        assert_eq!(find(&out, &["speed", "5524"]).samples[0].value, 1024.0 * 8.0);
        assert_eq!(find(&out, &["retry"]).samples[0].key, at(14, 13, 20));
    }

    #[test]
    fn test_explicit_and_timeout_errors_flush_on_completion() {
        let out = run(&[
            MARKER,
            "Length: 100 (100) [text/plain]",
            "2016-06-15 14:13:21 ERROR 503: Service Unavailable.",
            "2016-06-15 14:13:22 (0.5 KB/s) - Connection timed out.",
            "     0K                                                       100%  1K=0.1s",
            "2016-06-15 14:13:23 (1 KB/s) - 'blob' saved [100/100]",
        ]);
        let speed = find(&out, &["speed", "100"]);
        assert_eq!(speed.samples[0].value, 0.5 * 1024.0 * 8.0);
        let keys: Vec<_> = speed.subordinates[0].keys().collect();
        assert_eq!(keys, vec![at(14, 13, 21), at(14, 13, 22)]);
    }

    #[test]
    fn test_abandoned_transfer_keeps_errors() {
        let out = run(&[
            MARKER,
            "Length: 5524 (5.4K) [text/plain]",
            "     0K .....                                                 40%  10K 1s",
            "2016-06-15 14:13:30 ERROR 504: Gateway Timeout.",
            "2016-06-15 14:13:40 (2 KB/s) - Read error at byte 2210/5524 (Connection reset by peer). Retrying.",
            "Giving up.",
        ]);

        let speed = find(&out, &["speed", "5524"]);
        assert!(speed.is_empty());
        let keys: Vec<_> = speed.subordinates[0].keys().collect();
        assert_eq!(keys, vec![at(14, 13, 30), at(14, 13, 40)]);
        assert!(out.iter().all(|s| !s.has_labels(&["elapsed"])));
        assert_eq!(find(&out, &["retry"]).len(), 1);
    }

    #[test]
    fn test_completion_before_marker_is_fatal() {
        let mut state = DownloadTestState::new(&["dntest".into()]).unwrap();
        state.feed("Length: 100 (100) [text/plain]").unwrap();
        let err = state.feed("     0K                                                       100%  1K=0.1s");
        assert!(matches!(err, Err(ParseError::Fatal(_))));
    }

    #[test]
    fn test_elapsed_notation() {
        let g = Grammar::new().unwrap();
        assert_eq!(g.seconds("3.5s"), Some(3.5));
        assert_eq!(g.seconds("1m2s"), Some(62.0));
        assert_eq!(g.seconds("1h0m1s"), Some(3601.0));
        assert_eq!(g.seconds(""), None);
    }

    #[test]
    fn test_log_parser_prefix() {
        assert!(matches!(
            DownloadTestLogParser.parse_file(Path::new("/tmp/pingtest_a.log")),
            Err(ParseError::Unsupported(_))
        ));
    }
}
