//! Bandwidth probe (`erftest*`) logs.
//!
//! The probe prints an absolute time marker, then iperf style measurement
//! lines that only carry an offset relative to the start of the run:
//!
//! ```text
//! [1466000000] Wed Jun 15 14:13:20 UTC 2016
//! [  3]  0.0-10.0 sec  11.2 MBytes  9.40 Mbits/sec
//! ```
//!
//! Measurements seen since the last marker are buffered as candidates and
//! reconciled when the next marker (or end of file) arrives.

use std::cmp::Ordering;
use std::path::Path;

use chrono::{Duration, NaiveDateTime};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::parser::clock::TimeMarker;
use crate::parser::driver::parse_lines;
use crate::parser::model::{dimension_from_path, require_prefix};
use crate::parser::traits::{LineParser, LogParser, ParseError};
use crate::parser::units::normalize_bits;
use crate::series::{Series, SeriesTemplate};

/// Where the extra candidates between two markers are placed.
///
/// `RelativeToFirst` reproduces the "offset 2.0 after a 0.5 finish lands at
/// marker − 1.5 s" placement; `BeforeNextMarker` keeps strays inside the
/// interval they were measured in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrayPlacement {
    /// `next marker − finish offset`
    #[default]
    BeforeNextMarker,
    /// `previous marker − (finish offset − earliest finish offset)`
    RelativeToFirst,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    finish: f64,
    bps: f64,
    line: usize,
}

/// `at + secs`, or `None` when the result leaves the representable range.
fn offset(at: NaiveDateTime, secs: f64) -> Option<NaiveDateTime> {
    let delta = Duration::try_milliseconds((secs * 1000.0).round() as i64)?;
    at.checked_add_signed(delta)
}

fn by_finish(a: &Candidate, b: &Candidate) -> Ordering {
    a.finish.total_cmp(&b.finish)
}

pub struct ErfTestReconciler {
    marker: TimeMarker,
    measurement: Regex,
    strict: bool,
    placement: StrayPlacement,
    previous: Option<NaiveDateTime>,
    candidates: Vec<Candidate>,
    line_no: usize,
    bandwidth: Series,
    errors: Series,
}

impl ErfTestReconciler {
    pub fn new(base: &[String], strict: bool, placement: StrayPlacement) -> Result<Self, regex::Error> {
        let measurement = Regex::new(concat!(
            r"^\[\s*(?P<id>\d+)\]\s*(?P<start>\d+\.\d+)\s*-\s*(?P<finish>\d+\.\d+)\s*sec\s+",
            r"(?P<sent>\d+\.?\d*)\s*(?P<sent_unit>[A-Za-z]?Bytes)\s+",
            r"(?P<bps>\d+\.?\d*)\s*(?P<bps_unit>[A-Za-z]*bits/sec)",
        ))?;
        let dimension = |label: &str| base.iter().cloned().chain(std::iter::once(label.to_string()));

        Ok(Self {
            marker: TimeMarker::new()?,
            measurement,
            strict,
            placement,
            previous: None,
            candidates: Vec::new(),
            line_no: 0,
            bandwidth: Series::with_template(dimension("bandwidth"), &SeriesTemplate::new("bps")),
            errors: Series::with_template(dimension("error"), &SeriesTemplate::discrete("count")),
        })
    }

    fn place(&mut self, key: Option<NaiveDateTime>, candidate: &Candidate) {
        let Some(key) = key else {
            warn!(
                line = candidate.line,
                finish = candidate.finish,
                "Stray sample can't be placed, dropped"
            );
            return;
        };
        info!(
            position = %key,
            line = candidate.line,
            "Insert stray sample to approximated position"
        );
        self.bandwidth.push(key, candidate.bps);
    }

    fn on_marker(&mut self, current: NaiveDateTime) {
        let mut pending = std::mem::take(&mut self.candidates);

        let Some(previous) = self.previous.replace(current) else {
            // Measurements before the very first marker
            for candidate in &pending {
                self.place(offset(current, -candidate.finish), candidate);
            }
            return;
        };

        if pending.is_empty() {
            warn!(from = %previous, to = %current, "Can't find sample between markers");
            if self.strict {
                self.errors.push(previous, 1.0);
            }
            return;
        }

        pending.sort_by(by_finish);
        let first = pending[0];
        self.bandwidth.push(previous, first.bps);

        for candidate in &pending[1..] {
            let key = match self.placement {
                StrayPlacement::BeforeNextMarker => offset(current, -candidate.finish),
                StrayPlacement::RelativeToFirst => offset(previous, first.finish - candidate.finish),
            };
            self.place(key, candidate);
        }
    }
}

impl LineParser for ErfTestReconciler {
    fn feed(&mut self, line: &str) -> Result<(), ParseError> {
        self.line_no += 1;

        if let Some(ts) = self.marker.parse(line) {
            self.on_marker(ts);
            return Ok(());
        }

        let Some(caps) = self.measurement.captures(line) else {
            return Ok(());
        };
        let number = |name: &str| {
            caps[name]
                .parse::<f64>()
                .map_err(|e| ParseError::InvalidFormat(format!("{name}: {e}")))
        };
        let bps = normalize_bits(number("bps")?, &caps["bps_unit"]);
        let finish = number("finish")?;

        self.candidates.push(Candidate {
            finish,
            bps,
            line: self.line_no,
        });
        Ok(())
    }

    fn finish(&mut self) -> Result<(), ParseError> {
        if self.candidates.is_empty() {
            return Ok(());
        }
        let Some(last) = self.previous else {
            return Err(ParseError::Fatal(format!(
                "{} measurements without any time marker",
                self.candidates.len()
            )));
        };

        let mut pending = std::mem::take(&mut self.candidates);
        pending.sort_by(by_finish);
        let first = pending[0];
        self.bandwidth.push(last, first.bps);
        for candidate in &pending[1..] {
            self.place(offset(last, candidate.finish - first.finish), candidate);
        }
        Ok(())
    }

    fn into_series(self) -> Vec<Series> {
        let mut bandwidth = self.bandwidth;
        if self.strict {
            bandwidth.subordinates.push(self.errors);
        }
        vec![bandwidth]
    }
}

/// Parser for `erftest*` bandwidth probe logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErfTestLogParser {
    /// Record gaps between markers in an `error` subordinate series
    pub strict: bool,
    pub placement: StrayPlacement,
}

impl ErfTestLogParser {
    pub fn new(strict: bool, placement: StrayPlacement) -> Self {
        Self { strict, placement }
    }
}

impl LogParser for ErfTestLogParser {
    fn name(&self) -> &'static str {
        "erftest"
    }

    fn parse_file(&self, path: &Path) -> Result<Vec<Series>, ParseError> {
        require_prefix(path, "erftest")?;
        let reconciler = ErfTestReconciler::new(&dimension_from_path(path), self.strict, self.placement)?;
        parse_lines(path, reconciler)
    }
}
