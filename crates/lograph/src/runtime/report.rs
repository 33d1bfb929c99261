//! Report — one JSON line per series, plus a metrics line per source.

use std::io::{self, Write};

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::series::{LoadMetricsSnapshot, Series, SeriesSet, SeriesStats};

#[derive(Debug, Serialize)]
pub struct SeriesReport<'a> {
    pub source: &'a str,
    pub kind: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub week: Option<NaiveDate>,
    pub dimension: &'a [String],
    pub unit: &'a str,
    pub count: usize,
    pub first: Option<NaiveDateTime>,
    pub last: Option<NaiveDateTime>,
    pub stats: Option<SeriesStats>,
    pub subordinates: Vec<SeriesReport<'a>>,
}

impl<'a> SeriesReport<'a> {
    pub fn new(source: &'a str, kind: &'a str, week: Option<NaiveDate>, series: &'a Series) -> Self {
        Self {
            source,
            kind,
            week,
            dimension: &series.dimension,
            unit: &series.unit,
            count: series.len(),
            first: series.keys().min(),
            last: series.keys().max(),
            stats: series.stats(),
            subordinates: series
                .subordinates
                .iter()
                .map(|sub| SeriesReport::new(source, kind, week, sub))
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct MetricsReport<'a> {
    source: &'a str,
    kind: &'a str,
    files_loaded: usize,
    metrics: LoadMetricsSnapshot,
}

/// Write every series of `set` as a JSON line. Returns the number of lines.
pub fn write_set<W: Write>(
    out: &mut W,
    source: &str,
    kind: &str,
    week: Option<NaiveDate>,
    set: &SeriesSet,
) -> io::Result<usize> {
    let mut lines = 0;
    for series in set {
        write_line(out, &SeriesReport::new(source, kind, week, series))?;
        lines += 1;
    }
    Ok(lines)
}

pub fn write_metrics<W: Write>(
    out: &mut W,
    source: &str,
    kind: &str,
    files_loaded: usize,
    metrics: LoadMetricsSnapshot,
) -> io::Result<()> {
    write_line(
        out,
        &MetricsReport {
            source,
            kind,
            files_loaded,
            metrics,
        },
    )
}

fn write_line<W: Write, T: Serialize>(out: &mut W, value: &T) -> io::Result<()> {
    serde_json::to_writer(&mut *out, value)?;
    out.write_all(b"\n")
}
