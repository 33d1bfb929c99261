//! SeriesSet — merges parser output by dimension across many files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::{debug, error, info, warn};

use super::metrics::LoadMetrics;
use super::model::Series;
use crate::parser::{LogParser, ParseError};

type SeriesIndex = BTreeMap<Vec<String>, Series>;

/// One merged [`Series`] per dimension, plus the files that produced them.
#[derive(Debug, Default)]
pub struct SeriesSet {
    series: SeriesIndex,
    sources: Vec<PathBuf>,
    consolidate: bool,
    metrics: LoadMetrics,
}

impl SeriesSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-consolidate every series after each merge.
    pub fn with_consolidation() -> Self {
        Self {
            consolidate: true,
            ..Self::default()
        }
    }

    /// Load a file, or every file directly inside a directory.
    /// Returns the number of files some parser accepted.
    pub fn load(&mut self, parsers: &[Box<dyn LogParser>], source: &Path) -> usize {
        collect_files(source)
            .iter()
            .filter(|path| self.load_file(parsers, path))
            .count()
    }

    /// Like [`SeriesSet::load`], parsing files on the rayon pool.
    ///
    /// Every file gets its own parser state; merges go through a single lock.
    pub fn load_parallel(&mut self, parsers: &[Box<dyn LogParser>], source: &Path) -> usize {
        let files = collect_files(source);
        let consolidate = self.consolidate;

        let loaded = {
            let metrics = &self.metrics;
            let shared = Mutex::new((&mut self.series, &mut self.sources));

            files
                .par_iter()
                .filter(|path| match parse_with(parsers, path, metrics) {
                    Some(parsed) => {
                        let mut guard = shared.lock();
                        let (index, sources) = &mut *guard;
                        for s in parsed {
                            merge_into(index, s, consolidate, metrics);
                        }
                        sources.push(path.to_path_buf());
                        true
                    }
                    None => false,
                })
                .count()
        };

        self.sources.sort();
        loaded
    }

    /// Try each parser in order until one accepts `path`.
    pub fn load_file(&mut self, parsers: &[Box<dyn LogParser>], path: &Path) -> bool {
        if path.is_dir() {
            info!("Target path is directory: {}", path.display());
            return false;
        }

        match parse_with(parsers, path, &self.metrics) {
            Some(parsed) => {
                for s in parsed {
                    merge_into(&mut self.series, s, self.consolidate, &self.metrics);
                }
                self.sources.push(path.to_path_buf());
                true
            }
            None => false,
        }
    }

    /// Add a series, appending to any existing series with the same dimension.
    pub fn merge(&mut self, series: Series) {
        merge_into(&mut self.series, series, self.consolidate, &self.metrics);
    }

    pub fn get(&self, dimension: &[&str]) -> Option<&Series> {
        let key: Vec<String> = dimension.iter().map(|d| d.to_string()).collect();
        self.series.get(&key)
    }

    pub fn filter<'a, F>(&'a self, pred: F) -> impl Iterator<Item = &'a Series> + 'a
    where
        F: Fn(&Series) -> bool + 'a,
    {
        self.series.values().filter(move |s| pred(s))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Series> {
        self.series.values()
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    pub fn metrics(&self) -> &LoadMetrics {
        &self.metrics
    }

    pub fn into_series(self) -> Vec<Series> {
        self.series.into_values().collect()
    }

    /// Regroup samples into one set per projected key (e.g. [`week_start`]).
    ///
    /// Subordinates are split with the same projection and follow the part
    /// of their primary series that shares the key.
    pub fn split_by<K, F>(&self, key_fn: F) -> BTreeMap<K, SeriesSet>
    where
        K: Ord,
        F: Fn(NaiveDateTime) -> K,
    {
        let mut groups: BTreeMap<K, SeriesSet> = BTreeMap::new();

        for series in self.series.values() {
            let mut parts = series.split_by(|sample| key_fn(sample.key));
            for subordinate in &series.subordinates {
                for (key, sub_part) in subordinate.split_by(|sample| key_fn(sample.key)) {
                    if let Some(part) = parts.get_mut(&key) {
                        part.subordinates.push(sub_part);
                    }
                }
            }

            for (key, part) in parts {
                groups
                    .entry(key)
                    .or_insert_with(|| SeriesSet {
                        consolidate: self.consolidate,
                        sources: self.sources.clone(),
                        ..SeriesSet::default()
                    })
                    .merge(part);
            }
        }

        groups
    }
}

impl<'a> IntoIterator for &'a SeriesSet {
    type Item = &'a Series;
    type IntoIter = std::collections::btree_map::Values<'a, Vec<String>, Series>;

    fn into_iter(self) -> Self::IntoIter {
        self.series.values()
    }
}

/// Monday of the ISO week containing `key`.
pub fn week_start(key: NaiveDateTime) -> NaiveDate {
    let date = key.date();
    date - chrono::Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

fn merge_into(index: &mut SeriesIndex, mut series: Series, consolidate: bool, metrics: &LoadMetrics) {
    metrics.record_merge(series.len());

    match index.get_mut(&series.dimension) {
        Some(existing) => {
            if existing.unit != series.unit {
                warn!(
                    dimension = %series.dimension.join("/"),
                    existing = %existing.unit,
                    incoming = %series.unit,
                    "unit mismatch on merge, incoming series dropped"
                );
                return;
            }
            existing.samples.append(&mut series.samples);
            existing.subordinates.append(&mut series.subordinates);
            existing.sort();
            if consolidate {
                existing.consolidate();
            }
        }
        None => {
            series.sort();
            if consolidate {
                series.consolidate();
            }
            index.insert(series.dimension.clone(), series);
        }
    }
}

fn parse_with(parsers: &[Box<dyn LogParser>], path: &Path, metrics: &LoadMetrics) -> Option<Vec<Series>> {
    for parser in parsers {
        match parser.parse_file(path) {
            Ok(series) => {
                debug!(
                    file = %path.display(),
                    parser = parser.name(),
                    series = series.len(),
                    "parsed file"
                );
                metrics.record_parsed();
                return Some(series);
            }
            Err(ParseError::Unsupported(_)) => continue,
            Err(e) => {
                error!(file = %path.display(), parser = parser.name(), "failed to parse file: {}", e);
                metrics.record_failed();
                return None;
            }
        }
    }

    info!("Unrecognized file: {}", path.display());
    metrics.record_unrecognized();
    None
}

fn collect_files(source: &Path) -> Vec<PathBuf> {
    if source.is_dir() {
        match std::fs::read_dir(source) {
            Ok(entries) => {
                let mut files: Vec<PathBuf> = entries
                    .filter_map(Result::ok)
                    .map(|entry| entry.path())
                    .collect();
                files.sort();
                files
            }
            Err(e) => {
                error!("Cannot read directory {}: {}", source.display(), e);
                Vec::new()
            }
        }
    } else if source.is_file() {
        vec![source.to_path_buf()]
    } else {
        warn!("Source path does not exist: {}", source.display());
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::formats::{ErfTestLogParser, PingTestLogParser};
    use chrono::NaiveDate;
    use std::io::Write;

    fn at(d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2016, 6, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn series(dim: &[&str], points: &[(NaiveDateTime, f64)]) -> Series {
        let mut s = Series::new(dim.iter().copied(), "count");
        for (k, v) in points {
            s.push(*k, *v);
        }
        s
    }

    /// Accepts files whose name starts with `prefix`, emitting one sample per line.
    struct PrefixParser {
        prefix: &'static str,
    }

    impl LogParser for PrefixParser {
        fn name(&self) -> &'static str {
            "prefix"
        }

        fn parse_file(&self, path: &Path) -> Result<Vec<Series>, ParseError> {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if !name.starts_with(self.prefix) {
                return Err(ParseError::Unsupported(name.to_string()));
            }
            let content = std::fs::read_to_string(path)?;
            let mut s = Series::new([self.prefix, "lines"], "count");
            for _ in content.lines() {
                s.push(at(15, 10), 1.0);
            }
            Ok(vec![s])
        }
    }

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    // ── Merge ───────────────────────────────────────────────────

    #[test]
    fn test_merge_accumulates_and_sorts() {
        let mut set = SeriesSet::new();
        set.merge(series(&["a"], &[(at(15, 12), 1.0)]));
        set.merge(series(&["a"], &[(at(15, 10), 2.0)]));
        set.merge(series(&["b"], &[(at(15, 11), 3.0)]));

        assert_eq!(set.len(), 2);
        let a = set.get(&["a"]).unwrap();
        let keys: Vec<_> = a.keys().collect();
        assert_eq!(keys, vec![at(15, 10), at(15, 12)]);
    }

    #[test]
    fn test_merge_with_consolidation() {
        let mut set = SeriesSet::with_consolidation();
        set.merge(series(&["a"], &[(at(15, 10), 1.0)]));
        set.merge(series(&["a"], &[(at(15, 10), 2.0)]));

        let a = set.get(&["a"]).unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(a.samples[0].value, 3.0);
    }

    #[test]
    fn test_merge_keeps_subordinates() {
        let mut set = SeriesSet::new();
        let mut primary = series(&["a"], &[(at(15, 10), 1.0)]);
        primary.subordinates.push(series(&["a", "error"], &[(at(15, 10), 1.0)]));
        set.merge(primary);
        let mut again = series(&["a"], &[(at(15, 11), 1.0)]);
        again.subordinates.push(series(&["a", "error"], &[(at(15, 11), 1.0)]));
        set.merge(again);

        assert_eq!(set.get(&["a"]).unwrap().subordinates.len(), 2);
    }

    #[test]
    fn test_filter() {
        let mut set = SeriesSet::new();
        set.merge(series(&["h", "pingtest", "rtt"], &[]));
        set.merge(series(&["h", "pingtest", "loss"], &[]));
        set.merge(series(&["h", "erftest", "bandwidth"], &[]));

        let ping: Vec<_> = set.filter(|s| s.has_labels(&["pingtest"])).collect();
        assert_eq!(ping.len(), 2);
    }

    // ── Split ───────────────────────────────────────────────────

    #[test]
    fn test_week_start() {
        // 2016-06-15 is a Wednesday
        assert_eq!(week_start(at(15, 10)), NaiveDate::from_ymd_opt(2016, 6, 13).unwrap());
        assert_eq!(week_start(at(13, 0)), NaiveDate::from_ymd_opt(2016, 6, 13).unwrap());
        assert_eq!(week_start(at(19, 23)), NaiveDate::from_ymd_opt(2016, 6, 13).unwrap());
        assert_eq!(week_start(at(20, 0)), NaiveDate::from_ymd_opt(2016, 6, 20).unwrap());
    }

    #[test]
    fn test_split_by_week() {
        let mut set = SeriesSet::new();
        let mut primary = series(&["a"], &[(at(15, 10), 1.0), (at(21, 10), 2.0)]);
        primary.subordinates.push(series(&["a", "loss"], &[(at(22, 1), 9.0)]));
        set.merge(primary);
        set.merge(series(&["b"], &[(at(16, 10), 3.0)]));

        let weeks = set.split_by(week_start);
        assert_eq!(weeks.len(), 2);

        let first = &weeks[&NaiveDate::from_ymd_opt(2016, 6, 13).unwrap()];
        assert_eq!(first.len(), 2);
        assert!(first.get(&["a"]).unwrap().subordinates.is_empty());

        let second = &weeks[&NaiveDate::from_ymd_opt(2016, 6, 20).unwrap()];
        let a = second.get(&["a"]).unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(a.subordinates.len(), 1);
        assert!(second.get(&["b"]).is_none());
    }

    // ── Loading ─────────────────────────────────────────────────

    #[test]
    fn test_load_directory_probes_parsers_in_order() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "alpha_1.log", "x\ny\n");
        write(dir.path(), "beta_1.log", "x\n");
        write(dir.path(), "gamma_1.log", "x\n");

        let parsers: Vec<Box<dyn LogParser>> = vec![
            Box::new(PrefixParser { prefix: "alpha" }),
            Box::new(PrefixParser { prefix: "beta" }),
        ];

        let mut set = SeriesSet::new();
        let loaded = set.load(&parsers, dir.path());

        assert_eq!(loaded, 2);
        assert_eq!(set.sources().len(), 2);
        assert_eq!(set.get(&["alpha", "lines"]).unwrap().len(), 2);
        assert_eq!(set.get(&["beta", "lines"]).unwrap().len(), 1);

        let snap = set.metrics().snapshot();
        assert_eq!(snap.files_parsed, 2);
        assert_eq!(snap.files_unrecognized, 1);
    }

    #[test]
    fn test_load_parallel_matches_sequential() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..8 {
            write(dir.path(), &format!("alpha_{i}.log"), "x\ny\nz\n");
        }
        write(dir.path(), "other.txt", "x\n");

        let parsers: Vec<Box<dyn LogParser>> = vec![Box::new(PrefixParser { prefix: "alpha" })];

        let mut sequential = SeriesSet::with_consolidation();
        sequential.load(&parsers, dir.path());
        let mut parallel = SeriesSet::with_consolidation();
        parallel.load_parallel(&parsers, dir.path());

        assert_eq!(parallel.sources(), sequential.sources());
        let seq = sequential.get(&["alpha", "lines"]).unwrap();
        let par = parallel.get(&["alpha", "lines"]).unwrap();
        assert_eq!(par.samples, seq.samples);
        assert_eq!(par.samples[0].value, 24.0);
    }

    #[test]
    fn test_load_missing_path_is_not_fatal() {
        let parsers: Vec<Box<dyn LogParser>> = vec![Box::new(PrefixParser { prefix: "alpha" })];
        let mut set = SeriesSet::new();
        assert_eq!(set.load(&parsers, Path::new("/nonexistent/lograph/dir")), 0);
        assert!(set.is_empty());
    }

    #[test]
    fn test_load_real_parsers_on_mixed_directory() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "erftest_host1.log",
            "[1466000000] Wed Jun 15 14:13:20 UTC 2016\n\
             [  3]  0.0-10.0 sec  11.2 MBytes  9.40 Mbits/sec\n\
             [1466000060] Wed Jun 15 14:14:20 UTC 2016\n",
        );
        write(
            dir.path(),
            "pingtest_host1.log",
            "[1466000000] Wed Jun 15 14:13:20 UTC 2016\n\
             10 packets transmitted, 10 received, 0% packet loss, time 9012ms\n\
             rtt min/avg/max/mdev = 10.100/20.200/30.300/2.500 ms\n",
        );
        write(dir.path(), "notes.txt", "nothing to see\n");

        let parsers: Vec<Box<dyn LogParser>> = vec![
            Box::new(ErfTestLogParser::default()),
            Box::new(PingTestLogParser::default()),
        ];
        let mut set = SeriesSet::new();
        assert_eq!(set.load(&parsers, dir.path()), 2);

        assert_eq!(set.get(&["erftest", "host1", "bandwidth"]).unwrap().len(), 1);
        assert_eq!(set.get(&["pingtest", "host1", "rtt"]).unwrap().len(), 1);
        assert_eq!(set.metrics().snapshot().files_unrecognized, 1);
    }
}
