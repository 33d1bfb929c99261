//! Run — build parsers per analysis kind, load every source and report it.

use std::io::{self, Write};
use std::sync::Arc;

use tracing::{info, warn};

use crate::conf::{AnalysisKind, LographConfig, SourceConfig};
use crate::parser::formats::{
    DownloadTestLogParser, ErfTestLogParser, HostPrefixes, HttpAccessLogParser, PingTestLogParser,
    TcpConnectionLogParser, TcpEventLogParser,
};
use crate::parser::{LogParser, PrefixRegionTable};
use crate::runtime::report;
use crate::series::{week_start, SeriesSet};

/// Totals over one run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub sources: usize,
    pub files_loaded: usize,
    pub lines_written: usize,
}

/// Candidate parsers for a source, probed in order.
pub fn build_parsers(kind: AnalysisKind, config: &LographConfig) -> Vec<Box<dyn LogParser>> {
    let tcpdump = &config.tcpdump;
    let role = || HostPrefixes(tcpdump.server_prefixes.clone());

    match kind {
        AnalysisKind::Network => vec![
            Box::new(DownloadTestLogParser),
            Box::new(PingTestLogParser {
                loss_threshold: config.pingtest.loss_threshold_percent,
            }),
            Box::new(ErfTestLogParser::new(config.erftest.strict, config.erftest.placement)),
        ],
        AnalysisKind::TcpEvents => vec![Box::new(
            TcpEventLogParser::ports(role())
                .with_interval(tcpdump.interval_secs)
                .with_dedup_capacity(tcpdump.dedup_capacity)
                .with_top_n(tcpdump.top_n)
                .with_start_date(tcpdump.start_date),
        )],
        AnalysisKind::TcpRegions => {
            let regions = Arc::new(PrefixRegionTable::new(config.regions.clone()));
            if regions.is_empty() {
                warn!("No region table configured, every remote host resolves to unknown");
            }
            vec![Box::new(
                TcpEventLogParser::regional(role(), regions)
                    .with_interval(tcpdump.interval_secs)
                    .with_dedup_capacity(tcpdump.dedup_capacity)
                    .with_top_n(tcpdump.top_n)
                    .with_start_date(tcpdump.start_date),
            )]
        }
        AnalysisKind::TcpConnections => vec![Box::new(
            TcpConnectionLogParser::new(role())
                .with_start_date(tcpdump.start_date)
                .with_service_names(tcpdump.service_names.clone()),
        )],
        AnalysisKind::Http => vec![Box::new(HttpAccessLogParser)],
    }
}

/// Load one source into a fresh set.
pub fn load_source(source: &SourceConfig, config: &LographConfig) -> (SeriesSet, usize) {
    let parsers = build_parsers(source.kind, config);
    let mut set = if config.consolidate {
        SeriesSet::with_consolidation()
    } else {
        SeriesSet::new()
    };

    let loaded = if config.parallel {
        set.load_parallel(&parsers, &source.path)
    } else {
        set.load(&parsers, &source.path)
    };

    info!(
        source = %source.path.display(),
        kind = %source.kind,
        files = loaded,
        series = set.len(),
        "source loaded"
    );
    (set, loaded)
}

/// Load every configured source and write its report to `out`.
pub fn run<W: Write>(config: &LographConfig, out: &mut W) -> io::Result<RunSummary> {
    let mut summary = RunSummary::default();

    for source in &config.sources {
        let (set, loaded) = load_source(source, config);
        let path = source.path.display().to_string();
        let kind = source.kind.as_str();

        if config.split_by_week {
            for (week, part) in set.split_by(week_start) {
                summary.lines_written += report::write_set(out, &path, kind, Some(week), &part)?;
            }
        } else {
            summary.lines_written += report::write_set(out, &path, kind, None, &set)?;
        }
        report::write_metrics(out, &path, kind, loaded, set.metrics().snapshot())?;

        summary.sources += 1;
        summary.files_loaded += loaded;
    }

    out.flush()?;
    Ok(summary)
}
