//! Per-interval counts of TCP FIN/RST events, by service port or by the
//! region of the remote host.

use std::path::Path;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use tracing::{debug, trace};

use super::tcpdump::{Direction, ServerRole, TcpGrammar};
use crate::parser::cache::SlidingCache;
use crate::parser::clock::{resolve_start_date, DayClock};
use crate::parser::driver::parse_lines;
use crate::parser::model::{dimension_from_path, file_name};
use crate::parser::region::{region_label, RegionResolver};
use crate::parser::traits::{LineParser, LogParser, ParseError};
use crate::series::{Series, SeriesMap, SeriesTemplate};

pub const DEFAULT_INTERVAL_SECS: u32 = 60;
pub const DEFAULT_DEDUP_CAPACITY: usize = 4096;

/// Identity of an already counted transmission.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum SeenKey {
    Packet {
        src: String,
        sport: String,
        dst: String,
        dport: String,
        seq: Option<u32>,
    },
    Remote {
        host: String,
        port: String,
    },
}

/// How events are labelled.
#[derive(Clone)]
pub enum Grouping {
    /// `c2s:<port>:FIN`, `s2c:<port>:RST`, ...
    Port,
    /// `<server port>:<region>`, server-sent events only
    Region(Arc<dyn RegionResolver>),
}

/// Line state for one capture file.
pub struct EventCounter {
    grammar: TcpGrammar,
    role: Arc<dyn ServerRole>,
    grouping: Grouping,
    interval: u32,
    clock: DayClock,
    seen: SlidingCache<SeenKey>,
    counts: SeriesMap,
    top_n: Option<usize>,
}

impl EventCounter {
    pub fn new(
        grammar: TcpGrammar,
        role: Arc<dyn ServerRole>,
        grouping: Grouping,
        base: Vec<String>,
        start: NaiveDate,
    ) -> Self {
        Self {
            grammar,
            role,
            grouping,
            interval: DEFAULT_INTERVAL_SECS,
            clock: DayClock::new(start),
            seen: SlidingCache::new(DEFAULT_DEDUP_CAPACITY),
            counts: SeriesMap::new(base, SeriesTemplate::new("count")),
            top_n: None,
        }
    }

    pub fn with_interval(mut self, secs: u32) -> Self {
        self.interval = secs.max(1);
        self
    }

    pub fn with_dedup_capacity(mut self, capacity: usize) -> Self {
        self.seen = SlidingCache::new(capacity);
        self
    }

    pub fn with_top_n(mut self, top_n: Option<usize>) -> Self {
        self.top_n = top_n;
        self
    }

    /// Start of the interval containing `time` on `day`.
    fn bucket(&self, day: NaiveDate, time: NaiveTime) -> NaiveDateTime {
        let secs = time.num_seconds_from_midnight();
        let start = secs - secs % self.interval;
        let bucket = NaiveTime::from_num_seconds_from_midnight_opt(start, 0).unwrap_or(time);
        day.and_time(bucket)
    }

    fn count(&mut self, label: &str, at: NaiveDateTime) {
        self.counts.entry(label).push(at, 1.0);
    }
}

impl LineParser for EventCounter {
    fn feed(&mut self, raw: &str) -> Result<(), ParseError> {
        let line = self.grammar.parse(raw)?;
        let Some(direction) = Direction::classify(self.role.as_ref(), &line) else {
            return Ok(());
        };

        let stamped = self.clock.stamp(line.time);
        let flag = line.flag();
        if !flag.is_disconnect() {
            return Ok(());
        }

        let (server_port, key, label) = match (&self.grouping, direction) {
            (Grouping::Port, _) => {
                let server_port = match direction {
                    Direction::ServerToClient => line.src_port,
                    Direction::ClientToServer => line.dst_port,
                };
                let key = SeenKey::Packet {
                    src: line.src_host.to_string(),
                    sport: line.src_port.to_string(),
                    dst: line.dst_host.to_string(),
                    dport: line.dst_port.to_string(),
                    seq: line.seq,
                };
                let label = format!("{}:{}:{}", direction.label(), server_port, flag.label());
                (server_port, key, label)
            }
            (Grouping::Region(resolver), Direction::ServerToClient) => {
                let key = SeenKey::Remote {
                    host: line.dst_host.to_string(),
                    port: line.dst_port.to_string(),
                };
                let label = format!("{}:{}", line.src_port, region_label(resolver.as_ref(), line.dst_host));
                (line.src_port, key, label)
            }
            (Grouping::Region(_), Direction::ClientToServer) => return Ok(()),
        };

        if self.seen.hit(key) {
            trace!(port = server_port, seq = ?line.seq, "retransmitted {}", flag.label());
            return Ok(());
        }

        let at = self.bucket(stamped.date(), line.time);
        self.count(&label, at);
        Ok(())
    }

    fn finish(&mut self) -> Result<(), ParseError> {
        for (_, series) in self.counts.iter_mut() {
            series.sort().consolidate();
        }
        if let Some(n) = self.top_n {
            self.counts.retain_top(n);
        }
        Ok(())
    }

    fn into_series(self) -> Vec<Series> {
        self.counts.into_series()
    }
}

/// FIN/RST event counter for `tcpdump*` / `*.dump` captures.
pub struct TcpEventLogParser {
    role: Arc<dyn ServerRole>,
    grouping: Grouping,
    interval_secs: u32,
    dedup_capacity: usize,
    top_n: Option<usize>,
    start_date: Option<NaiveDate>,
}

impl TcpEventLogParser {
    /// Counts labelled by direction, server port and flag.
    pub fn ports(role: impl ServerRole + 'static) -> Self {
        Self::with_grouping(Arc::new(role), Grouping::Port)
    }

    /// Counts of server-sent events labelled by server port and remote region.
    pub fn regional(role: impl ServerRole + 'static, resolver: Arc<dyn RegionResolver>) -> Self {
        Self::with_grouping(Arc::new(role), Grouping::Region(resolver))
    }

    fn with_grouping(role: Arc<dyn ServerRole>, grouping: Grouping) -> Self {
        Self {
            role,
            grouping,
            interval_secs: DEFAULT_INTERVAL_SECS,
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            top_n: None,
            start_date: None,
        }
    }

    pub fn with_interval(mut self, secs: u32) -> Self {
        self.interval_secs = secs;
        self
    }

    pub fn with_dedup_capacity(mut self, capacity: usize) -> Self {
        self.dedup_capacity = capacity;
        self
    }

    pub fn with_top_n(mut self, top_n: Option<usize>) -> Self {
        self.top_n = top_n;
        self
    }

    pub fn with_start_date(mut self, date: Option<NaiveDate>) -> Self {
        self.start_date = date;
        self
    }
}

impl LogParser for TcpEventLogParser {
    fn name(&self) -> &'static str {
        match self.grouping {
            Grouping::Port => "tcp-events",
            Grouping::Region(_) => "tcp-regions",
        }
    }

    fn parse_file(&self, path: &Path) -> Result<Vec<Series>, ParseError> {
        let name = file_name(path)?;
        if !(name.starts_with("tcpdump") || name.ends_with(".dump")) {
            return Err(ParseError::Unsupported(name.to_string()));
        }

        let start = resolve_start_date(self.start_date, name);
        debug!(file = %path.display(), parser = self.name(), start = %start, "counting tcp events");

        let counter = EventCounter::new(
            TcpGrammar::new()?,
            self.role.clone(),
            self.grouping.clone(),
            dimension_from_path(path),
            start,
        )
        .with_interval(self.interval_secs)
        .with_dedup_capacity(self.dedup_capacity)
        .with_top_n(self.top_n);

        parse_lines(path, counter)
    }
}
