//! TCP connection lifecycle tracking from tcpdump captures.
//!
//! Each client/server pair moves through `SYN → SYN_ACK → ESTABLISHED →
//! {FIN | RST}`. Completed or abandoned connections are handed to a
//! [`ConnectionSink`] exactly once.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use tracing::{debug, info, trace};

use super::tcpdump::{Direction, ServerRole, TcpFlag, TcpGrammar};
use crate::parser::clock::{resolve_start_date, DayClock};
use crate::parser::driver::parse_lines;
use crate::parser::model::{dimension_from_path, file_name};
use crate::parser::traits::{LineParser, LogParser, ParseError};
use crate::series::{Series, SeriesMap, SeriesTemplate};

/// Client and server endpoints of one connection.
///
/// A pair equals its reverse. The hash only covers the two hosts (sorted),
/// so pairs between the same hosts on different ports share a hash bucket
/// but never compare equal.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionPair {
    pub client_host: String,
    pub client_port: String,
    pub server_host: String,
    pub server_port: String,
}

impl ConnectionPair {
    pub fn new(
        client_host: impl Into<String>,
        client_port: impl Into<String>,
        server_host: impl Into<String>,
        server_port: impl Into<String>,
    ) -> Self {
        Self {
            client_host: client_host.into(),
            client_port: client_port.into(),
            server_host: server_host.into(),
            server_port: server_port.into(),
        }
    }

    pub fn reversed(&self) -> Self {
        Self::new(&self.server_host, &self.server_port, &self.client_host, &self.client_port)
    }
}

impl PartialEq for ConnectionPair {
    fn eq(&self, other: &Self) -> bool {
        let same = self.client_host == other.client_host
            && self.client_port == other.client_port
            && self.server_host == other.server_host
            && self.server_port == other.server_port;
        let swapped = self.client_host == other.server_host
            && self.client_port == other.server_port
            && self.server_host == other.client_host
            && self.server_port == other.client_port;
        same || swapped
    }
}

impl Eq for ConnectionPair {}

impl Hash for ConnectionPair {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let (low, high) = if self.client_host <= self.server_host {
            (&self.client_host, &self.server_host)
        } else {
            (&self.server_host, &self.client_host)
        };
        low.hash(state);
        high.hash(state);
    }
}

impl fmt::Display for ConnectionPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}-{}:{}",
            self.client_host, self.client_port, self.server_host, self.server_port
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionEvent {
    Syn,
    SynAck,
    Established,
    Fin,
    Rst,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DisconnectReason {
    Undefined,
    FinByClient,
    FinByServer,
    ResetByClient,
    ResetByServer,
}

impl DisconnectReason {
    pub fn label(self) -> &'static str {
        match self {
            DisconnectReason::Undefined => "undefined",
            DisconnectReason::FinByClient => "finByClient",
            DisconnectReason::FinByServer => "finByServer",
            DisconnectReason::ResetByClient => "resetByClient",
            DisconnectReason::ResetByServer => "resetByServer",
        }
    }
}

/// Lifecycle record of one tracked connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionEntry {
    pub pair: ConnectionPair,
    pub sequence_number: u32,
    pub last_event: ConnectionEvent,
    pub handshake_time: NaiveDateTime,
    pub connected_time: Option<NaiveDateTime>,
    pub disconnected_time: Option<NaiveDateTime>,
    pub disconnected_reason: Option<DisconnectReason>,
}

impl ConnectionEntry {
    fn new(pair: ConnectionPair, sequence_number: u32, handshake_time: NaiveDateTime) -> Self {
        Self {
            pair,
            sequence_number,
            last_event: ConnectionEvent::Syn,
            handshake_time,
            connected_time: None,
            disconnected_time: None,
            disconnected_reason: None,
        }
    }

    /// Milliseconds from SYN to connection, when connected.
    pub fn handshake_ms(&self) -> Option<f64> {
        let connected = self.connected_time?;
        let elapsed = connected - self.handshake_time;
        Some(elapsed.num_microseconds()? as f64 / 1000.0)
    }
}

/// Receives finished connection records.
#[cfg_attr(test, mockall::automock)]
pub trait ConnectionSink {
    /// Called once per completed or abandoned connection.
    fn put(&mut self, entry: ConnectionEntry);

    /// Called once at end of stream.
    fn flush(&mut self);
}

/// Sink keeping every entry in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub entries: Vec<ConnectionEntry>,
    pub flushed: bool,
}

impl ConnectionSink for CollectingSink {
    fn put(&mut self, entry: ConnectionEntry) {
        self.entries.push(entry);
    }

    fn flush(&mut self) {
        self.flushed = true;
    }
}

/// Per-pair TCP state machine over tcpdump header lines.
pub struct ConnectionTracker<S: ConnectionSink> {
    grammar: TcpGrammar,
    role: Arc<dyn ServerRole>,
    clock: DayClock,
    live: HashMap<ConnectionPair, ConnectionEntry>,
    sink: S,
}

impl<S: ConnectionSink> ConnectionTracker<S> {
    pub fn new(grammar: TcpGrammar, role: Arc<dyn ServerRole>, start: NaiveDate, sink: S) -> Self {
        Self {
            grammar,
            role,
            clock: DayClock::new(start),
            live: HashMap::new(),
            sink,
        }
    }

    /// Number of connections still being tracked.
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    pub fn feed(&mut self, raw: &str) -> Result<(), ParseError> {
        let line = self.grammar.parse(raw)?;

        let pair = match Direction::classify(self.role.as_ref(), &line) {
            Some(Direction::ServerToClient) => {
                ConnectionPair::new(line.dst_host, line.dst_port, line.src_host, line.src_port)
            }
            Some(Direction::ClientToServer) => {
                ConnectionPair::new(line.src_host, line.src_port, line.dst_host, line.dst_port)
            }
            None => return Ok(()),
        };

        let time = self.clock.stamp(line.time);
        match line.flag() {
            TcpFlag::SynAck => self.on_syn_ack(time, pair, line.ack),
            TcpFlag::Syn => {
                let seq = line
                    .seq
                    .ok_or_else(|| ParseError::InvalidFormat("SYN without sequence number".into()))?;
                self.on_syn(time, pair, seq);
            }
            flag @ (TcpFlag::Rst | TcpFlag::Fin) => self.on_disconnect(time, pair, line.src_host, flag),
            TcpFlag::FirstAck => self.on_first_ack(time, pair),
            TcpFlag::Other => {}
        }
        Ok(())
    }

    fn on_syn(&mut self, time: NaiveDateTime, pair: ConnectionPair, seq: u32) {
        if let Some(current) = self.live.get(&pair) {
            if current.sequence_number == seq {
                trace!(%pair, seq, "retransmitted SYN");
                return;
            }
        }

        // A new handshake on a live pair means the previous connection
        // timed out without RST/FIN
        if let Some(mut abandoned) = self.live.remove(&pair) {
            debug!(%pair, old_seq = abandoned.sequence_number, new_seq = seq, "SYN supersedes live connection");
            abandoned.disconnected_reason = Some(DisconnectReason::Undefined);
            self.sink.put(abandoned);
        }

        self.live.insert(pair.clone(), ConnectionEntry::new(pair, seq, time));
    }

    fn on_syn_ack(&mut self, time: NaiveDateTime, pair: ConnectionPair, ack: Option<u32>) {
        let Some(entry) = self.live.get_mut(&pair) else {
            info!(%pair, time = %time, "Unmatched SYN-ACK for connection pair");
            return;
        };

        if ack != Some(entry.sequence_number.wrapping_add(1)) {
            info!(
                %pair,
                seq = entry.sequence_number,
                ack = ?ack,
                "Unmatched seq number, SYN-ACK may be delayed"
            );
            return;
        }

        entry.connected_time = Some(time);
        entry.last_event = ConnectionEvent::SynAck;
    }

    fn on_first_ack(&mut self, time: NaiveDateTime, pair: ConnectionPair) {
        match self.live.get_mut(&pair) {
            Some(entry) if entry.last_event == ConnectionEvent::SynAck => {
                entry.connected_time = Some(time);
                entry.last_event = ConnectionEvent::Established;
            }
            _ => trace!(%pair, "ACK without pending handshake"),
        }
    }

    fn on_disconnect(&mut self, time: NaiveDateTime, pair: ConnectionPair, src_host: &str, flag: TcpFlag) {
        let Some(mut entry) = self.live.remove(&pair) else {
            trace!(%pair, flag = flag.label(), "disconnect for untracked pair");
            return;
        };

        let by_client = src_host == entry.pair.client_host;
        let (event, reason) = match (flag, by_client) {
            (TcpFlag::Rst, true) => (ConnectionEvent::Rst, DisconnectReason::ResetByClient),
            (TcpFlag::Rst, false) => (ConnectionEvent::Rst, DisconnectReason::ResetByServer),
            (_, true) => (ConnectionEvent::Fin, DisconnectReason::FinByClient),
            (_, false) => (ConnectionEvent::Fin, DisconnectReason::FinByServer),
        };

        entry.disconnected_time = Some(time);
        entry.last_event = event;
        entry.disconnected_reason = Some(reason);
        self.sink.put(entry);
    }

    /// Emit every live connection (ordered by handshake time) then flush the sink.
    pub fn flush(&mut self) {
        let mut remaining: Vec<ConnectionEntry> = self.live.drain().map(|(_, entry)| entry).collect();
        remaining.sort_by_key(|entry| entry.handshake_time);

        debug!(count = remaining.len(), "flushing live connections");
        for mut entry in remaining {
            entry.disconnected_reason = Some(DisconnectReason::Undefined);
            self.sink.put(entry);
        }
        self.sink.flush();
    }
}

/// Converts tracked connections into handshake latency and disconnect count series.
struct ConnectionSeriesBuilder {
    tracker: ConnectionTracker<CollectingSink>,
    handshake: SeriesMap,
    disconnect: SeriesMap,
    service_names: Arc<HashMap<String, String>>,
}

impl LineParser for ConnectionSeriesBuilder {
    fn feed(&mut self, line: &str) -> Result<(), ParseError> {
        self.tracker.feed(line)
    }

    fn finish(&mut self) -> Result<(), ParseError> {
        self.tracker.flush();
        Ok(())
    }

    fn into_series(self) -> Vec<Series> {
        let Self {
            tracker,
            mut handshake,
            mut disconnect,
            service_names,
        } = self;

        for entry in tracker.into_sink().entries {
            if let Some(ms) = entry.handshake_ms() {
                let port = entry.pair.server_port.as_str();
                let service = service_names.get(port).map_or(port, String::as_str);
                handshake.entry(service).push(entry.handshake_time, ms);
            }
            let reason = entry.disconnected_reason.unwrap_or(DisconnectReason::Undefined);
            let at = entry.disconnected_time.unwrap_or(entry.handshake_time);
            disconnect.entry(reason.label()).push(at, 1.0);
        }

        let mut out = handshake.into_series();
        out.extend(disconnect.into_series().into_iter().map(|mut s| {
            s.sort().consolidate();
            s
        }));
        out
    }
}

/// Connection lifecycle parser for `*.dump` / `tcpconn*` captures.
pub struct TcpConnectionLogParser {
    role: Arc<dyn ServerRole>,
    start_date: Option<NaiveDate>,
    service_names: Arc<HashMap<String, String>>,
}

impl TcpConnectionLogParser {
    pub fn new(role: impl ServerRole + 'static) -> Self {
        Self {
            role: Arc::new(role),
            start_date: None,
            service_names: Arc::new(HashMap::new()),
        }
    }

    pub fn with_start_date(mut self, date: Option<NaiveDate>) -> Self {
        self.start_date = date;
        self
    }

    /// Port → service name used in handshake series labels.
    pub fn with_service_names(mut self, names: HashMap<String, String>) -> Self {
        self.service_names = Arc::new(names);
        self
    }
}

impl LogParser for TcpConnectionLogParser {
    fn name(&self) -> &'static str {
        "tcp-connection"
    }

    fn parse_file(&self, path: &Path) -> Result<Vec<Series>, ParseError> {
        let name = file_name(path)?;
        if !(name.starts_with("tcpconn") || name.ends_with(".dump")) {
            return Err(ParseError::Unsupported(name.to_string()));
        }

        let start = resolve_start_date(self.start_date, name);
        debug!(file = %path.display(), start = %start, "tracking tcp connections");

        let base = dimension_from_path(path);
        let handshake_base = base.iter().cloned().chain(["handshake".to_string()]);
        let disconnect_base = base.iter().cloned().chain(["disconnect".to_string()]);

        let builder = ConnectionSeriesBuilder {
            tracker: ConnectionTracker::new(TcpGrammar::new()?, self.role.clone(), start, CollectingSink::default()),
            handshake: SeriesMap::new(handshake_base, SeriesTemplate::new("ms")),
            disconnect: SeriesMap::new(disconnect_base, SeriesTemplate::discrete("count")),
            service_names: self.service_names.clone(),
        };
        parse_lines(path, builder)
    }
}
