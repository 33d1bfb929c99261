//! tcpdump header grammar shared by the TCP parsers.
//!
//! `14:13:20.123456 IP 10.0.98.1.6124 > 192.0.2.7.51234: Flags [F.], seq 10:20, ack 5, win 229, length 0`

use chrono::NaiveTime;
use regex::{Captures, Regex};

use crate::parser::clock::parse_time_of_day;
use crate::parser::traits::ParseError;

/// TCP flag class of a captured packet, by precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TcpFlag {
    SynAck,
    Syn,
    Rst,
    Fin,
    /// Pure ACK acknowledging the handshake (`ack 1`)
    FirstAck,
    Other,
}

impl TcpFlag {
    pub fn is_disconnect(self) -> bool {
        matches!(self, TcpFlag::Fin | TcpFlag::Rst)
    }

    pub fn label(self) -> &'static str {
        match self {
            TcpFlag::SynAck => "SYN-ACK",
            TcpFlag::Syn => "SYN",
            TcpFlag::Rst => "RST",
            TcpFlag::Fin => "FIN",
            TcpFlag::FirstAck => "ACK",
            TcpFlag::Other => "OTHER",
        }
    }
}

/// One parsed header line. Host and port fields borrow from the input.
#[derive(Debug, Clone, PartialEq)]
pub struct TcpLine<'a> {
    pub time: NaiveTime,
    pub src_host: &'a str,
    pub src_port: &'a str,
    pub dst_host: &'a str,
    pub dst_port: &'a str,
    pub flags: &'a str,
    /// 32-bit TCP sequence space; wider values are dropped
    pub seq: Option<u32>,
    pub seq_end: Option<u32>,
    pub ack: Option<u32>,
    pub win: Option<u64>,
    pub length: Option<u64>,
}

impl TcpLine<'_> {
    pub fn flag(&self) -> TcpFlag {
        if self.flags.contains("S.") {
            TcpFlag::SynAck
        } else if self.flags.contains('S') {
            TcpFlag::Syn
        } else if self.flags.contains('R') {
            TcpFlag::Rst
        } else if self.flags.contains('F') {
            TcpFlag::Fin
        } else if self.ack == Some(1) {
            TcpFlag::FirstAck
        } else {
            TcpFlag::Other
        }
    }
}

#[derive(Debug, Clone)]
pub struct TcpGrammar {
    header: Regex,
    fields: Regex,
}

impl TcpGrammar {
    pub fn new() -> Result<Self, regex::Error> {
        let header = Regex::new(concat!(
            r"^(?P<time>\S+)\s+IP\s+",
            r"(?P<src_host>\S+)\.(?P<src_port>[-/\w]+)\s+[<>]\s+",
            r"(?P<dst_host>\S+)\.(?P<dst_port>[-/\w]+)\s*:\s+",
            r"Flags\s+\[(?P<flags>[^\]]+)\](?P<rest>.*)$",
        ))?;
        let fields = Regex::new(r"\b(?P<name>seq|ack|win|length)\s+(?P<first>\d+)(?::(?P<last>\d+))?")?;
        Ok(Self { header, fields })
    }

    pub fn parse<'a>(&self, line: &'a str) -> Result<TcpLine<'a>, ParseError> {
        let caps = self
            .header
            .captures(line)
            .ok_or_else(|| ParseError::InvalidFormat("not a tcpdump IP header".into()))?;

        let group = |name: &str| capture(&caps, name);
        let time = parse_time_of_day(group("time"))
            .ok_or_else(|| ParseError::InvalidFormat(format!("bad capture time '{}'", group("time"))))?;

        let mut parsed = TcpLine {
            time,
            src_host: group("src_host"),
            src_port: group("src_port"),
            dst_host: group("dst_host"),
            dst_port: group("dst_port"),
            flags: group("flags"),
            seq: None,
            seq_end: None,
            ack: None,
            win: None,
            length: None,
        };

        for field in self.fields.captures_iter(group("rest")) {
            let first = &field["first"];
            match &field["name"] {
                "seq" => {
                    parsed.seq = first.parse().ok();
                    parsed.seq_end = field.name("last").and_then(|m| m.as_str().parse().ok());
                }
                "ack" => parsed.ack = first.parse().ok(),
                "win" => parsed.win = first.parse().ok(),
                "length" => parsed.length = first.parse().ok(),
                _ => {}
            }
        }

        Ok(parsed)
    }
}

fn capture<'a>(caps: &Captures<'a>, name: &str) -> &'a str {
    caps.name(name).map_or("", |m| m.as_str())
}

/// Decides which side of a captured packet is the monitored server.
pub trait ServerRole: Send + Sync {
    fn is_server(&self, host: &str) -> bool;
}

impl<F> ServerRole for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_server(&self, host: &str) -> bool {
        self(host)
    }
}

/// Server hosts recognised by address prefix (`"10.0.98."`).
#[derive(Debug, Clone, Default)]
pub struct HostPrefixes(pub Vec<String>);

impl ServerRole for HostPrefixes {
    fn is_server(&self, host: &str) -> bool {
        self.0.iter().any(|prefix| host.starts_with(prefix.as_str()))
    }
}

/// Direction of a packet relative to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

impl Direction {
    /// `None` when neither host plays the server role.
    pub fn classify(role: &dyn ServerRole, line: &TcpLine<'_>) -> Option<Self> {
        if role.is_server(line.src_host) {
            Some(Direction::ServerToClient)
        } else if role.is_server(line.dst_host) {
            Some(Direction::ClientToServer)
        } else {
            None
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Direction::ClientToServer => "c2s",
            Direction::ServerToClient => "s2c",
        }
    }
}
