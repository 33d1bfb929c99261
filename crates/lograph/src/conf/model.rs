//! Model — LographConfig and its sections.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::parser::formats::event_count::{DEFAULT_DEDUP_CAPACITY, DEFAULT_INTERVAL_SECS};
use crate::parser::formats::pingtest::DEFAULT_LOSS_THRESHOLD;
use crate::parser::formats::StrayPlacement;
use crate::parser::RegionPrefix;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LographConfig {
    pub sources: Vec<SourceConfig>,
    /// Parse files of a source on the rayon pool
    pub parallel: bool,
    /// Merge samples sharing a timestamp after every load
    pub consolidate: bool,
    /// Report one block per ISO week instead of one per source
    pub split_by_week: bool,
    pub tcpdump: TcpdumpConfig,
    pub pingtest: PingTestConfig,
    pub erftest: ErfTestConfig,
    pub regions: Vec<RegionPrefix>,
}

/// Which parser family a source is loaded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    /// dntest, pingtest and erftest logs
    #[default]
    Network,
    TcpEvents,
    TcpRegions,
    TcpConnections,
    Http,
}

impl AnalysisKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisKind::Network => "network",
            AnalysisKind::TcpEvents => "tcp_events",
            AnalysisKind::TcpRegions => "tcp_regions",
            AnalysisKind::TcpConnections => "tcp_connections",
            AnalysisKind::Http => "http",
        }
    }

    pub fn uses_tcpdump(self) -> bool {
        matches!(
            self,
            AnalysisKind::TcpEvents | AnalysisKind::TcpRegions | AnalysisKind::TcpConnections
        )
    }
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "network" => Ok(AnalysisKind::Network),
            "tcp_events" => Ok(AnalysisKind::TcpEvents),
            "tcp_regions" => Ok(AnalysisKind::TcpRegions),
            "tcp_connections" => Ok(AnalysisKind::TcpConnections),
            "http" => Ok(AnalysisKind::Http),
            other => Err(format!("unknown analysis kind: {other}")),
        }
    }
}

/// A file or directory to load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub kind: AnalysisKind,
}

impl SourceConfig {
    pub fn new(path: impl Into<PathBuf>, kind: AnalysisKind) -> Self {
        Self { path: path.into(), kind }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpdumpConfig {
    /// Address prefixes of the hosts playing the server role
    pub server_prefixes: Vec<String>,
    pub interval_secs: u32,
    pub dedup_capacity: usize,
    /// Keep only the N busiest labels per capture
    pub top_n: Option<usize>,
    /// Capture date; otherwise taken from the file name, then today
    pub start_date: Option<NaiveDate>,
    /// Port → service name for handshake series
    pub service_names: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PingTestConfig {
    pub loss_threshold_percent: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ErfTestConfig {
    pub strict: bool,
    pub placement: StrayPlacement,
}

impl Default for LographConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            parallel: false,
            consolidate: true,
            split_by_week: false,
            tcpdump: TcpdumpConfig::default(),
            pingtest: PingTestConfig::default(),
            erftest: ErfTestConfig::default(),
            regions: Vec::new(),
        }
    }
}

impl Default for TcpdumpConfig {
    fn default() -> Self {
        Self {
            server_prefixes: Vec::new(),
            interval_secs: DEFAULT_INTERVAL_SECS,
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            top_n: None,
            start_date: None,
            service_names: HashMap::new(),
        }
    }
}

impl Default for PingTestConfig {
    fn default() -> Self {
        Self {
            loss_threshold_percent: DEFAULT_LOSS_THRESHOLD,
        }
    }
}

impl LographConfig {
    /// Check that configuration values are sane. Does not touch the filesystem.
    pub fn validate(&self) -> Result<(), String> {
        if self.sources.is_empty() {
            return Err("no sources configured".to_string());
        }
        if self.sources.iter().any(|s| s.path.as_os_str().is_empty()) {
            return Err("source path must not be empty".to_string());
        }
        if self.sources.iter().any(|s| s.kind.uses_tcpdump()) {
            self.tcpdump.validate()?;
        }
        self.pingtest.validate()?;
        if self.regions.iter().any(|r| r.prefix.is_empty()) {
            return Err("regions: prefix must not be empty".to_string());
        }
        Ok(())
    }
}

impl TcpdumpConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.server_prefixes.iter().all(|p| p.is_empty()) {
            return Err("tcpdump.server_prefixes must name at least one prefix".to_string());
        }
        if self.interval_secs == 0 {
            return Err("tcpdump.interval_secs must be > 0".to_string());
        }
        if self.dedup_capacity == 0 {
            return Err("tcpdump.dedup_capacity must be > 0".to_string());
        }
        if self.top_n == Some(0) {
            return Err("tcpdump.top_n must be > 0 when set".to_string());
        }
        Ok(())
    }
}

impl PingTestConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=100.0).contains(&self.loss_threshold_percent) {
            return Err(format!(
                "pingtest.loss_threshold_percent must be within 0..=100, got {}",
                self.loss_threshold_percent
            ));
        }
        Ok(())
    }
}
