//! Per-tool log parsers.

pub mod tcpdump;
pub mod connection;
pub mod event_count;
pub mod erftest;
pub mod dntest;
pub mod pingtest;
pub mod http_log;

pub use tcpdump::{Direction, HostPrefixes, ServerRole, TcpFlag, TcpGrammar, TcpLine};
pub use connection::{
    CollectingSink, ConnectionEntry, ConnectionEvent, ConnectionPair, ConnectionSink, ConnectionTracker,
    DisconnectReason, TcpConnectionLogParser,
};
pub use event_count::{EventCounter, Grouping, TcpEventLogParser};
pub use erftest::{ErfTestLogParser, ErfTestReconciler, StrayPlacement};
pub use dntest::{DownloadTestLogParser, DownloadTestState};
pub use pingtest::{project_losses, PingTestCorrelator, PingTestLogParser};
pub use http_log::{CallIntervalTracker, HttpAccessLogParser};
