//! Conf module — configuration model and loading.

pub mod model;
pub mod load;

pub use model::{AnalysisKind, ErfTestConfig, LographConfig, PingTestConfig, SourceConfig, TcpdumpConfig};
pub use load::ConfigError;
