//! Series data model — samples, series, lazy series maps and merged sets.

pub mod sample;
pub mod model;
pub mod map;
pub mod set;
pub mod metrics;

pub use sample::{Sample, SampleKind};
pub use model::{Series, SeriesStats, SeriesTemplate};
pub use map::SeriesMap;
pub use set::{week_start, SeriesSet};
pub use metrics::{LoadMetrics, LoadMetricsSnapshot};

use chrono::NaiveDateTime;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SeriesError {
    #[error("Dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: String, right: String },

    #[error("Sample key mismatch: {0} vs {1}")]
    KeyMismatch(NaiveDateTime, NaiveDateTime),
}
