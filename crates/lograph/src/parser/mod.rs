//! Log parsing: line driver, shared grammar helpers and per-tool parsers.
//!
//! # Architecture
//!
//! - `traits.rs`: [`LogParser`] (file level) and [`LineParser`] (state machine)
//! - `driver.rs`: feeds files line by line, skips malformed lines
//! - `clock.rs`, `units.rs`, `region.rs`: timestamps, unit scaling, IP regions
//! - `cache.rs`: bounded duplicate suppression
//! - `formats/`: one module per tool

pub mod traits;
pub mod model;
pub mod driver;
pub mod cache;
pub mod clock;
pub mod units;
pub mod region;
pub mod formats;

pub use traits::{LineParser, LogParser};
pub use model::ParseError;
pub use cache::SlidingCache;
pub use region::{PrefixRegionTable, Region, RegionPrefix, RegionResolver};

// Lines longer than this are skipped
pub const MAX_LINE_SIZE: usize = 1_048_576; // 1MB
