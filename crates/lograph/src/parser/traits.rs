use std::path::Path;

pub use super::model::ParseError;
use crate::series::Series;

/// File-level parser registered with a [`crate::series::SeriesSet`].
///
/// Implementations are stateless factories: every call builds fresh line
/// state, so one instance can serve many files (and threads).
pub trait LogParser: Send + Sync {
    fn name(&self) -> &'static str;

    /// Parse a whole file. Returns [`ParseError::Unsupported`] when the file
    /// does not follow this parser's convention.
    fn parse_file(&self, path: &Path) -> Result<Vec<Series>, ParseError>;
}

/// Line-level state machine driven by [`super::driver::parse_lines`].
pub trait LineParser {
    /// Consume one line (without its terminator).
    fn feed(&mut self, line: &str) -> Result<(), ParseError>;

    /// Called once after the last line.
    fn finish(&mut self) -> Result<(), ParseError> {
        Ok(())
    }

    /// Everything built so far, including after a fatal error.
    fn into_series(self) -> Vec<Series>;
}
