use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    /// The file does not follow this parser's naming/content convention.
    /// Callers probe the next parser.
    #[error("Unsupported log file: {0}")]
    Unsupported(String),

    /// A line does not match the expected grammar. Skipped by the line driver.
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Line too large: {0} bytes (max: {1} bytes)")]
    LineTooLarge(usize, usize),

    /// Internal invariant violated; aborts the current file only.
    #[error("Fatal parse error: {0}")]
    Fatal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid grammar: {0}")]
    Grammar(#[from] regex::Error),
}

impl ParseError {
    /// Per-line errors the driver logs and skips.
    pub fn is_line_error(&self) -> bool {
        matches!(self, ParseError::InvalidFormat(_) | ParseError::LineTooLarge(_, _))
    }
}

/// File name without directories, as UTF-8.
pub fn file_name(path: &Path) -> Result<&str, ParseError> {
    path.file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ParseError::Unsupported(path.display().to_string()))
}

/// Dimension labels derived from a file name: extension dropped, split on `_`.
///
/// `pingtest_host1_eth0.log` → `["pingtest", "host1", "eth0"]`
pub fn dimension_from_path(path: &Path) -> Vec<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .split('_')
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

/// Reject files whose name does not start with `prefix`.
pub fn require_prefix<'a>(path: &'a Path, prefix: &str) -> Result<&'a str, ParseError> {
    let name = file_name(path)?;
    if name.starts_with(prefix) {
        Ok(name)
    } else {
        Err(ParseError::Unsupported(name.to_string()))
    }
}
