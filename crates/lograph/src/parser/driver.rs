//! Driver — feeds a file line by line into a [`LineParser`].
//!
//! Malformed lines are logged with file and line number and skipped. A fatal
//! error stops the file but keeps whatever the parser built up to that point.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::{debug, error, warn};

use super::traits::{LineParser, ParseError};
use super::MAX_LINE_SIZE;
use crate::series::Series;

/// Open `path` and run every line through `parser`.
pub fn parse_lines<P: LineParser>(path: &Path, parser: P) -> Result<Vec<Series>, ParseError> {
    let file = File::open(path)?;
    Ok(parse_reader(BufReader::new(file), &path.display().to_string(), parser))
}

/// Run every line of `reader` through `parser`. `source` is only used for logging.
pub fn parse_reader<R: BufRead, P: LineParser>(mut reader: R, source: &str, mut parser: P) -> Vec<Series> {
    let mut buf = Vec::new();
    let mut line_no = 0usize;
    let mut malformed = 0usize;
    let mut aborted = false;

    'lines: loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                error!(file = source, line = line_no, "read failed, keeping partial result: {}", e);
                aborted = true;
                break;
            }
        }

        let content = buf.strip_suffix(b"\n").unwrap_or(&buf);
        // Some captures terminate lines with a bare CR
        for raw in content.split(|&b| b == b'\r').filter(|seg| !seg.is_empty()) {
            line_no += 1;

            if raw.len() > MAX_LINE_SIZE {
                malformed += 1;
                warn!(
                    file = source,
                    line = line_no,
                    "{}",
                    ParseError::LineTooLarge(raw.len(), MAX_LINE_SIZE)
                );
                continue;
            }

            let line = String::from_utf8_lossy(raw);
            match parser.feed(&line) {
                Ok(()) => {}
                Err(e) if e.is_line_error() => {
                    malformed += 1;
                    warn!(file = source, line = line_no, "Line has incorrect format: {} ({})", line, e);
                }
                Err(e) => {
                    error!(file = source, line = line_no, "Parse aborted: {}", e);
                    aborted = true;
                    break 'lines;
                }
            }
        }
    }

    if !aborted {
        if let Err(e) = parser.finish() {
            error!(file = source, "Parse aborted at end of input: {}", e);
        }
    }

    debug!(file = source, lines = line_no, malformed, aborted, "finished reading");
    parser.into_series()
}
