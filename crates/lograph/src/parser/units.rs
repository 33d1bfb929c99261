//! Throughput unit normalization.
//!
//! Two families, both with power-of-1024 multipliers:
//! bandwidth probes report bits (`Mbits/sec`), download tests report bytes
//! (`MB/s`, or a bare `K`/`M`/`G` suffix on progress lines).

use tracing::warn;

/// Multiplier from bytes/sec to bits/sec.
pub const BYTES_TO_BITS: f64 = 8.0;

const KILO: f64 = 1024.0;
const MEGA: f64 = 1024.0 * 1024.0;
const GIGA: f64 = 1024.0 * 1024.0 * 1024.0;

/// Bits family → bits/sec. Unknown units are logged and the figure is used as is.
pub fn normalize_bits(value: f64, unit: &str) -> f64 {
    match unit {
        "bits/sec" => value,
        "Kbits/sec" => value * KILO,
        "Mbits/sec" => value * MEGA,
        "Gbits/sec" => value * GIGA,
        _ => {
            warn!(unit, value, "Invalid unit format, using figure literally");
            value
        }
    }
}

/// Bytes family → bytes/sec. Unknown units are logged and the figure is used as is.
pub fn normalize_bytes(value: f64, unit: &str) -> f64 {
    match unit {
        "" | "B/s" => value,
        "KB/s" => value * KILO,
        "MB/s" => value * MEGA,
        "GB/s" => value * GIGA,
        u if u.eq_ignore_ascii_case("k") => value * KILO,
        u if u.eq_ignore_ascii_case("m") => value * MEGA,
        u if u.eq_ignore_ascii_case("g") => value * GIGA,
        _ => {
            warn!(unit, value, "Invalid unit format, using figure literally");
            value
        }
    }
}
