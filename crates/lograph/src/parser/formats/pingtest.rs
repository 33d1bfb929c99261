//! Ping sweep (`pingtest*`) logs.
//!
//! Each segment is a time marker, ping output, the packet summary and the
//! rtt summary (which closes the segment). Losses above the threshold are
//! kept as sparse events and also projected onto the RTT timeline.

use std::path::Path;

use chrono::NaiveDateTime;
use regex::Regex;
use tracing::{debug, trace};

use crate::parser::clock::TimeMarker;
use crate::parser::driver::parse_lines;
use crate::parser::model::{dimension_from_path, require_prefix};
use crate::parser::traits::{LineParser, LogParser, ParseError};
use crate::series::{Sample, SampleKind, Series, SeriesTemplate};

pub const DEFAULT_LOSS_THRESHOLD: f64 = 20.0;

/// Upper bound on interpolated points per loss event; larger gaps anchor to
/// the preceding sample.
pub const MAX_PROJECTED_STEPS: i32 = 3600;

pub struct PingTestCorrelator {
    marker: TimeMarker,
    packets: Regex,
    rtt_summary: Regex,
    threshold: f64,
    segment: Option<NaiveDateTime>,
    rtt: Series,
    loss: Series,
}

impl PingTestCorrelator {
    pub fn new(base: &[String], threshold: f64) -> Result<Self, regex::Error> {
        let under = |label: &str| base.iter().cloned().chain(std::iter::once(label.to_string()));
        Ok(Self {
            marker: TimeMarker::new()?,
            packets: Regex::new(
                r"^\s*(?P<sent>\d+)\s*packets transmitted,\s*(?P<received>\d+)\s*(?:packets )?received,.*?(?P<loss>\d+(?:\.\d+)?)%\s*packet loss",
            )?,
            rtt_summary: Regex::new(
                r"^(?:rtt|round-trip)\s+min/avg/max/(?:mdev|stddev)\s*=\s*(?P<min>\d+\.\d+)/(?P<avg>\d+\.\d+)/(?P<max>\d+\.\d+)/(?P<mdev>\d+\.\d+)\s*ms",
            )?,
            threshold,
            segment: None,
            rtt: Series::with_template(under("rtt"), &SeriesTemplate::new("ms")),
            loss: Series::with_template(under("loss"), &SeriesTemplate::discrete("%")),
        })
    }
}

fn number<T: std::str::FromStr>(caps: &regex::Captures<'_>, name: &str) -> Result<T, ParseError>
where
    T::Err: std::fmt::Display,
{
    caps[name]
        .parse()
        .map_err(|e| ParseError::InvalidFormat(format!("{name}: {e}")))
}

impl LineParser for PingTestCorrelator {
    fn feed(&mut self, line: &str) -> Result<(), ParseError> {
        if let Some(ts) = self.marker.parse(line) {
            if let Some(open) = self.segment.replace(ts) {
                trace!(segment = %open, "segment closed without rtt summary");
            }
            return Ok(());
        }

        let Some(at) = self.segment else {
            return Ok(());
        };

        if let Some(caps) = self.packets.captures(line) {
            let loss: f64 = number(&caps, "loss")?;
            if loss > self.threshold {
                let sent = number(&caps, "sent")?;
                let received = number(&caps, "received")?;
                self.loss.push_sample(Sample::loss(at, loss, sent, received));
            }
        } else if let Some(caps) = self.rtt_summary.captures(line) {
            self.rtt.push_sample(Sample::mean(
                at,
                number(&caps, "avg")?,
                Some(number(&caps, "min")?),
                Some(number(&caps, "max")?),
                number(&caps, "mdev")?,
            ));
            self.segment = None;
        }
        Ok(())
    }

    fn into_series(self) -> Vec<Series> {
        let mut rtt = self.rtt;
        rtt.sort();
        let projected = project_losses(&rtt, &self.loss);
        rtt.subordinates.push(projected);
        vec![rtt, self.loss]
    }
}

/// Place loss events on the (sorted) RTT timeline.
///
/// A loss before the first RTT sample anchors there, a loss with no missing
/// packet or after the last sample anchors to the preceding sample. Otherwise
/// the gap to the next sample is split into `missing + 1` steps and one
/// interpolated point is emitted per step start. Gaps needing more than
/// [`MAX_PROJECTED_STEPS`] points anchor to the preceding sample.
pub fn project_losses(rtt: &Series, loss: &Series) -> Series {
    let mut projected = loss.empty_like();
    projected.unit = rtt.unit.clone();

    let points: Vec<(NaiveDateTime, f64)> = rtt.samples.iter().map(|s| (s.key, s.value)).collect();
    let Some(&first) = points.first() else {
        return projected;
    };

    for event in &loss.samples {
        let (sent, received) = match event.kind {
            SampleKind::Loss { sent, received } => (sent, received),
            _ => (0, 0),
        };

        let i = points.partition_point(|(key, _)| *key <= event.key);
        if i == 0 {
            projected.push(first.0, first.1);
            continue;
        }

        let (left_key, left_value) = points[i - 1];
        let missing = sent.saturating_sub(received);
        let steps = missing
            .checked_add(1)
            .and_then(|steps| i32::try_from(steps).ok())
            .filter(|steps| *steps <= MAX_PROJECTED_STEPS);
        if missing > 0 && steps.is_none() && i < points.len() {
            debug!(key = %event.key, sent, received, "loss too large to interpolate, anchored");
        }

        match (points.get(i), steps) {
            (Some(&(right_key, right_value)), Some(steps)) if missing > 0 => {
                let step_key = (right_key - left_key) / steps;
                let step_value = (right_value - left_value) / f64::from(steps);
                for n in 0..steps {
                    projected.push(left_key + step_key * n, left_value + step_value * f64::from(n));
                }
            }
            _ => projected.push(left_key, left_value),
        }
    }
    projected
}

/// Parser for `pingtest*` logs.
#[derive(Debug, Clone, Copy)]
pub struct PingTestLogParser {
    /// Losses strictly above this percentage are recorded
    pub loss_threshold: f64,
}

impl Default for PingTestLogParser {
    fn default() -> Self {
        Self {
            loss_threshold: DEFAULT_LOSS_THRESHOLD,
        }
    }
}

impl LogParser for PingTestLogParser {
    fn name(&self) -> &'static str {
        "pingtest"
    }

    fn parse_file(&self, path: &Path) -> Result<Vec<Series>, ParseError> {
        require_prefix(path, "pingtest")?;
        let correlator = PingTestCorrelator::new(&dimension_from_path(path), self.loss_threshold)?;
        parse_lines(path, correlator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{Duration, NaiveDate};
    use std::io::Cursor;

    use crate::parser::driver::parse_reader;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2016, 6, 15).unwrap().and_hms_opt(h, m, s).unwrap()
    }

    fn rtt_of(points: &[(NaiveDateTime, f64)]) -> Series {
        let mut s = Series::new(["pingtest", "host1", "rtt"], "ms");
        for (k, v) in points {
            s.push_sample(Sample::mean(*k, *v, None, None, 0.0));
        }
        s
    }

    fn loss_of(events: &[(NaiveDateTime, u32, u32)]) -> Series {
        let mut s = Series::with_template(["pingtest", "host1", "loss"], &SeriesTemplate::discrete("%"));
        for (k, sent, received) in events {
            let pct = 100.0 * f64::from(sent - received) / f64::from(*sent);
            s.push_sample(Sample::loss(*k, pct, *sent, *received));
        }
        s
    }

    // ── Projection ──────────────────────────────────────────────

    #[test]
    fn test_missing_packets_interpolated_across_gap() {
        let rtt = rtt_of(&[(at(10, 0, 0), 20.0), (at(10, 1, 0), 40.0)]);
        let loss = loss_of(&[(at(10, 0, 30), 4, 2)]);

        let projected = project_losses(&rtt, &loss);
        assert_eq!(projected.len(), 3);
        assert_eq!(projected.unit, "ms");
        assert_eq!(projected.dimension, loss.dimension);
        assert!(!projected.is_continuous);

        let keys: Vec<_> = projected.keys().collect();
        assert_eq!(keys, vec![at(10, 0, 0), at(10, 0, 20), at(10, 0, 40)]);
        let values: Vec<_> = projected.values().collect();
        assert_relative_eq!(values[0], 20.0);
        assert_relative_eq!(values[1], 20.0 + 20.0 / 3.0);
        assert_relative_eq!(values[2], 20.0 + 40.0 / 3.0);
    }

    #[test]
    fn test_anchor_rules() {
        let rtt = rtt_of(&[(at(10, 0, 0), 20.0), (at(10, 1, 0), 40.0)]);
        let loss = loss_of(&[
            (at(9, 0, 0), 4, 2),   // before first → first
            (at(10, 0, 30), 4, 4), // nothing missing → preceding
            (at(11, 0, 0), 4, 1),  // after last → last
        ]);

        let projected = project_losses(&rtt, &loss);
        let points: Vec<_> = projected.samples.iter().map(|s| (s.key, s.value)).collect();
        assert_eq!(
            points,
            vec![(at(10, 0, 0), 20.0), (at(10, 0, 0), 20.0), (at(10, 1, 0), 40.0)]
        );
    }

    #[test]
    fn test_oversized_loss_anchors_to_preceding() {
        let rtt = rtt_of(&[(at(10, 0, 0), 20.0), (at(10, 1, 0), 40.0)]);
        let loss = loss_of(&[
            (at(10, 0, 30), u32::MAX, 0),
            (at(10, 0, 30), 1_000_000_000, 0),
        ]);

        let projected = project_losses(&rtt, &loss);
        let points: Vec<_> = projected.samples.iter().map(|s| (s.key, s.value)).collect();
        assert_eq!(points, vec![(at(10, 0, 0), 20.0), (at(10, 0, 0), 20.0)]);
    }

    #[test]
    fn test_projection_without_rtt_is_empty() {
        let projected = project_losses(&rtt_of(&[]), &loss_of(&[(at(10, 0, 0), 4, 0)]));
        assert!(projected.is_empty());
    }

    // ── Segments ────────────────────────────────────────────────

    fn run(threshold: f64, lines: &[&str]) -> Vec<Series> {
        let correlator = PingTestCorrelator::new(&["pingtest".into(), "host1".into()], threshold).unwrap();
        parse_reader(Cursor::new(lines.join("\n").into_bytes()), "test", correlator)
    }

    const T0: &str = "[1466000000] Wed Jun 15 14:13:20 UTC 2016";
    const T1: &str = "[1466000060] Wed Jun 15 14:14:20 UTC 2016";
    const T2: &str = "[1466000120] Wed Jun 15 14:15:20 UTC 2016";

    #[test]
    fn test_segments_build_rtt_and_loss() {
        let out = run(
            DEFAULT_LOSS_THRESHOLD,
            &[
                T0,
                "PING 192.0.2.1 (192.0.2.1) 56(84) bytes of data.",
                "64 bytes from 192.0.2.1: icmp_seq=1 ttl=64 time=10.1 ms",
                "--- 192.0.2.1 ping statistics ---",
                "10 packets transmitted, 10 received, 0% packet loss, time 9012ms",
                "rtt min/avg/max/mdev = 10.100/20.200/30.300/2.500 ms",
                T1,
                "10 packets transmitted, 5 received, 50% packet loss, time 9012ms",
                "rtt min/avg/max/mdev = 11.000/40.000/90.000/5.000 ms",
                T2,
                "10 packets transmitted, 9 received, 10% packet loss, time 9012ms",
                "rtt min/avg/max/mdev = 10.000/30.000/50.000/1.000 ms",
            ],
        );

        let (rtt, loss) = (&out[0], &out[1]);
        assert_eq!(rtt.dimension, vec!["pingtest", "host1", "rtt"]);
        assert_eq!(rtt.len(), 3);
        assert_eq!(
            rtt.samples[0].kind,
            SampleKind::Mean {
                min: 10.1,
                max: 30.3,
                std: 2.5,
                count: 1
            }
        );
        assert_relative_eq!(rtt.samples[0].value, 20.2);

        assert_eq!(loss.unit, "%");
        assert_eq!(loss.len(), 1, "10% loss is under the threshold");
        assert_eq!(loss.samples[0].key, at(14, 14, 20));
        assert_eq!(loss.samples[0].kind, SampleKind::Loss { sent: 10, received: 5 });

        // 5 missing packets between 14:14:20 and 14:15:20
        let projected = &rtt.subordinates[0];
        assert_eq!(projected.len(), 6);
        assert_eq!(projected.samples[1].key, at(14, 14, 20) + Duration::seconds(10));
    }

    #[test]
    fn test_huge_packet_counts_between_segments() {
        let out = run(
            DEFAULT_LOSS_THRESHOLD,
            &[
                T0,
                "10 packets transmitted, 10 received, 0% packet loss, time 9012ms",
                "rtt min/avg/max/mdev = 10.000/20.000/30.000/1.000 ms",
                T1,
                "4294967295 packets transmitted, 0 received, 100% packet loss, time 9012ms",
                "rtt min/avg/max/mdev = 10.000/20.000/30.000/1.000 ms",
                T2,
                "10 packets transmitted, 10 received, 0% packet loss, time 9012ms",
                "rtt min/avg/max/mdev = 10.000/40.000/90.000/1.000 ms",
            ],
        );

        assert_eq!(out[0].len(), 3);
        assert_eq!(out[1].samples[0].kind, SampleKind::Loss { sent: u32::MAX, received: 0 });
        let projected = &out[0].subordinates[0];
        assert_eq!(projected.len(), 1);
        assert_eq!(projected.samples[0].key, at(14, 14, 20));
    }

    #[test]
    fn test_threshold_is_strict() {
        let out = run(
            50.0,
            &[
                T0,
                "10 packets transmitted, 5 received, 50% packet loss, time 9012ms",
                "rtt min/avg/max/mdev = 11.000/40.000/90.000/5.000 ms",
            ],
        );
        assert!(out[1].is_empty());
    }

    #[test]
    fn test_marker_reopens_unfinished_segment() {
        let out = run(
            DEFAULT_LOSS_THRESHOLD,
            &[
                T0,
                "10 packets transmitted, 0 received, 100% packet loss, time 9012ms",
                T1,
                "10 packets transmitted, 10 received, 0% packet loss, time 9012ms",
                "rtt min/avg/max/mdev = 10.000/30.000/50.000/1.000 ms",
                "rtt min/avg/max/mdev = 99.000/99.000/99.000/0.000 ms",
            ],
        );
        assert_eq!(out[0].len(), 1, "summary outside a segment is ignored");
        assert_eq!(out[0].samples[0].key, at(14, 14, 20));
        assert_eq!(out[1].samples[0].key, at(14, 13, 20));
        // total loss before the first RTT sample anchors to it
        assert_eq!(out[0].subordinates[0].samples[0].key, at(14, 14, 20));
    }
}
