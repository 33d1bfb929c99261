use chrono::NaiveDateTime;
use serde::Serialize;

use super::SeriesError;

/// Extra payload carried by a sample besides its headline value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SampleKind {
    /// Bare value (counts, rates, intervals)
    Plain,
    /// Summary of several observations (ping RTT: avg/min/max/mdev)
    Mean {
        min: f64,
        max: f64,
        std: f64,
        count: u32,
    },
    /// Packet-loss event; `value` holds the loss percentage
    Loss { sent: u32, received: u32 },
}

/// A single time-keyed value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    pub key: NaiveDateTime,
    pub value: f64,
    #[serde(flatten)]
    pub kind: SampleKind,
}

impl Sample {
    pub fn new(key: NaiveDateTime, value: f64) -> Self {
        Self {
            key,
            value,
            kind: SampleKind::Plain,
        }
    }

    /// Summary sample; `min`/`max` default to the mean when absent.
    pub fn mean(key: NaiveDateTime, mean: f64, min: Option<f64>, max: Option<f64>, std: f64) -> Self {
        Self {
            key,
            value: mean,
            kind: SampleKind::Mean {
                min: min.unwrap_or(mean),
                max: max.unwrap_or(mean),
                std,
                count: 1,
            },
        }
    }

    pub fn loss(key: NaiveDateTime, loss_percent: f64, sent: u32, received: u32) -> Self {
        Self {
            key,
            value: loss_percent,
            kind: SampleKind::Loss { sent, received },
        }
    }

    /// Fold `other` into this sample. Keys must be equal.
    pub fn merge(&mut self, other: &Sample) -> Result<(), SeriesError> {
        if self.key != other.key {
            return Err(SeriesError::KeyMismatch(self.key, other.key));
        }

        match (&mut self.kind, other.kind) {
            (
                SampleKind::Mean { min, max, std, count },
                SampleKind::Mean {
                    min: other_min,
                    max: other_max,
                    std: other_std,
                    count: other_count,
                },
            ) => {
                let n1 = f64::from(*count);
                let n2 = f64::from(other_count);
                let total = n1 + n2;
                let mean = (n1 * self.value + n2 * other.value) / total;

                // Pooled variance: within-group spread plus the shift of each group mean.
                let variance = (n1 * (std.powi(2) + (self.value - mean).powi(2))
                    + n2 * (other_std.powi(2) + (other.value - mean).powi(2)))
                    / total;

                *min = min.min(other_min);
                *max = max.max(other_max);
                *std = variance.sqrt();
                *count += other_count;
                self.value = mean;
            }
            (
                SampleKind::Loss { sent, received },
                SampleKind::Loss {
                    sent: other_sent,
                    received: other_received,
                },
            ) => {
                *sent += other_sent;
                *received += other_received;
                self.value = if *sent == 0 {
                    0.0
                } else {
                    f64::from(sent.saturating_sub(*received)) * 100.0 / f64::from(*sent)
                };
            }
            _ => self.value += other.value,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2016, 6, 15)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_plain_merge_accumulates() {
        let mut a = Sample::new(at(10, 0, 0), 2.0);
        a.merge(&Sample::new(at(10, 0, 0), 3.0)).unwrap();
        assert_eq!(a.value, 5.0);
        assert_eq!(a.kind, SampleKind::Plain);
    }

    #[test]
    fn test_merge_rejects_different_keys() {
        let mut a = Sample::new(at(10, 0, 0), 1.0);
        let err = a.merge(&Sample::new(at(10, 0, 1), 1.0));
        assert!(matches!(err, Err(SeriesError::KeyMismatch(_, _))));
        assert_eq!(a.value, 1.0, "failed merge must not touch the value");
    }

    #[test]
    fn test_mean_merge_pools_statistics() {
        let mut a = Sample::mean(at(10, 0, 0), 10.0, Some(8.0), Some(12.0), 0.0);
        let b = Sample::mean(at(10, 0, 0), 20.0, Some(18.0), Some(30.0), 0.0);
        a.merge(&b).unwrap();

        assert_relative_eq!(a.value, 15.0);
        match a.kind {
            SampleKind::Mean { min, max, std, count } => {
                assert_eq!(min, 8.0);
                assert_eq!(max, 30.0);
                assert_eq!(count, 2);
                // two points at 10 and 20 around a mean of 15
                assert_relative_eq!(std, 5.0);
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn test_mean_defaults_min_max_to_mean() {
        let s = Sample::mean(at(10, 0, 0), 42.0, None, None, 1.5);
        assert_eq!(
            s.kind,
            SampleKind::Mean { min: 42.0, max: 42.0, std: 1.5, count: 1 }
        );
    }

    #[test]
    fn test_loss_merge_recomputes_percentage() {
        let mut a = Sample::loss(at(10, 0, 0), 50.0, 4, 2);
        a.merge(&Sample::loss(at(10, 0, 0), 0.0, 4, 4)).unwrap();
        assert_eq!(a.kind, SampleKind::Loss { sent: 8, received: 6 });
        assert_relative_eq!(a.value, 25.0);
    }
}
