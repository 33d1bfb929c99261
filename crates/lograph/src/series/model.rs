use std::collections::BTreeMap;
use std::fmt;
use std::ops::Add;

use chrono::NaiveDateTime;
use serde::Serialize;

use super::sample::Sample;
use super::SeriesError;

/// Presentation attributes shared by every series a factory creates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesTemplate {
    pub unit: String,
    pub priority: i32,
    pub is_continuous: bool,
}

impl SeriesTemplate {
    pub fn new(unit: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            priority: 0,
            is_continuous: true,
        }
    }

    /// Sparse event series (errors, retries, losses)
    pub fn discrete(unit: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            priority: 0,
            is_continuous: false,
        }
    }
}

/// Ordered, dimension-and-unit-tagged sequence of samples.
///
/// `dimension` and `unit` form the merge identity. Samples are kept in
/// insertion order until [`Series::sort`] is called.
#[derive(Debug, Clone, Serialize)]
pub struct Series {
    pub dimension: Vec<String>,
    pub unit: String,
    pub priority: i32,
    pub is_continuous: bool,
    pub samples: Vec<Sample>,
    /// Auxiliary series rendered alongside this one. Never touched by
    /// merge/sort/consolidate.
    pub subordinates: Vec<Series>,
}

/// Simple aggregate over the sample values of a series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesStats {
    pub count: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub std: f64,
}

impl Series {
    pub fn new<I, S>(dimension: I, unit: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_template(dimension, &SeriesTemplate::new(unit))
    }

    pub fn with_template<I, S>(dimension: I, template: &SeriesTemplate) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            dimension: dimension.into_iter().map(Into::into).collect(),
            unit: template.unit.clone(),
            priority: template.priority,
            is_continuous: template.is_continuous,
            samples: Vec::new(),
            subordinates: Vec::new(),
        }
    }

    /// Copy of the metadata with no samples and no subordinates.
    pub fn empty_like(&self) -> Self {
        Self {
            dimension: self.dimension.clone(),
            unit: self.unit.clone(),
            priority: self.priority,
            is_continuous: self.is_continuous,
            samples: Vec::new(),
            subordinates: Vec::new(),
        }
    }

    pub fn push(&mut self, key: NaiveDateTime, value: f64) {
        self.samples.push(Sample::new(key, value));
    }

    pub fn push_sample(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    pub fn keys(&self) -> impl Iterator<Item = NaiveDateTime> + '_ {
        self.samples.iter().map(|s| s.key)
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().map(|s| s.value)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// True when `dimension` contains every label in `labels`.
    pub fn has_labels(&self, labels: &[&str]) -> bool {
        labels
            .iter()
            .all(|label| self.dimension.iter().any(|d| d == label))
    }

    pub fn sort(&mut self) -> &mut Self {
        self.samples.sort_by_key(|s| s.key);
        self
    }

    /// Collapse adjacent samples sharing a key. Expects sorted samples;
    /// non-adjacent duplicates are left alone.
    pub fn consolidate(&mut self) -> &mut Self {
        let mut merged: Vec<Sample> = Vec::with_capacity(self.samples.len());
        for sample in self.samples.drain(..) {
            match merged.last_mut() {
                Some(last) if last.key == sample.key => {
                    // keys are equal, merge cannot fail
                    let _ = last.merge(&sample);
                }
                _ => merged.push(sample),
            }
        }
        self.samples = merged;
        self
    }

    /// Append the samples of `other`. Both series must share dimension and unit.
    pub fn extend_from(&mut self, other: Series) -> Result<(), SeriesError> {
        if self.dimension != other.dimension || self.unit != other.unit {
            return Err(SeriesError::DimensionMismatch {
                left: format!("{} [{}]", self.dimension.join("/"), self.unit),
                right: format!("{} [{}]", other.dimension.join("/"), other.unit),
            });
        }
        self.samples.extend(other.samples);
        self.subordinates.extend(other.subordinates);
        Ok(())
    }

    /// Partition samples by a projection of each sample.
    pub fn split_by<K, F>(&self, key_fn: F) -> BTreeMap<K, Series>
    where
        K: Ord,
        F: Fn(&Sample) -> K,
    {
        let mut parts: BTreeMap<K, Series> = BTreeMap::new();
        for sample in &self.samples {
            parts
                .entry(key_fn(sample))
                .or_insert_with(|| self.empty_like())
                .push_sample(sample.clone());
        }
        parts
    }

    pub fn stats(&self) -> Option<SeriesStats> {
        let values: Vec<f64> = self.values().filter(|v| !v.is_nan()).collect();
        if values.is_empty() {
            return None;
        }

        let count = values.len();
        let mean = values.iter().sum::<f64>() / count as f64;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        Some(SeriesStats {
            count,
            mean,
            min,
            max,
            std: variance.sqrt(),
        })
    }
}

impl Add for Series {
    type Output = Result<Series, SeriesError>;

    fn add(mut self, other: Series) -> Self::Output {
        self.extend_from(other)?;
        Ok(self)
    }
}

impl fmt::Display for Series {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} records)", self.dimension.join("/"), self.len())
    }
}
