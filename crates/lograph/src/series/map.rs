use std::collections::BTreeMap;

use super::model::{Series, SeriesTemplate};

/// Lazily creates one [`Series`] per label suffix under a shared base dimension.
///
/// Looking up a missing suffix constructs `Series(base + [suffix])` with the
/// map's template. A suffix maps to the same series for the map's lifetime.
#[derive(Debug, Clone)]
pub struct SeriesMap {
    base: Vec<String>,
    template: SeriesTemplate,
    series: BTreeMap<String, Series>,
}

impl SeriesMap {
    pub fn new<I, S>(base: I, template: SeriesTemplate) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            base: base.into_iter().map(Into::into).collect(),
            template,
            series: BTreeMap::new(),
        }
    }

    pub fn base(&self) -> &[String] {
        &self.base
    }

    /// Series for `suffix`, created on first access.
    pub fn entry(&mut self, suffix: &str) -> &mut Series {
        let Self { base, template, series } = self;
        series.entry(suffix.to_string()).or_insert_with(|| {
            let dimension = base.iter().cloned().chain(std::iter::once(suffix.to_string()));
            Series::with_template(dimension, template)
        })
    }

    pub fn get(&self, suffix: &str) -> Option<&Series> {
        self.series.get(suffix)
    }

    pub fn get_mut(&mut self, suffix: &str) -> Option<&mut Series> {
        self.series.get_mut(suffix)
    }

    pub fn remove(&mut self, suffix: &str) -> Option<Series> {
        self.series.remove(suffix)
    }

    pub fn contains(&self, suffix: &str) -> bool {
        self.series.contains_key(suffix)
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Series)> {
        self.series.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Series)> {
        self.series.iter_mut().map(|(k, v)| (k.as_str(), v))
    }

    /// Keep only the `n` labels with the largest summed value.
    /// Ties keep the lexically smaller label.
    pub fn retain_top(&mut self, n: usize) {
        if self.series.len() <= n {
            return;
        }

        let mut totals: Vec<(String, f64)> = self
            .series
            .iter()
            .map(|(label, s)| (label.clone(), s.values().sum::<f64>()))
            .collect();
        totals.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let keep: Vec<String> = totals.into_iter().take(n).map(|(label, _)| label).collect();
        self.series.retain(|label, _| keep.contains(label));
    }

    pub fn into_series(self) -> Vec<Series> {
        self.series.into_values().collect()
    }

    /// Consume the map, yielding `(suffix, series)` in label order.
    pub fn into_entries(self) -> impl Iterator<Item = (String, Series)> {
        self.series.into_iter()
    }
}
