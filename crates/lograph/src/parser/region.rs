use serde::{Deserialize, Serialize};

/// Label used when an address cannot be resolved.
pub const UNKNOWN_REGION: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub country: String,
    #[serde(default)]
    pub city: Option<String>,
}

impl Region {
    /// City when known, otherwise the country.
    pub fn label(&self) -> &str {
        self.city.as_deref().unwrap_or(&self.country)
    }
}

/// Maps a remote address to a geographic region.
#[cfg_attr(test, mockall::automock)]
pub trait RegionResolver: Send + Sync {
    fn resolve_region(&self, ip: &str) -> Option<Region>;
}

/// Region label for `ip`, [`UNKNOWN_REGION`] when unresolved.
pub fn region_label(resolver: &dyn RegionResolver, ip: &str) -> String {
    resolver
        .resolve_region(ip)
        .map(|r| r.label().to_string())
        .unwrap_or_else(|| UNKNOWN_REGION.to_string())
}

/// One row of the configured region table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionPrefix {
    /// Textual address prefix, e.g. `"203.0.113."`
    pub prefix: String,
    pub country: String,
    #[serde(default)]
    pub city: Option<String>,
}

/// Resolver backed by address prefixes; the longest matching prefix wins.
#[derive(Debug, Clone, Default)]
pub struct PrefixRegionTable {
    entries: Vec<RegionPrefix>,
}

impl PrefixRegionTable {
    pub fn new(mut entries: Vec<RegionPrefix>) -> Self {
        entries.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl RegionResolver for PrefixRegionTable {
    fn resolve_region(&self, ip: &str) -> Option<Region> {
        self.entries
            .iter()
            .find(|e| ip.starts_with(&e.prefix))
            .map(|e| Region {
                country: e.country.clone(),
                city: e.city.clone(),
            })
    }
}
