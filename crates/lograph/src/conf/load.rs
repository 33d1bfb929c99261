//! Load — config loading from file and environment variables.

use std::fs;
use std::path::Path;

use thiserror::Error;

use super::model::{AnalysisKind, LographConfig, SourceConfig};

pub const CONFIG_FILE_ENV: &str = "LOGRAPH_CONFIG_FILE";
pub const DEFAULT_CONFIG_FILE: &str = "lograph.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid environment override {name}: {reason}")]
    Env { name: &'static str, reason: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl LographConfig {
    /// Load configuration from file or environment variables
    /// Priority: Environment Variables > Config File > Defaults
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var(CONFIG_FILE_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());

        let mut config = if Path::new(&config_path).exists() {
            tracing::info!("Loading configuration from: {}", config_path);
            Self::from_file(&config_path)?
        } else {
            tracing::info!("Config file not found at {}, using environment variables", config_path);
            Self::default()
        };

        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(toml::from_str(&contents)?)
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Apply `LOGRAPH_*` overrides looked up through `lookup`.
    ///
    /// `LOGRAPH_SOURCES` is a comma separated list of `path` or `kind=path`
    /// entries and replaces the configured sources.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(sources) = lookup("LOGRAPH_SOURCES") {
            self.sources = parse_sources(&sources)?;
        }
        if let Some(value) = lookup("LOGRAPH_PARALLEL") {
            self.parallel = parse_flag("LOGRAPH_PARALLEL", &value)?;
        }
        if let Some(value) = lookup("LOGRAPH_SPLIT_BY_WEEK") {
            self.split_by_week = parse_flag("LOGRAPH_SPLIT_BY_WEEK", &value)?;
        }
        Ok(())
    }
}

fn parse_flag(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" | "" => Ok(false),
        other => Err(ConfigError::Env {
            name,
            reason: format!("expected a boolean, got {other:?}"),
        }),
    }
}

fn parse_sources(value: &str) -> Result<Vec<SourceConfig>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((kind, path)) => kind
                .parse::<AnalysisKind>()
                .map(|kind| SourceConfig::new(path.trim(), kind))
                .map_err(|reason| ConfigError::Env {
                    name: "LOGRAPH_SOURCES",
                    reason,
                }),
            None => Ok(SourceConfig::new(entry, AnalysisKind::default())),
        })
        .collect()
}
