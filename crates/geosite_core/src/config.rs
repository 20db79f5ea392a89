//! Core runtime configuration.
//!
//! # Responsibility
//! - Provide defaults for storage, logging and map behavior.
//! - Load overrides from JSON text and `GEOSITE_*` environment variables.
//!
//! # Invariants
//! - A config returned by `validate`-ing constructors has zoom in `0..=22`
//!   and a non-zero surface attach retry budget.

use crate::geometry::codec::LatLng;
use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub const ENV_DB_PATH: &str = "GEOSITE_DB_PATH";
pub const ENV_LOG_LEVEL: &str = "GEOSITE_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "GEOSITE_LOG_DIR";

const MAX_ZOOM: u8 = 22;
const DEFAULT_DB_FILE_NAME: &str = "geosite.sqlite3";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Parse(String),
    ZoomOutOfRange(u8),
    ZeroRetryBudget,
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(message) => write!(f, "invalid config: {message}"),
            Self::ZoomOutOfRange(zoom) => {
                write!(f, "default_zoom {zoom} is outside 0..={MAX_ZOOM}")
            }
            Self::ZeroRetryBudget => write!(f, "attach_retry_budget must be at least 1"),
        }
    }
}

impl Error for ConfigError {}

/// Map behavior knobs shared by surface manager, layer sync and views.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    /// Center of the fallback world view.
    pub default_center: LatLng,
    /// Zoom of the fallback world view.
    pub default_zoom: u8,
    /// Padding applied when fitting the viewport to site bounds.
    pub fit_padding_px: u32,
    /// Attach retries allowed after a transient surface conflict.
    pub attach_retry_budget: u32,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            default_center: LatLng::new(0.0, 0.0),
            default_zoom: 2,
            fit_padding_px: 50,
            attach_retry_budget: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub db_path: PathBuf,
    pub log_level: String,
    /// Absolute directory for rolling logs; `None` leaves logging off.
    pub log_dir: Option<PathBuf>,
    pub map: MapConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_FILE_NAME),
            log_level: crate::logging::default_log_level().to_string(),
            log_dir: None,
            map: MapConfig::default(),
        }
    }
}

impl CoreConfig {
    /// Parses JSON config text; absent fields keep their defaults.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(text).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `GEOSITE_*` environment overrides on top of `self`.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary key lookup.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_blank = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(value) = non_blank(ENV_DB_PATH) {
            self.db_path = PathBuf::from(value.trim());
        }
        if let Some(value) = non_blank(ENV_LOG_LEVEL) {
            self.log_level = value.trim().to_string();
        }
        if let Some(value) = non_blank(ENV_LOG_DIR) {
            self.log_dir = Some(PathBuf::from(value.trim()));
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.map.default_zoom > MAX_ZOOM {
            return Err(ConfigError::ZoomOutOfRange(self.map.default_zoom));
        }
        if self.map.attach_retry_budget == 0 {
            return Err(ConfigError::ZeroRetryBudget);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, CoreConfig, ENV_DB_PATH, ENV_LOG_DIR};
    use std::path::PathBuf;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = CoreConfig::from_json_str(r#"{"map": {"fit_padding_px": 24}}"#).unwrap();
        assert_eq!(config.map.fit_padding_px, 24);
        assert_eq!(config.map.default_zoom, 2);
        assert_eq!(config.map.attach_retry_budget, 2);
    }

    #[test]
    fn rejects_zero_retry_budget() {
        let err = CoreConfig::from_json_str(r#"{"map": {"attach_retry_budget": 0}}"#).unwrap_err();
        assert_eq!(err, ConfigError::ZeroRetryBudget);
    }

    #[test]
    fn rejects_zoom_beyond_tile_range() {
        let err = CoreConfig::from_json_str(r#"{"map": {"default_zoom": 30}}"#).unwrap_err();
        assert_eq!(err, ConfigError::ZoomOutOfRange(30));
    }

    #[test]
    fn overrides_ignore_blank_values() {
        let config = CoreConfig::default().with_overrides(|key| match key {
            ENV_DB_PATH => Some(" /tmp/sites.db ".to_string()),
            ENV_LOG_DIR => Some("   ".to_string()),
            _ => None,
        });
        assert_eq!(config.db_path, PathBuf::from("/tmp/sites.db"));
        assert!(config.log_dir.is_none());
    }
}
