//! Configuration management for ChapterBox
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use chapterbox::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Server listening on: {}", config.server.bind_addr);
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `CHAPTERBOX__<section>__<key>`
//!
//! Examples:
//! - `CHAPTERBOX__SERVER__BIND_ADDR=0.0.0.0:9000`
//! - `CHAPTERBOX__SETTINGS__MAX_CONCURRENT_DOWNLOADS=8`
//! - `CHAPTERBOX__FETCH__USER_AGENT="my-agent/1.0"`
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/chapterbox.toml`.
//! This can be overridden using the `CHAPTERBOX_CONFIG` environment variable.
//!
//! # Runtime settings
//!
//! The `[settings]` section is mutable at runtime: components hold a
//! [`SharedConfig`] and take immutable snapshots per operation; the settings
//! API swaps in a validated replacement atomically. No component reads a
//! global.

mod models;
mod sources;
mod validation;

// Re-export public types
pub use crate::humanize::ByteSize;
pub use models::{
    BrowserFallbackConfig, ChapterMatch, Config, DependencyFailurePolicy, FetchConfig,
    LibrarySeed, NotifierSeed, RefreshPolicy, ServerConfig, Settings,
};
pub use validation::{validate_settings, ValidationError};

use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// Configuration is loaded with the following priority (highest to lowest):
    /// 1. Environment variables (`CHAPTERBOX__*`)
    /// 2. TOML file (default: `config/chapterbox.toml`)
    /// 3. Default values
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file is malformed or validation
    /// fails (zero rates, quality out of range, bad naming template, ...).
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    ///
    /// Useful for testing with custom configuration files.
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}

/// Thread-safe accessor for the runtime-mutable [`Settings`] snapshot.
///
/// Readers take a cheap `Arc` snapshot and keep it for the duration of one
/// operation; writers swap in a whole validated replacement.
#[derive(Clone)]
pub struct SharedConfig {
    inner: Arc<RwLock<Arc<Settings>>>,
}

impl SharedConfig {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(settings))),
        }
    }

    /// Current immutable snapshot.
    pub fn snapshot(&self) -> Arc<Settings> {
        self.inner.read().expect("settings lock poisoned").clone()
    }

    /// Validate and atomically swap in a replacement snapshot.
    pub fn swap(&self, settings: Settings) -> Result<(), ValidationError> {
        validation::validate_settings(&settings)?;
        *self.inner.write().expect("settings lock poisoned") = Arc::new(settings);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_minimal_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[settings]
max_concurrent_downloads = 2
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        assert_eq!(config.settings.max_concurrent_downloads, 2);
    }

    #[test]
    fn test_validation_catches_bad_quality() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[settings]
image_quality = 0
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let result = Config::load_from_path(config_path);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::ValidationError(ValidationError::ImageQualityOutOfRange(0))
        ));
    }

    #[test]
    fn test_shared_config_snapshot_is_stable_across_swap() {
        let shared = SharedConfig::new(Settings::default());
        let before = shared.snapshot();

        let mut replacement = Settings::default();
        replacement.max_concurrent_downloads = 8;
        replacement.max_concurrent_workers = 32;
        shared.swap(replacement).unwrap();

        // The old snapshot is unchanged; new readers see the swap.
        assert_eq!(before.max_concurrent_downloads, 4);
        assert_eq!(shared.snapshot().max_concurrent_downloads, 8);
    }

    #[test]
    fn test_shared_config_rejects_invalid_swap() {
        let shared = SharedConfig::new(Settings::default());
        let mut bad = Settings::default();
        bad.max_concurrent_workers = 0;
        assert!(shared.swap(bad).is_err());
        assert_eq!(shared.snapshot().max_concurrent_workers, 16);
    }
}
