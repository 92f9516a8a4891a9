use super::models::{ChapterMatch, Config, Settings};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("image_quality must be within 1..=100, got {0}")]
    ImageQualityOutOfRange(u8),

    #[error("max_concurrent_workers must be at least 1")]
    ZeroWorkerCeiling,

    #[error("max_concurrent_downloads must be at least 1")]
    ZeroDownloadCeiling,

    #[error("max_concurrent_downloads ({downloads}) exceeds max_concurrent_workers ({workers})")]
    DownloadCeilingAboveWorkerCeiling { downloads: usize, workers: usize },

    #[error("naming_template must contain the {{chapter}} placeholder: {0:?}")]
    TemplateMissingChapter(String),

    #[error("fuzzy match threshold must be positive, got {0}")]
    NonPositiveFuzzyThreshold(i64),

    #[error("tick_ms must be at least 100, got {0}")]
    TickTooShort(u64),

    #[error("browser max_pages must be at least 1")]
    ZeroBrowserPages,

    #[error("library {0:?} has an empty root path")]
    EmptyLibraryRoot(String),
}

/// Validate the full configuration after loading.
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_settings(&config.settings)?;

    if config.fetch.browser.enabled && config.fetch.browser.max_pages == 0 {
        return Err(ValidationError::ZeroBrowserPages);
    }

    for lib in &config.libraries {
        if lib.root.as_os_str().is_empty() {
            return Err(ValidationError::EmptyLibraryRoot(lib.name.clone()));
        }
    }

    Ok(())
}

/// Validate the runtime-mutable section alone; also used by the settings API
/// before swapping in a new snapshot.
pub fn validate_settings(settings: &Settings) -> Result<(), ValidationError> {
    if settings.image_quality == 0 || settings.image_quality > 100 {
        return Err(ValidationError::ImageQualityOutOfRange(settings.image_quality));
    }
    if settings.max_concurrent_workers == 0 {
        return Err(ValidationError::ZeroWorkerCeiling);
    }
    if settings.max_concurrent_downloads == 0 {
        return Err(ValidationError::ZeroDownloadCeiling);
    }
    if settings.max_concurrent_downloads > settings.max_concurrent_workers {
        return Err(ValidationError::DownloadCeilingAboveWorkerCeiling {
            downloads: settings.max_concurrent_downloads,
            workers: settings.max_concurrent_workers,
        });
    }
    if !settings.naming_template.contains("{chapter}") {
        return Err(ValidationError::TemplateMissingChapter(
            settings.naming_template.clone(),
        ));
    }
    if let ChapterMatch::Fuzzy { threshold } = settings.chapter_match {
        if threshold <= 0 {
            return Err(ValidationError::NonPositiveFuzzyThreshold(threshold));
        }
    }
    if settings.tick_ms < 100 {
        return Err(ValidationError::TickTooShort(settings.tick_ms));
    }
    Ok(())
}
