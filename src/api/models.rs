//! Wire models for the control surface.
//!
//! The API is deliberately thin: worker listings mirror the scheduler's
//! persisted records, and settings updates are a partial overlay on the
//! current snapshot so clients only send the fields they change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::{ChapterMatch, DependencyFailurePolicy, RefreshPolicy, Settings};
use crate::store::WorkerRecord;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

/// One worker as shown by `GET /workers`.
#[derive(Debug, Serialize, Deserialize)]
pub struct WorkerView {
    pub id: String,
    pub label: String,
    pub category: String,
    pub state: String,
    pub depends_on: Vec<String>,
    pub recurrence_ms: Option<u64>,
    pub last_execution: Option<DateTime<Utc>>,
    pub next_execution: Option<DateTime<Utc>>,
}

impl From<WorkerRecord> for WorkerView {
    fn from(record: WorkerRecord) -> Self {
        let next_execution = record.next_execution();
        Self {
            id: record.id,
            label: record.label,
            category: record.category,
            state: record.state,
            depends_on: record.depends_on,
            recurrence_ms: record.recurrence_ms,
            last_execution: record.last_execution,
            next_execution,
        }
    }
}

/// Partial settings overlay for `PUT /settings`. Absent fields keep their
/// current value; the merged result is validated before it replaces the
/// active snapshot.
#[derive(Debug, Default, Deserialize)]
pub struct SettingsUpdate {
    pub download_dir: Option<PathBuf>,
    pub cover_cache_dir: Option<PathBuf>,
    pub max_concurrent_workers: Option<usize>,
    pub max_concurrent_downloads: Option<usize>,
    pub retrieve_interval_secs: Option<u64>,
    pub image_quality: Option<u8>,
    pub grayscale: Option<bool>,
    pub naming_template: Option<String>,
    pub chapter_match: Option<ChapterMatch>,
    pub refresh_policy: Option<RefreshPolicy>,
    pub min_refresh_interval_secs: Option<u64>,
    pub on_dependency_failure: Option<DependencyFailurePolicy>,
}

impl SettingsUpdate {
    pub fn merge_onto(self, mut current: Settings) -> Settings {
        if let Some(v) = self.download_dir {
            current.download_dir = v;
        }
        if let Some(v) = self.cover_cache_dir {
            current.cover_cache_dir = v;
        }
        if let Some(v) = self.max_concurrent_workers {
            current.max_concurrent_workers = v;
        }
        if let Some(v) = self.max_concurrent_downloads {
            current.max_concurrent_downloads = v;
        }
        if let Some(v) = self.retrieve_interval_secs {
            current.retrieve_interval_secs = v;
        }
        if let Some(v) = self.image_quality {
            current.image_quality = v;
        }
        if let Some(v) = self.grayscale {
            current.grayscale = v;
        }
        if let Some(v) = self.naming_template {
            current.naming_template = v;
        }
        if let Some(v) = self.chapter_match {
            current.chapter_match = v;
        }
        if let Some(v) = self.refresh_policy {
            current.refresh_policy = v;
        }
        if let Some(v) = self.min_refresh_interval_secs {
            current.min_refresh_interval_secs = v;
        }
        if let Some(v) = self.on_dependency_failure {
            current.on_dependency_failure = v;
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_keeps_unset_fields() {
        let update = SettingsUpdate {
            image_quality: Some(85),
            grayscale: Some(true),
            ..Default::default()
        };
        let merged = update.merge_onto(Settings::default());
        assert_eq!(merged.image_quality, 85);
        assert!(merged.grayscale);
        assert_eq!(merged.max_concurrent_workers, Settings::default().max_concurrent_workers);
    }

    #[test]
    fn test_partial_update_deserializes() {
        let update: SettingsUpdate =
            serde_json::from_str(r#"{"max_concurrent_downloads": 2}"#).unwrap();
        assert_eq!(update.max_concurrent_downloads, Some(2));
        assert!(update.naming_template.is_none());
    }
}
