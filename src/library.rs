//! Library refresh capability and refresh-policy gating
//!
//! Downloaded archives land in a reading library (Komga/Kavita style); the
//! library has to be told to rescan. Which chapter completions actually
//! trigger a rescan is a policy decision evaluated here, behind a shared
//! minimum-interval guard so a burst of finished chapters cannot hammer the
//! library service.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::RefreshPolicy;
use crate::model::LibraryId;

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("library refresh failed: {0}")]
    Failed(String),

    #[error("library refresh cancelled")]
    Cancelled,
}

/// Downstream service that rescans a library for new files.
#[async_trait]
pub trait LibraryRefresher: Send + Sync {
    async fn refresh(
        &self,
        library: LibraryId,
        cancel: &CancellationToken,
    ) -> Result<(), RefreshError>;
}

/// Default refresher for setups without a downstream library service; the
/// rescan request is logged and dropped.
pub struct NullRefresher;

#[async_trait]
impl LibraryRefresher for NullRefresher {
    async fn refresh(
        &self,
        library: LibraryId,
        _cancel: &CancellationToken,
    ) -> Result<(), RefreshError> {
        debug!(%library, "no refresher configured, rescan request dropped");
        Ok(())
    }
}

/// Inputs for one refresh decision, gathered by the refresh worker after a
/// chapter finished downloading.
#[derive(Debug, Clone, Copy)]
pub struct RefreshDecision {
    /// All chapters of the finished chapter's manga are downloaded.
    pub manga_finished: bool,
    /// No download worker remains anywhere in the system.
    pub all_downloads_finished: bool,
}

/// Tracks last-refresh times per library and applies the policy plus the
/// minimum-interval guard.
pub struct RefreshGate {
    last_refresh: Mutex<HashMap<LibraryId, DateTime<Utc>>>,
}

impl RefreshGate {
    pub fn new() -> Self {
        Self {
            last_refresh: Mutex::new(HashMap::new()),
        }
    }

    /// Decide whether a refresh should fire now, and claim the slot if so.
    ///
    /// Claiming on decision (not on completion) keeps concurrent refresh
    /// workers for the same library from both firing inside the guard
    /// window.
    pub fn should_refresh(
        &self,
        library: LibraryId,
        policy: RefreshPolicy,
        min_interval_secs: u64,
        decision: RefreshDecision,
        now: DateTime<Utc>,
    ) -> bool {
        let wanted = match policy {
            RefreshPolicy::AfterEveryChapter => true,
            RefreshPolicy::AfterMangaFinished => decision.manga_finished,
            RefreshPolicy::AfterAllFinished => decision.all_downloads_finished,
            RefreshPolicy::WhileDownloading { interval_secs } => {
                // Timer-driven: fire when the independent interval elapsed,
                // or when everything is done (final catch-up pass).
                decision.all_downloads_finished
                    || self.elapsed_since_last(library, now)
                        .map(|e| e >= Duration::seconds(interval_secs as i64))
                        .unwrap_or(true)
            }
        };
        if !wanted {
            return false;
        }

        let mut last = self.last_refresh.lock().expect("refresh gate poisoned");
        if let Some(prev) = last.get(&library) {
            if now.signed_duration_since(*prev) < Duration::seconds(min_interval_secs as i64) {
                debug!(%library, "refresh suppressed by minimum interval");
                return false;
            }
        }
        last.insert(library, now);
        true
    }

    fn elapsed_since_last(&self, library: LibraryId, now: DateTime<Utc>) -> Option<Duration> {
        self.last_refresh
            .lock()
            .expect("refresh gate poisoned")
            .get(&library)
            .map(|prev| now.signed_duration_since(*prev))
    }
}

impl Default for RefreshGate {
    fn default() -> Self {
        Self::new()
    }
}
