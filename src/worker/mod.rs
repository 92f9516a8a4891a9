//! Worker state machine
//!
//! Every unit of background work is a [`Work`] implementation wrapped in a
//! [`WorkerHandle`]. Handles carry the lifecycle state, dependency edges,
//! an optional recurrence interval and the cancellation token. The
//! scheduler owns the handles and decides when to dispatch; the handle owns
//! the transition rules for a single run.

mod handle;

pub use handle::WorkerHandle;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::SharedConfig;
use crate::connector::{ConnectorError, ConnectorRegistry};
use crate::fetch::DownloadClient;
use crate::library::{LibraryRefresher, RefreshError, RefreshGate};
use crate::metadata::MetadataFetcher;
use crate::model::ChapterNumber;
use crate::notify::NotificationSink;
use crate::observability::Metrics;
use crate::store::{Store, StoreError};

#[derive(Debug, Error)]
pub enum WorkError {
    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Refresh(#[from] RefreshError),

    #[error(transparent)]
    Metadata(#[from] crate::metadata::MetadataError),

    #[error(transparent)]
    ChapterNumber(#[from] crate::model::ChapterNumberError),

    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("image decode error: {0}")]
    Image(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, WorkError>;

/// Lifecycle of a worker. Ordered: an ended worker sorts before a live one
/// in listings, and `Completed` is the highest state a worker can reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WorkerState {
    Failed,
    Cancelled,
    Created,
    Waiting,
    Running,
    Completed,
}

impl WorkerState {
    /// Terminal for this run. Periodic workers leave an ended state when the
    /// scheduler re-arms them.
    pub fn is_ended(self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled | Self::Completed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Created => "created",
            Self::Waiting => "waiting",
            Self::Running => "running",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Admission class. Downloads have their own, tighter concurrency ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerCategory {
    General,
    Download,
}

impl WorkerCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Download => "download",
        }
    }
}

impl fmt::Display for WorkerCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable worker identifier.
///
/// Ids are deterministic where the work has a natural key (one download
/// worker per chapter, one retrieval worker per connector link), so
/// enqueueing the same work twice collapses into the existing worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for WorkerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for WorkerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Registration request for one worker: the work itself, the workers it
/// waits on, and an optional recurrence interval.
pub struct WorkerSpec {
    pub work: Arc<dyn Work>,
    pub depends_on: Vec<WorkerId>,
    pub recurrence: Option<Duration>,
}

impl WorkerSpec {
    pub fn new(work: Arc<dyn Work>) -> Self {
        Self {
            work,
            depends_on: Vec::new(),
            recurrence: None,
        }
    }

    pub fn after(mut self, dep: WorkerId) -> Self {
        self.depends_on.push(dep);
        self
    }

    pub fn every(mut self, interval: Duration) -> Self {
        self.recurrence = Some(interval);
        self
    }
}

/// Result of one successful run: follow-up workers to enqueue.
#[derive(Default)]
pub struct WorkOutcome {
    pub spawned: Vec<WorkerSpec>,
}

impl WorkOutcome {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn spawn(spec: WorkerSpec) -> Self {
        Self {
            spawned: vec![spec],
        }
    }
}

/// Shared services handed to every run.
#[derive(Clone)]
pub struct WorkerContext {
    pub store: Store,
    pub client: Arc<DownloadClient>,
    pub connectors: Arc<ConnectorRegistry>,
    pub refresher: Arc<dyn LibraryRefresher>,
    pub refresh_gate: Arc<RefreshGate>,
    pub sinks: Arc<Vec<Arc<dyn NotificationSink>>>,
    pub metadata: Arc<Vec<Arc<dyn MetadataFetcher>>>,
    pub config: SharedConfig,
    pub metrics: Arc<Metrics>,
}

/// One unit of background work.
#[async_trait]
pub trait Work: Send + Sync {
    /// Stable identifier, deterministic where a natural key exists.
    fn id(&self) -> WorkerId;

    /// Human-readable label for listings and logs.
    fn label(&self) -> String;

    fn category(&self) -> WorkerCategory {
        WorkerCategory::General
    }

    /// Dispatch order within the download category: lower chapter numbers
    /// are admitted first.
    fn order_key(&self) -> Option<ChapterNumber> {
        None
    }

    async fn run(&self, ctx: &WorkerContext, cancel: &CancellationToken) -> Result<WorkOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_ordering() {
        assert!(WorkerState::Failed < WorkerState::Cancelled);
        assert!(WorkerState::Cancelled < WorkerState::Created);
        assert!(WorkerState::Created < WorkerState::Waiting);
        assert!(WorkerState::Waiting < WorkerState::Running);
        assert!(WorkerState::Running < WorkerState::Completed);
    }

    #[test]
    fn test_ended_states() {
        assert!(WorkerState::Failed.is_ended());
        assert!(WorkerState::Cancelled.is_ended());
        assert!(WorkerState::Completed.is_ended());
        assert!(!WorkerState::Created.is_ended());
        assert!(!WorkerState::Waiting.is_ended());
        assert!(!WorkerState::Running.is_ended());
    }

    #[test]
    fn test_worker_id_equality() {
        let a = WorkerId::from("download-chapter:abc");
        let b = WorkerId::from("download-chapter:abc".to_string());
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "download-chapter:abc");
    }
}
