//! Shared fixtures for unit tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::config::{BrowserFallbackConfig, FetchConfig, Settings, SharedConfig};
use crate::connector::ConnectorRegistry;
use crate::fetch::{BrowserFallback, DownloadClient};
use crate::library::{LibraryRefresher, RefreshError, RefreshGate};
use crate::model::LibraryId;
use crate::observability::Metrics;
use crate::ratelimit::{RateLimiter, RateLimits, DEFAULT_USER_AGENT};
use crate::store::Store;
use crate::worker::WorkerContext;

/// Refresher that only counts invocations.
#[derive(Default)]
pub struct CountingRefresher {
    pub calls: AtomicU32,
}

#[async_trait]
impl LibraryRefresher for CountingRefresher {
    async fn refresh(
        &self,
        _library: LibraryId,
        _cancel: &CancellationToken,
    ) -> Result<(), RefreshError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn context(dir: &TempDir) -> WorkerContext {
    context_with(dir, ConnectorRegistry::new())
}

pub fn context_with(dir: &TempDir, registry: ConnectorRegistry) -> WorkerContext {
    context_full(dir, registry, Settings::default(), Arc::new(CountingRefresher::default()))
}

pub fn context_full(
    dir: &TempDir,
    registry: ConnectorRegistry,
    settings: Settings,
    refresher: Arc<dyn LibraryRefresher>,
) -> WorkerContext {
    context_fetch(dir, registry, settings, refresher, FetchConfig::default())
}

pub fn context_fetch(
    dir: &TempDir,
    registry: ConnectorRegistry,
    mut settings: Settings,
    refresher: Arc<dyn LibraryRefresher>,
    fetch: FetchConfig,
) -> WorkerContext {
    // Keep all test artifacts inside the temp dir.
    settings.download_dir = dir.path().join("staging");
    settings.cover_cache_dir = dir.path().join("covers");

    let limiter = Arc::new(RateLimiter::new(&RateLimits::default(), DEFAULT_USER_AGENT).unwrap());
    let browser = Arc::new(BrowserFallback::new(BrowserFallbackConfig::default()));
    let client = Arc::new(DownloadClient::new(fetch, limiter, browser).unwrap());

    WorkerContext {
        store: Store::open(dir.path().join("store")).unwrap(),
        client,
        connectors: Arc::new(registry),
        refresher,
        refresh_gate: Arc::new(RefreshGate::new()),
        sinks: Arc::new(Vec::new()),
        metadata: Arc::new(Vec::new()),
        config: SharedConfig::new(settings),
        metrics: Arc::new(Metrics::new()),
    }
}
