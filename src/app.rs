//! Process bootstrap
//!
//! Wires configuration, store, outbound client, scheduler and the periodic
//! workers into a runnable application. `main` calls [`build`] and then
//! spawns the scheduler loop next to the API server; integration tests call
//! it with stub collaborators instead.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::state::AppState;
use crate::config::{Config, NotifierSeed, SharedConfig};
use crate::connector::ConnectorRegistry;
use crate::fetch::{BrowserFallback, DownloadClient};
use crate::library::{LibraryRefresher, NullRefresher, RefreshGate};
use crate::metadata::MetadataFetcher;
use crate::model::Library;
use crate::notify::{NotificationSink, NtfySink, SendNotifications};
use crate::observability::Metrics;
use crate::pipeline::{RetrieveChapters, UpdateMetadata};
use crate::ratelimit::{RateLimitError, RateLimiter};
use crate::scheduler::{Scheduler, SchedulerHandle};
use crate::store::{Store, StoreError};
use crate::worker::{WorkerContext, WorkerSpec};

const NOTIFY_INTERVAL: Duration = Duration::from_secs(30);
const METADATA_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

#[derive(Debug, Error)]
pub enum BootError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    RateLimit(#[from] RateLimitError),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// External integrations; defaults are inert so the service runs standalone.
pub struct Collaborators {
    pub connectors: ConnectorRegistry,
    pub refresher: Arc<dyn LibraryRefresher>,
    pub metadata: Vec<Arc<dyn MetadataFetcher>>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            connectors: ConnectorRegistry::new(),
            refresher: Arc::new(NullRefresher),
            metadata: Vec::new(),
        }
    }
}

pub struct App {
    pub state: AppState,
    pub scheduler: Scheduler,
    pub handle: SchedulerHandle,
    pub shutdown: CancellationToken,
}

/// Build the application from a validated configuration.
pub fn build(config: Config, collaborators: Collaborators) -> Result<App, BootError> {
    let store = Store::open(&config.server.fjall_path)?;
    let shared = SharedConfig::new(config.settings.clone());
    let metrics = Arc::new(Metrics::new());

    let limiter = Arc::new(RateLimiter::new(&config.rates, &config.fetch.user_agent)?);
    let browser = Arc::new(BrowserFallback::new(config.fetch.browser.clone()));
    let client = Arc::new(DownloadClient::new(config.fetch.clone(), limiter, browser)?);

    seed_libraries(&store, &config)?;
    clear_stale_worker_records(&store)?;

    let ctx = WorkerContext {
        store: store.clone(),
        client,
        connectors: Arc::new(collaborators.connectors),
        refresher: collaborators.refresher,
        refresh_gate: Arc::new(RefreshGate::new()),
        sinks: Arc::new(build_sinks(&config)),
        metadata: Arc::new(collaborators.metadata),
        config: shared.clone(),
        metrics: metrics.clone(),
    };

    let shutdown = CancellationToken::new();
    let (mut scheduler, handle) = Scheduler::new(ctx, shutdown.clone());
    seed_periodic_workers(&mut scheduler, &store, &config)?;

    let state = AppState::new(handle.clone(), shared, store, metrics);
    Ok(App {
        state,
        scheduler,
        handle,
        shutdown,
    })
}

fn build_sinks(config: &Config) -> Vec<Arc<dyn NotificationSink>> {
    config
        .notifiers
        .iter()
        .map(|seed| match seed {
            NotifierSeed::Ntfy {
                endpoint,
                topic,
                token,
            } => Arc::new(NtfySink::new(
                endpoint.clone(),
                topic.clone(),
                token.clone(),
            )) as Arc<dyn NotificationSink>,
        })
        .collect()
}

/// Ensure every configured library exists in the store, keyed by name.
fn seed_libraries(store: &Store, config: &Config) -> Result<(), StoreError> {
    for seed in &config.libraries {
        if store.find_library_by_name(&seed.name)?.is_some() {
            continue;
        }
        let library = Library {
            id: crate::model::LibraryId::new(),
            name: seed.name.clone(),
            root: seed.root.clone(),
        };
        info!(library = %library.name, root = %library.root.display(), "library seeded");
        store.upsert_library(&library)?;
    }
    Ok(())
}

/// Worker records only mirror the live scheduler; whatever an earlier
/// process left behind is rebuilt from the domain tables below.
fn clear_stale_worker_records(store: &Store) -> Result<(), StoreError> {
    let stale = store.list_worker_records()?;
    if !stale.is_empty() {
        warn!(count = stale.len(), "clearing worker records from previous run");
    }
    for record in stale {
        store.delete_worker_record(&record.id)?;
    }
    Ok(())
}

/// Register the periodic workers: one chapter-retrieval worker per
/// downloadable manga link, the notification drain and the metadata pass.
fn seed_periodic_workers(
    scheduler: &mut Scheduler,
    store: &Store,
    config: &Config,
) -> Result<(), StoreError> {
    let retrieve_interval = Duration::from_secs(config.settings.retrieve_interval_secs);
    for manga in store.list_manga()? {
        for link in store.manga_links(manga.id)? {
            if !link.use_for_download {
                continue;
            }
            scheduler.register(
                WorkerSpec::new(Arc::new(RetrieveChapters::new(
                    manga.id,
                    link.connector_id.clone(),
                    manga.title.clone(),
                )))
                .every(retrieve_interval),
            );
        }
    }

    scheduler.register(WorkerSpec::new(Arc::new(SendNotifications)).every(NOTIFY_INTERVAL));
    scheduler.register(WorkerSpec::new(Arc::new(UpdateMetadata)).every(METADATA_INTERVAL));
    Ok(())
}
