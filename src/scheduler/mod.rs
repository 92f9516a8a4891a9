//! Dispatch loop
//!
//! The scheduler owns every [`WorkerHandle`] and runs a fixed-interval tick:
//! finished runs are drained, ended periodic workers are re-armed, eligible
//! workers are admitted under the per-category concurrency ceilings and
//! dispatched onto the runtime, and the surviving set is mirrored into the
//! store. Control-plane commands (list, start-now, cancel, delete, enqueue)
//! arrive over an mpsc channel and are applied between ticks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::store::WorkerRecord;
use crate::worker::{
    WorkerCategory, WorkerContext, WorkerHandle, WorkerId, WorkerSpec, WorkerState,
};
use crate::config::DependencyFailurePolicy;

/// Control-plane commands accepted between ticks.
pub enum SchedulerCommand {
    List(oneshot::Sender<Vec<WorkerRecord>>),
    StartNow(WorkerId, oneshot::Sender<bool>),
    Cancel(WorkerId, oneshot::Sender<bool>),
    Delete(WorkerId, oneshot::Sender<bool>),
    Enqueue(WorkerSpec),
}

/// Cloneable front door to the scheduler loop.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    pub async fn list(&self) -> Vec<WorkerRecord> {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(SchedulerCommand::List(tx)).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn start_now(&self, id: WorkerId) -> bool {
        self.roundtrip(|tx| SchedulerCommand::StartNow(id, tx)).await
    }

    pub async fn cancel(&self, id: WorkerId) -> bool {
        self.roundtrip(|tx| SchedulerCommand::Cancel(id, tx)).await
    }

    pub async fn delete(&self, id: WorkerId) -> bool {
        self.roundtrip(|tx| SchedulerCommand::Delete(id, tx)).await
    }

    pub async fn enqueue(&self, spec: WorkerSpec) {
        let _ = self.tx.send(SchedulerCommand::Enqueue(spec)).await;
    }

    async fn roundtrip<F>(&self, make: F) -> bool
    where
        F: FnOnce(oneshot::Sender<bool>) -> SchedulerCommand,
    {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(make(tx)).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }
}

pub struct Scheduler {
    ctx: WorkerContext,
    shutdown: CancellationToken,
    workers: HashMap<WorkerId, Arc<WorkerHandle>>,
    // Last (state, last_execution) written per worker; records are only
    // re-persisted when this fingerprint moves.
    mirrored: HashMap<WorkerId, (String, Option<chrono::DateTime<chrono::Utc>>)>,
    commands: mpsc::Receiver<SchedulerCommand>,
    results_tx: mpsc::Sender<(WorkerId, Vec<WorkerSpec>)>,
    results_rx: mpsc::Receiver<(WorkerId, Vec<WorkerSpec>)>,
}

impl Scheduler {
    /// Build the scheduler and its handle. Call [`run`](Self::run) (usually
    /// inside `tokio::spawn`) to start the loop.
    pub fn new(ctx: WorkerContext, shutdown: CancellationToken) -> (Self, SchedulerHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let (results_tx, results_rx) = mpsc::channel(256);
        let scheduler = Self {
            ctx,
            shutdown,
            workers: HashMap::new(),
            mirrored: HashMap::new(),
            commands: cmd_rx,
            results_tx,
            results_rx,
        };
        (scheduler, SchedulerHandle { tx: cmd_tx })
    }

    /// Register a worker before or during the loop. Enqueueing an id that is
    /// still live is a no-op; an ended worker with the same id is replaced.
    pub fn register(&mut self, spec: WorkerSpec) {
        let id = spec.work.id();
        if let Some(existing) = self.workers.get(&id) {
            if !existing.state().is_ended() {
                debug!(worker = %id, "already enqueued, skipping");
                return;
            }
        }
        debug!(worker = %id, "worker registered");
        self.workers.insert(id, WorkerHandle::new(spec));
    }

    /// Number of registered workers, live or ended.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub async fn run(mut self) {
        let tick = Duration::from_millis(self.ctx.config.snapshot().tick_ms);
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(?tick, "scheduler started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = interval.tick() => self.tick(),
                Some(cmd) = self.commands.recv() => self.handle_command(cmd),
                Some((id, spawned)) = self.results_rx.recv() => {
                    for spec in spawned {
                        self.register(spec);
                    }
                    debug!(worker = %id, "run result drained");
                }
            }
        }

        // Ask running workers to stop, then mirror final states.
        for handle in self.workers.values() {
            if handle.state() == WorkerState::Running {
                handle.cancel();
            }
        }
        self.persist();
        info!("scheduler stopped");
    }

    /// One scheduling pass: sweep, admit, dispatch, persist.
    fn tick(&mut self) {
        let now = chrono::Utc::now();
        let settings = self.ctx.config.snapshot();

        self.sweep(settings.on_dependency_failure, now);
        let admitted = self.admit(
            settings.max_concurrent_workers,
            settings.max_concurrent_downloads,
            now,
        );
        for handle in admitted {
            self.dispatch(handle);
        }
        self.persist();
    }

    fn sweep(&mut self, policy: DependencyFailurePolicy, now: chrono::DateTime<chrono::Utc>) {
        let mut dep_failed: Vec<WorkerId> = Vec::new();

        for (id, handle) in &self.workers {
            handle.mark_waiting();

            if handle.recurrence().is_some() {
                if let Some(next) = handle.next_execution() {
                    if handle.state().is_ended() && next <= now {
                        handle.re_arm();
                    }
                }
            }

            if policy == DependencyFailurePolicy::Cancel
                && !handle.state().is_ended()
                && self.any_dependency_ended_unfinished(handle)
            {
                dep_failed.push(id.clone());
            }
        }

        for id in dep_failed {
            if let Some(handle) = self.workers.get(&id) {
                warn!(worker = %id, "cancelled, dependency did not complete");
                handle.cancel_for_dependency();
            }
        }

        self.prune();
    }

    /// A dependency that is gone from the set counts as satisfied; only a
    /// present, ended-but-not-completed dependency poisons the dependent.
    fn any_dependency_ended_unfinished(&self, handle: &WorkerHandle) -> bool {
        handle.depends_on().iter().any(|dep| {
            self.workers
                .get(dep)
                .map(|d| matches!(d.state(), WorkerState::Failed | WorkerState::Cancelled))
                .unwrap_or(false)
        })
    }

    fn dependencies_completed(&self, handle: &WorkerHandle) -> bool {
        handle.depends_on().iter().all(|dep| {
            self.workers
                .get(dep)
                .map(|d| d.state() == WorkerState::Completed)
                .unwrap_or(true)
        })
    }

    /// Drop completed one-shot workers nobody depends on anymore. Failed
    /// and cancelled entries stay in the set so they keep showing up in
    /// listings and can be restarted, until an explicit delete removes them.
    fn prune(&mut self) {
        let removable: Vec<WorkerId> = self
            .workers
            .iter()
            .filter(|(id, handle)| {
                handle.recurrence().is_none()
                    && handle.state() == WorkerState::Completed
                    && !self.has_live_dependent(id)
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in removable {
            debug!(worker = %id, "pruned");
            self.workers.remove(&id);
            if let Err(e) = self.ctx.store.delete_worker_record(id.as_str()) {
                warn!(worker = %id, error = %e, "failed to drop worker record");
            }
        }
    }

    fn has_live_dependent(&self, id: &WorkerId) -> bool {
        self.workers.values().any(|w| {
            !w.state().is_ended() && w.depends_on().iter().any(|dep| dep == id)
        })
    }

    /// Pick the workers to dispatch this tick. Downloads are admitted in
    /// chapter order under their own ceiling; everything else first come,
    /// first served under the global ceiling.
    fn admit(
        &self,
        max_workers: usize,
        max_downloads: usize,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Vec<Arc<WorkerHandle>> {
        let mut running_total = 0usize;
        let mut running_downloads = 0usize;
        for handle in self.workers.values() {
            if handle.state() == WorkerState::Running {
                running_total += 1;
                if handle.category() == WorkerCategory::Download {
                    running_downloads += 1;
                }
            }
        }

        let mut eligible: Vec<&Arc<WorkerHandle>> = self
            .workers
            .values()
            .filter(|h| h.due(now) && self.dependencies_completed(h))
            .collect();
        // Chapter order first, stable on id so admission is deterministic.
        eligible.sort_by(|a, b| {
            a.order_key()
                .cmp(&b.order_key())
                .then_with(|| a.id().cmp(&b.id()))
        });

        let mut admitted = Vec::new();
        for handle in eligible {
            if running_total >= max_workers {
                break;
            }
            if handle.category() == WorkerCategory::Download {
                if running_downloads >= max_downloads {
                    continue;
                }
                running_downloads += 1;
            }
            running_total += 1;
            admitted.push(Arc::clone(handle));
        }
        admitted
    }

    fn dispatch(&self, handle: Arc<WorkerHandle>) {
        let id = handle.id();
        let ctx = self.ctx.clone();
        let results = self.results_tx.clone();
        tokio::spawn(async move {
            let spawned = handle.execute(ctx).await;
            let _ = results.send((id, spawned)).await;
        });
    }

    /// Mirror changed worker records into the store. The fjall sync is
    /// blocking, so it only happens on ticks that actually wrote something.
    fn persist(&mut self) {
        let mut dirty = false;
        for (id, handle) in &self.workers {
            let record = handle.record();
            let fingerprint = (record.state.clone(), record.last_execution);
            if self.mirrored.get(id) == Some(&fingerprint) {
                continue;
            }
            match self.ctx.store.upsert_worker_record(&record) {
                Ok(()) => {
                    self.mirrored.insert(id.clone(), fingerprint);
                    dirty = true;
                }
                Err(e) => {
                    error!(worker = %id, error = %e, "failed to persist worker record");
                }
            }
        }
        self.mirrored.retain(|id, _| self.workers.contains_key(id));
        if dirty {
            if let Err(e) = self.ctx.store.persist() {
                error!(error = %e, "failed to flush store");
            }
        }
    }

    fn handle_command(&mut self, cmd: SchedulerCommand) {
        match cmd {
            SchedulerCommand::List(reply) => {
                let mut records: Vec<WorkerRecord> =
                    self.workers.values().map(|h| h.record()).collect();
                records.sort_by(|a, b| a.id.cmp(&b.id));
                let _ = reply.send(records);
            }
            SchedulerCommand::StartNow(id, reply) => {
                let found = self.workers.get(&id).map(|h| h.start_now()).is_some();
                if found {
                    info!(worker = %id, "manual start requested");
                }
                let _ = reply.send(found);
            }
            SchedulerCommand::Cancel(id, reply) => {
                let found = self.workers.get(&id).map(|h| h.cancel()).is_some();
                if found {
                    info!(worker = %id, "cancel requested");
                }
                let _ = reply.send(found);
            }
            SchedulerCommand::Delete(id, reply) => {
                let found = self.workers.remove(&id).is_some();
                if found {
                    info!(worker = %id, "worker deleted");
                    if let Err(e) = self.ctx.store.delete_worker_record(id.as_str()) {
                        warn!(worker = %id, error = %e, "failed to drop worker record");
                    }
                }
                let _ = reply.send(found);
            }
            SchedulerCommand::Enqueue(spec) => self.register(spec),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::{Work, WorkError, WorkOutcome};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    use crate::config::{SharedConfig, Settings};
    use crate::connector::ConnectorRegistry;
    use crate::fetch::{BrowserFallback, DownloadClient};
    use crate::library::{LibraryRefresher, RefreshError, RefreshGate};
    use crate::model::{ChapterNumber, LibraryId};
    use crate::observability::Metrics;
    use crate::ratelimit::{RateLimiter, RateLimits, DEFAULT_USER_AGENT};
    use crate::store::Store;

    struct NoopRefresher;

    #[async_trait]
    impl LibraryRefresher for NoopRefresher {
        async fn refresh(
            &self,
            _library: LibraryId,
            _cancel: &CancellationToken,
        ) -> Result<(), RefreshError> {
            Ok(())
        }
    }

    fn test_context(dir: &TempDir, settings: Settings) -> WorkerContext {
        let limits = RateLimits::default();
        let limiter = Arc::new(RateLimiter::new(&limits, DEFAULT_USER_AGENT).unwrap());
        let browser = Arc::new(BrowserFallback::new(
            crate::config::BrowserFallbackConfig::default(),
        ));
        let client = Arc::new(
            DownloadClient::new(crate::config::FetchConfig::default(), limiter, browser).unwrap(),
        );
        WorkerContext {
            store: Store::open(dir.path()).unwrap(),
            client,
            connectors: Arc::new(ConnectorRegistry::new()),
            refresher: Arc::new(NoopRefresher),
            refresh_gate: Arc::new(RefreshGate::new()),
            sinks: Arc::new(Vec::new()),
            metadata: Arc::new(Vec::new()),
            config: SharedConfig::new(settings),
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Records the order runs happen in, shared across work instances.
    struct OrderedWork {
        id: String,
        order: Option<ChapterNumber>,
        category: WorkerCategory,
        log: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl OrderedWork {
        fn new(id: &str, log: Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                id: id.to_string(),
                order: None,
                category: WorkerCategory::General,
                log,
                fail: false,
            }
        }
    }

    #[async_trait]
    impl Work for OrderedWork {
        fn id(&self) -> WorkerId {
            WorkerId::from(self.id.as_str())
        }

        fn label(&self) -> String {
            self.id.clone()
        }

        fn category(&self) -> WorkerCategory {
            self.category
        }

        fn order_key(&self) -> Option<ChapterNumber> {
            self.order.clone()
        }

        async fn run(
            &self,
            _ctx: &WorkerContext,
            _cancel: &CancellationToken,
        ) -> crate::worker::Result<WorkOutcome> {
            self.log.lock().unwrap().push(self.id.clone());
            if self.fail {
                return Err(WorkError::Other("boom".into()));
            }
            Ok(WorkOutcome::none())
        }
    }

    fn drain_results(s: &mut Scheduler) {
        while let Ok((_, spawned)) = s.results_rx.try_recv() {
            for spec in spawned {
                s.register(spec);
            }
        }
    }

    async fn settle(s: &mut Scheduler, rounds: usize) {
        for _ in 0..rounds {
            s.tick();
            tokio::time::sleep(Duration::from_millis(20)).await;
            drain_results(s);
        }
    }

    #[tokio::test]
    async fn test_dependency_chain_runs_in_order() {
        let dir = TempDir::new().unwrap();
        let (mut s, _handle) = Scheduler::new(
            test_context(&dir, Settings::default()),
            CancellationToken::new(),
        );
        let log = Arc::new(Mutex::new(Vec::new()));

        let a = WorkerSpec::new(Arc::new(OrderedWork::new("a", log.clone())));
        let b = WorkerSpec::new(Arc::new(OrderedWork::new("b", log.clone())))
            .after(WorkerId::from("a"));
        let c = WorkerSpec::new(Arc::new(OrderedWork::new("c", log.clone())))
            .after(WorkerId::from("b"));
        // Registration order must not matter.
        s.register(c);
        s.register(a);
        s.register(b);

        settle(&mut s, 5).await;
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_failed_dependency_cancels_dependents() {
        let dir = TempDir::new().unwrap();
        let (mut s, _handle) = Scheduler::new(
            test_context(&dir, Settings::default()),
            CancellationToken::new(),
        );
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut failing = OrderedWork::new("a", log.clone());
        failing.fail = true;
        s.register(WorkerSpec::new(Arc::new(failing)));
        s.register(
            WorkerSpec::new(Arc::new(OrderedWork::new("b", log.clone())))
                .after(WorkerId::from("a")),
        );

        settle(&mut s, 4).await;
        assert_eq!(*log.lock().unwrap(), vec!["a"]);
        // Neither ran to completion, so neither gets pruned.
        let a = s.workers.get(&WorkerId::from("a")).unwrap();
        assert_eq!(a.state(), WorkerState::Failed);
        let b = s.workers.get(&WorkerId::from("b")).unwrap();
        assert_eq!(b.state(), WorkerState::Cancelled);
    }

    #[tokio::test]
    async fn test_failed_one_shot_stays_listed_until_deleted() {
        let dir = TempDir::new().unwrap();
        let (mut s, _handle) = Scheduler::new(
            test_context(&dir, Settings::default()),
            CancellationToken::new(),
        );
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut failing = OrderedWork::new("doomed", log.clone());
        failing.fail = true;
        s.register(WorkerSpec::new(Arc::new(failing)));

        settle(&mut s, 2).await;
        let id = WorkerId::from("doomed");
        assert_eq!(s.workers.get(&id).unwrap().state(), WorkerState::Failed);

        // Further ticks must not drop the failed entry.
        settle(&mut s, 2).await;
        assert!(s.workers.contains_key(&id));

        // A manual start revives it for another attempt.
        s.workers.get(&id).unwrap().start_now();
        settle(&mut s, 2).await;
        assert_eq!(*log.lock().unwrap(), vec!["doomed", "doomed"]);
        assert_eq!(s.workers.get(&id).unwrap().state(), WorkerState::Failed);

        // Only an explicit delete removes it.
        let (tx, rx) = oneshot::channel();
        s.handle_command(SchedulerCommand::Delete(id.clone(), tx));
        assert!(rx.await.unwrap());
        assert!(!s.workers.contains_key(&id));
    }

    #[tokio::test]
    async fn test_completed_one_shot_is_pruned() {
        let dir = TempDir::new().unwrap();
        let (mut s, _handle) = Scheduler::new(
            test_context(&dir, Settings::default()),
            CancellationToken::new(),
        );
        let log = Arc::new(Mutex::new(Vec::new()));
        s.register(WorkerSpec::new(Arc::new(OrderedWork::new("once", log.clone()))));

        settle(&mut s, 3).await;
        assert_eq!(*log.lock().unwrap(), vec!["once"]);
        assert!(s.workers.is_empty());
    }

    #[tokio::test]
    async fn test_unchanged_records_are_not_rewritten() {
        let dir = TempDir::new().unwrap();
        let (mut s, _handle) = Scheduler::new(
            test_context(&dir, Settings::default()),
            CancellationToken::new(),
        );
        let log = Arc::new(Mutex::new(Vec::new()));
        s.register(
            WorkerSpec::new(Arc::new(OrderedWork::new("p", log.clone())))
                .every(Duration::from_secs(3600)),
        );

        settle(&mut s, 3).await;
        let before = s.ctx.store.list_worker_records().unwrap();
        assert_eq!(before.len(), 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        s.tick();
        let after = s.ctx.store.list_worker_records().unwrap();
        assert_eq!(before[0].updated_at, after[0].updated_at);
    }

    #[tokio::test]
    async fn test_blocked_dependent_stays_waiting_under_block_policy() {
        let dir = TempDir::new().unwrap();
        let mut settings = Settings::default();
        settings.on_dependency_failure = DependencyFailurePolicy::Block;
        let (mut s, _handle) =
            Scheduler::new(test_context(&dir, settings), CancellationToken::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut failing = OrderedWork::new("a", log.clone());
        failing.fail = true;
        s.register(WorkerSpec::new(Arc::new(failing)));
        s.register(
            WorkerSpec::new(Arc::new(OrderedWork::new("b", log.clone())))
                .after(WorkerId::from("a")),
        );

        settle(&mut s, 4).await;
        assert_eq!(*log.lock().unwrap(), vec!["a"]);
        let b = s.workers.get(&WorkerId::from("b")).unwrap();
        assert_eq!(b.state(), WorkerState::Waiting);
    }

    #[tokio::test]
    async fn test_downloads_admitted_in_chapter_order() {
        let dir = TempDir::new().unwrap();
        let mut settings = Settings::default();
        settings.max_concurrent_downloads = 1;
        let (mut s, _handle) =
            Scheduler::new(test_context(&dir, settings), CancellationToken::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        for (id, number) in [("ch-b", "10.10"), ("ch-a", "10.2"), ("ch-c", "12")] {
            let mut work = OrderedWork::new(id, log.clone());
            work.category = WorkerCategory::Download;
            work.order = Some(number.parse().unwrap());
            s.register(WorkerSpec::new(Arc::new(work)));
        }

        settle(&mut s, 6).await;
        assert_eq!(*log.lock().unwrap(), vec!["ch-a", "ch-b", "ch-c"]);
    }

    #[tokio::test]
    async fn test_periodic_worker_rearms() {
        let dir = TempDir::new().unwrap();
        let (mut s, _handle) = Scheduler::new(
            test_context(&dir, Settings::default()),
            CancellationToken::new(),
        );
        let log = Arc::new(Mutex::new(Vec::new()));
        s.register(
            WorkerSpec::new(Arc::new(OrderedWork::new("p", log.clone())))
                .every(Duration::from_millis(50)),
        );

        settle(&mut s, 2).await;
        assert_eq!(log.lock().unwrap().len(), 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        settle(&mut s, 2).await;
        assert!(log.lock().unwrap().len() >= 2);
        // Periodic workers survive pruning.
        assert!(s.workers.contains_key(&WorkerId::from("p")));
    }

    #[tokio::test]
    async fn test_enqueue_dedupes_live_workers() {
        let dir = TempDir::new().unwrap();
        let (mut s, _handle) = Scheduler::new(
            test_context(&dir, Settings::default()),
            CancellationToken::new(),
        );
        let log = Arc::new(Mutex::new(Vec::new()));
        s.register(WorkerSpec::new(Arc::new(OrderedWork::new("dup", log.clone()))));
        s.register(WorkerSpec::new(Arc::new(OrderedWork::new("dup", log.clone()))));
        assert_eq!(s.workers.len(), 1);
    }
}
