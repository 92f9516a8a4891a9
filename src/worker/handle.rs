use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::store::WorkerRecord;

use super::{Work, WorkerCategory, WorkerContext, WorkerId, WorkerSpec, WorkerState};

struct Inner {
    state: WorkerState,
    last_execution: Option<DateTime<Utc>>,
    cancel: CancellationToken,
}

/// Scheduler-owned cell around one [`Work`] unit.
///
/// The handle serializes state transitions behind a mutex; the scheduler
/// reads state every tick and [`execute`](WorkerHandle::execute) is the only
/// path that moves a worker through `Running`.
pub struct WorkerHandle {
    work: Arc<dyn Work>,
    depends_on: Vec<WorkerId>,
    recurrence: Option<Duration>,
    inner: Mutex<Inner>,
}

impl WorkerHandle {
    pub fn new(spec: WorkerSpec) -> Arc<Self> {
        Arc::new(Self {
            work: spec.work,
            depends_on: spec.depends_on,
            recurrence: spec.recurrence,
            inner: Mutex::new(Inner {
                state: WorkerState::Created,
                last_execution: None,
                cancel: CancellationToken::new(),
            }),
        })
    }

    pub fn id(&self) -> WorkerId {
        self.work.id()
    }

    pub fn label(&self) -> String {
        self.work.label()
    }

    pub fn category(&self) -> WorkerCategory {
        self.work.category()
    }

    pub fn order_key(&self) -> Option<crate::model::ChapterNumber> {
        self.work.order_key()
    }

    pub fn depends_on(&self) -> &[WorkerId] {
        &self.depends_on
    }

    pub fn recurrence(&self) -> Option<Duration> {
        self.recurrence
    }

    pub fn state(&self) -> WorkerState {
        self.lock().state
    }

    pub fn last_execution(&self) -> Option<DateTime<Utc>> {
        self.lock().last_execution
    }

    /// When a periodic worker next becomes eligible. `None` for one-shot
    /// workers and for periodics that have never run.
    pub fn next_execution(&self) -> Option<DateTime<Utc>> {
        let inner = self.lock();
        match (inner.last_execution, self.recurrence) {
            (Some(last), Some(interval)) => {
                Some(last + chrono::Duration::from_std(interval).unwrap_or_default())
            }
            _ => None,
        }
    }

    /// Promote a freshly registered worker into the eligible pool.
    pub fn mark_waiting(&self) {
        let mut inner = self.lock();
        if inner.state == WorkerState::Created {
            inner.state = WorkerState::Waiting;
        }
    }

    /// Whether this worker wants to run at `now`. Dependency readiness is
    /// the scheduler's call, not the handle's.
    pub fn due(&self, now: DateTime<Utc>) -> bool {
        let inner = self.lock();
        if inner.state != WorkerState::Waiting {
            return false;
        }
        match (inner.last_execution, self.recurrence) {
            (Some(last), Some(interval)) => {
                now.signed_duration_since(last).to_std().unwrap_or_default() >= interval
            }
            _ => true,
        }
    }

    /// Re-arm an ended periodic worker for its next run. A fresh token is
    /// installed since a cancelled token cannot be reset.
    pub fn re_arm(&self) {
        if self.recurrence.is_none() {
            return;
        }
        let mut inner = self.lock();
        if inner.state.is_ended() {
            inner.state = WorkerState::Waiting;
            inner.cancel = CancellationToken::new();
        }
    }

    /// Make the worker eligible immediately, reviving it if it ended.
    /// A running worker is left alone.
    pub fn start_now(&self) {
        let mut inner = self.lock();
        if inner.state == WorkerState::Running {
            return;
        }
        if inner.state.is_ended() {
            inner.cancel = CancellationToken::new();
        }
        inner.state = WorkerState::Waiting;
        inner.last_execution = None;
    }

    /// Cancel the worker. Running work observes the token at its next
    /// checkpoint; ended workers are left as they are.
    pub fn cancel(&self) {
        let mut inner = self.lock();
        if inner.state.is_ended() {
            return;
        }
        inner.state = WorkerState::Cancelled;
        inner.cancel.cancel();
    }

    /// Move a waiting worker to `Cancelled` because a dependency ended
    /// without completing.
    pub fn cancel_for_dependency(&self) {
        let mut inner = self.lock();
        if inner.state == WorkerState::Waiting || inner.state == WorkerState::Created {
            inner.state = WorkerState::Cancelled;
            inner.cancel.cancel();
        }
    }

    /// Run the work to completion, honoring cancellation and the per-worker
    /// deadline. Returns the follow-up workers the run produced.
    pub async fn execute(self: Arc<Self>, ctx: WorkerContext) -> Vec<WorkerSpec> {
        let cancel = {
            let mut inner = self.lock();
            if inner.state != WorkerState::Waiting {
                return Vec::new();
            }
            inner.state = WorkerState::Running;
            inner.cancel.clone()
        };

        let id = self.id();
        let deadline = Duration::from_secs(ctx.config.snapshot().worker_deadline_secs);
        debug!(worker = %id, "worker started");
        ctx.metrics.worker_dispatched();

        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                info!(worker = %id, "worker cancelled");
                ctx.metrics.worker_cancelled();
                self.finish(WorkerState::Cancelled);
                return Vec::new();
            }
            result = tokio::time::timeout(deadline, self.work.run(&ctx, &cancel)) => result,
        };

        match outcome {
            Ok(Ok(result)) => {
                debug!(worker = %id, spawned = result.spawned.len(), "worker completed");
                self.finish(WorkerState::Completed);
                result.spawned
            }
            Ok(Err(e)) => {
                warn!(worker = %id, error = %e, "worker failed");
                ctx.metrics.worker_failed();
                self.finish(WorkerState::Failed);
                Vec::new()
            }
            Err(_) => {
                warn!(worker = %id, ?deadline, "worker hit deadline, cancelling");
                ctx.metrics.worker_cancelled();
                // Tell the (now abandoned) work to stop touching shared state.
                cancel.cancel();
                self.finish(WorkerState::Cancelled);
                Vec::new()
            }
        }
    }

    /// Snapshot for persistence and the listing API.
    pub fn record(&self) -> WorkerRecord {
        let inner = self.lock();
        WorkerRecord {
            id: self.work.id().to_string(),
            label: self.work.label(),
            category: self.work.category().to_string(),
            state: inner.state.to_string(),
            depends_on: self.depends_on.iter().map(|d| d.to_string()).collect(),
            recurrence_ms: self.recurrence.map(|d| d.as_millis() as u64),
            last_execution: inner.last_execution,
            updated_at: Utc::now(),
        }
    }

    fn finish(&self, state: WorkerState) {
        let mut inner = self.lock();
        // A cancel that raced the final transition wins.
        if inner.state == WorkerState::Cancelled && state != WorkerState::Cancelled {
            inner.last_execution = Some(Utc::now());
            return;
        }
        inner.state = state;
        inner.last_execution = Some(Utc::now());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("worker handle poisoned")
    }
}
