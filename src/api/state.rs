use std::sync::Arc;

use crate::config::SharedConfig;
use crate::observability::Metrics;
use crate::scheduler::SchedulerHandle;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub scheduler: SchedulerHandle,
    pub config: SharedConfig,
    pub store: Store,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(
        scheduler: SchedulerHandle,
        config: SharedConfig,
        store: Store,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            scheduler,
            config,
            store,
            metrics,
        }
    }
}
