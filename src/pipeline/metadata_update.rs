use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::worker::{Result, Work, WorkOutcome, WorkerContext, WorkerId};

/// Periodic pass pulling fresh metadata for every tracked manga from the
/// registered providers. A provider failing for one title never aborts the
/// pass; the title is retried on the next run.
pub struct UpdateMetadata;

#[async_trait]
impl Work for UpdateMetadata {
    fn id(&self) -> WorkerId {
        WorkerId::from("update-metadata")
    }

    fn label(&self) -> String {
        "update manga metadata".to_string()
    }

    async fn run(&self, ctx: &WorkerContext, cancel: &CancellationToken) -> Result<WorkOutcome> {
        if ctx.metadata.is_empty() {
            return Ok(WorkOutcome::none());
        }

        for mut manga in ctx.store.list_manga()? {
            if cancel.is_cancelled() {
                break;
            }
            for fetcher in ctx.metadata.iter() {
                let entries = match fetcher.search_entry(&manga).await {
                    Ok(entries) => entries,
                    Err(e) => {
                        warn!(manga = %manga.title, error = %e, "metadata search failed");
                        continue;
                    }
                };
                let Some(entry) = entries.first() else {
                    continue;
                };
                match fetcher.update_metadata(entry).await {
                    Ok(update) => {
                        update.apply(&mut manga);
                        ctx.store.upsert_manga(&manga)?;
                        debug!(manga = %manga.title, provider = %entry.provider_id, "metadata updated");
                    }
                    Err(e) => {
                        warn!(manga = %manga.title, error = %e, "metadata fetch failed");
                    }
                }
            }
        }
        Ok(WorkOutcome::none())
    }
}
