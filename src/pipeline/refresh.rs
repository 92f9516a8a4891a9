use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::library::RefreshDecision;
use crate::model::{Chapter, ChapterId, Manga, MangaId};
use crate::worker::{Result, Work, WorkOutcome, WorkerContext, WorkerId, WorkerState};

/// Tail of the download chain: evaluates the refresh policy for the
/// chapter's library and delegates to the [`LibraryRefresher`] when the
/// policy and the minimum-interval guard both agree.
///
/// [`LibraryRefresher`]: crate::library::LibraryRefresher
pub struct RefreshLibrary {
    manga_id: MangaId,
    chapter_id: ChapterId,
    manga_title: String,
}

impl RefreshLibrary {
    pub fn new(manga: &Manga, chapter: &Chapter) -> Self {
        Self {
            manga_id: manga.id,
            chapter_id: chapter.id,
            manga_title: manga.title.clone(),
        }
    }
}

#[async_trait]
impl Work for RefreshLibrary {
    fn id(&self) -> WorkerId {
        WorkerId::from(format!("refresh:{}", self.chapter_id))
    }

    fn label(&self) -> String {
        format!("refresh library of {}", self.manga_title)
    }

    async fn run(&self, ctx: &WorkerContext, cancel: &CancellationToken) -> Result<WorkOutcome> {
        let Some(manga) = ctx.store.get_manga(self.manga_id)? else {
            return Ok(WorkOutcome::none());
        };
        let Some(library_id) = manga.library_id else {
            return Ok(WorkOutcome::none());
        };

        let decision = RefreshDecision {
            manga_finished: ctx.store.pending_downloads(self.manga_id)?.is_empty(),
            all_downloads_finished: !self.downloads_in_flight(ctx)?,
        };

        let settings = ctx.config.snapshot();
        let fire = ctx.refresh_gate.should_refresh(
            library_id,
            settings.refresh_policy,
            settings.min_refresh_interval_secs,
            decision,
            Utc::now(),
        );
        if !fire {
            debug!(manga = %self.manga_title, ?decision, "refresh not due");
            return Ok(WorkOutcome::none());
        }

        ctx.refresher.refresh(library_id, cancel).await?;
        ctx.metrics.library_refreshed();
        info!(manga = %self.manga_title, "library refreshed");
        Ok(WorkOutcome::none())
    }
}

impl RefreshLibrary {
    /// Whether any download worker is still live, judged from the persisted
    /// worker mirror the scheduler maintains every tick.
    fn downloads_in_flight(&self, ctx: &WorkerContext) -> Result<bool> {
        let live = [
            WorkerState::Created.as_str(),
            WorkerState::Waiting.as_str(),
            WorkerState::Running.as_str(),
        ];
        Ok(ctx.store.list_worker_records()?.into_iter().any(|r| {
            r.category == "download" && live.contains(&r.state.as_str())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RefreshPolicy, Settings};
    use crate::connector::ConnectorRegistry;
    use crate::model::{Library, LibraryId};
    use crate::test_support::CountingRefresher;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn seed(ctx: &WorkerContext) -> (Manga, Chapter) {
        let library = Library {
            id: LibraryId::new(),
            name: "main".to_string(),
            root: std::path::PathBuf::from("/tmp/lib"),
        };
        ctx.store.upsert_library(&library).unwrap();

        let mut manga = Manga::new("Alpha");
        manga.library_id = Some(library.id);
        manga.download = true;
        ctx.store.upsert_manga(&manga).unwrap();

        let chapter = Chapter {
            id: ChapterId::new(),
            manga_id: manga.id,
            number: "1".parse().unwrap(),
            volume: None,
            title: None,
            file_name: "a.cbz".to_string(),
            downloaded: true,
        };
        ctx.store.upsert_chapter(&chapter).unwrap();
        (manga, chapter)
    }

    #[tokio::test]
    async fn test_refresh_fires_after_every_chapter() {
        let dir = TempDir::new().unwrap();
        let refresher = Arc::new(CountingRefresher::default());
        let mut settings = Settings::default();
        settings.refresh_policy = RefreshPolicy::AfterEveryChapter;
        let ctx = crate::test_support::context_full(
            &dir,
            ConnectorRegistry::new(),
            settings,
            refresher.clone(),
        );
        let (manga, chapter) = seed(&ctx);

        RefreshLibrary::new(&manga, &chapter)
            .run(&ctx, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_minimum_interval_suppresses_back_to_back_refreshes() {
        let dir = TempDir::new().unwrap();
        let refresher = Arc::new(CountingRefresher::default());
        let mut settings = Settings::default();
        settings.refresh_policy = RefreshPolicy::AfterEveryChapter;
        settings.min_refresh_interval_secs = 3600;
        let ctx = crate::test_support::context_full(
            &dir,
            ConnectorRegistry::new(),
            settings,
            refresher.clone(),
        );
        let (manga, chapter) = seed(&ctx);

        let work = RefreshLibrary::new(&manga, &chapter);
        work.run(&ctx, &CancellationToken::new()).await.unwrap();
        work.run(&ctx, &CancellationToken::new()).await.unwrap();
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_after_manga_finished_waits_for_pending_chapters() {
        let dir = TempDir::new().unwrap();
        let refresher = Arc::new(CountingRefresher::default());
        let ctx = crate::test_support::context_full(
            &dir,
            ConnectorRegistry::new(),
            Settings::default(),
            refresher.clone(),
        );
        let (manga, chapter) = seed(&ctx);

        // A second chapter still pending via a flagged link.
        let pending = Chapter {
            id: ChapterId::new(),
            manga_id: manga.id,
            number: "2".parse().unwrap(),
            volume: None,
            title: None,
            file_name: "b.cbz".to_string(),
            downloaded: false,
        };
        ctx.store.upsert_chapter(&pending).unwrap();
        ctx.store
            .upsert_chapter_link(&crate::model::ChapterConnectorLink {
                chapter_id: pending.id,
                manga_id: manga.id,
                connector_id: crate::model::ConnectorId::from("stub"),
                remote_id: "c2".to_string(),
                remote_url: "https://stub.example/ch/c2".to_string(),
                use_for_download: true,
            })
            .unwrap();

        let work = RefreshLibrary::new(&manga, &chapter);
        work.run(&ctx, &CancellationToken::new()).await.unwrap();
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);

        // Last chapter lands; now the manga is finished.
        let mut done = pending.clone();
        done.downloaded = true;
        ctx.store.upsert_chapter(&done).unwrap();
        work.run(&ctx, &CancellationToken::new()).await.unwrap();
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }
}
