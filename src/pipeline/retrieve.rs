use async_trait::async_trait;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::model::{Chapter, ChapterConnectorLink, ChapterId, ConnectorId, MangaId};
use crate::worker::{Result, Work, WorkError, WorkOutcome, WorkerContext, WorkerId};

use super::{download_chain, naming};

/// Periodic per-link worker that pulls the connector's chapter list and
/// inserts what the store has not seen yet. Chapters are distinct by the
/// connector-site id, so re-running against an unchanged source is a no-op.
pub struct RetrieveChapters {
    manga_id: MangaId,
    connector_id: ConnectorId,
    manga_title: String,
}

impl RetrieveChapters {
    pub fn new(manga_id: MangaId, connector_id: ConnectorId, manga_title: String) -> Self {
        Self {
            manga_id,
            connector_id,
            manga_title,
        }
    }
}

#[async_trait]
impl Work for RetrieveChapters {
    fn id(&self) -> WorkerId {
        WorkerId::from(format!("retrieve:{}:{}", self.manga_id, self.connector_id))
    }

    fn label(&self) -> String {
        format!("retrieve chapters for {} via {}", self.manga_title, self.connector_id)
    }

    async fn run(&self, ctx: &WorkerContext, _cancel: &CancellationToken) -> Result<WorkOutcome> {
        let manga = ctx
            .store
            .get_manga(self.manga_id)?
            .ok_or_else(|| WorkError::Other(format!("manga {} missing", self.manga_id)))?;
        let link = ctx
            .store
            .manga_links(self.manga_id)?
            .into_iter()
            .find(|l| l.connector_id == self.connector_id)
            .ok_or_else(|| {
                WorkError::Other(format!(
                    "no {} link for manga {}",
                    self.connector_id, self.manga_id
                ))
            })?;

        let connector = ctx.connectors.get(&self.connector_id)?;
        let remote = connector.list_chapters(&link).await?;

        let known: HashSet<String> = ctx
            .store
            .chapter_links(self.manga_id, &self.connector_id)?
            .into_iter()
            .map(|l| l.remote_id)
            .collect();

        let settings = ctx.config.snapshot();
        let mut new_chapters = 0usize;
        for rc in remote {
            if known.contains(&rc.remote_id) {
                continue;
            }
            // A malformed chapter number from a connector is a bug upstream,
            // not something to guess around.
            let number = rc.number.parse()?;
            let mut chapter = Chapter {
                id: ChapterId::new(),
                manga_id: self.manga_id,
                number,
                volume: rc.volume,
                title: rc.title.clone(),
                file_name: String::new(),
                downloaded: false,
            };
            chapter.file_name =
                naming::chapter_file_name(&settings.naming_template, &manga.title, &chapter);

            ctx.store.upsert_chapter(&chapter)?;
            ctx.store.upsert_chapter_link(&ChapterConnectorLink {
                chapter_id: chapter.id,
                manga_id: self.manga_id,
                connector_id: self.connector_id.clone(),
                remote_id: rc.remote_id,
                remote_url: rc.url,
                use_for_download: manga.download,
            })?;
            new_chapters += 1;
        }

        if new_chapters > 0 {
            info!(
                manga = %self.manga_title,
                connector = %self.connector_id,
                new_chapters,
                "new chapters discovered"
            );
        } else {
            debug!(manga = %self.manga_title, connector = %self.connector_id, "no new chapters");
        }

        // Spawn a chain per pending chapter, newly discovered or left over
        // from an earlier failed run. Dedupe by worker id folds repeats.
        let mut outcome = WorkOutcome::none();
        if manga.download {
            for (chapter, _link) in ctx.store.pending_downloads(self.manga_id)? {
                outcome.spawned.extend(download_chain(&manga, &chapter));
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{
        ConnectorRegistry, RemoteChapter, RemoteManga, SourceConnector,
    };
    use crate::model::{Manga, MangaConnectorLink};
    use std::sync::Arc;
    use tempfile::TempDir;

    struct StubConnector {
        chapters: Vec<RemoteChapter>,
    }

    #[async_trait]
    impl SourceConnector for StubConnector {
        fn id(&self) -> ConnectorId {
            ConnectorId::from("stub")
        }

        fn supported_languages(&self) -> Vec<String> {
            vec!["en".to_string()]
        }

        fn base_urls(&self) -> Vec<String> {
            vec!["https://stub.example".to_string()]
        }

        async fn list_chapters(
            &self,
            _link: &MangaConnectorLink,
        ) -> crate::connector::Result<Vec<RemoteChapter>> {
            Ok(self.chapters.clone())
        }

        async fn chapter_image_urls(
            &self,
            _link: &ChapterConnectorLink,
        ) -> crate::connector::Result<Vec<String>> {
            Ok(vec![])
        }

        async fn search_manga(
            &self,
            _query: &str,
        ) -> crate::connector::Result<Vec<RemoteManga>> {
            Ok(vec![])
        }
    }

    fn remote(remote_id: &str, number: &str) -> RemoteChapter {
        RemoteChapter {
            remote_id: remote_id.to_string(),
            url: format!("https://stub.example/ch/{remote_id}"),
            number: number.to_string(),
            volume: None,
            title: None,
        }
    }

    async fn run_retrieve(
        dir: &TempDir,
        chapters: Vec<RemoteChapter>,
        download: bool,
    ) -> (WorkerContext, MangaId, WorkOutcome) {
        let mut registry = ConnectorRegistry::new();
        registry.register(Arc::new(StubConnector { chapters }));
        let ctx = crate::test_support::context_with(dir, registry);

        let mut manga = Manga::new("Alpha");
        manga.download = download;
        ctx.store.upsert_manga(&manga).unwrap();
        ctx.store
            .upsert_manga_link(&MangaConnectorLink {
                manga_id: manga.id,
                connector_id: ConnectorId::from("stub"),
                remote_id: "alpha".to_string(),
                remote_url: "https://stub.example/m/alpha".to_string(),
                use_for_download: true,
            })
            .unwrap();

        let work = RetrieveChapters::new(manga.id, ConnectorId::from("stub"), "Alpha".into());
        let outcome = work
            .run(&ctx, &CancellationToken::new())
            .await
            .unwrap();
        (ctx, manga.id, outcome)
    }

    #[tokio::test]
    async fn test_new_chapters_inserted_once() {
        let dir = TempDir::new().unwrap();
        let chapters = vec![remote("c1", "1"), remote("c2", "2")];
        let (ctx, manga_id, _) = run_retrieve(&dir, chapters.clone(), true).await;
        assert_eq!(ctx.store.chapters_of_manga(manga_id).unwrap().len(), 2);

        // Second run against the same upstream list changes nothing.
        let work = RetrieveChapters::new(manga_id, ConnectorId::from("stub"), "Alpha".into());
        work.run(&ctx, &CancellationToken::new()).await.unwrap();
        assert_eq!(ctx.store.chapters_of_manga(manga_id).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_download_chains_spawned_for_flagged_manga() {
        let dir = TempDir::new().unwrap();
        let (_, _, outcome) = run_retrieve(&dir, vec![remote("c1", "1")], true).await;
        // download, cover, move, refresh
        assert_eq!(outcome.spawned.len(), 4);
    }

    #[tokio::test]
    async fn test_no_chains_for_unflagged_manga() {
        let dir = TempDir::new().unwrap();
        let (ctx, manga_id, outcome) = run_retrieve(&dir, vec![remote("c1", "1")], false).await;
        assert!(outcome.spawned.is_empty());
        let links = ctx
            .store
            .chapter_links(manga_id, &ConnectorId::from("stub"))
            .unwrap();
        assert!(!links[0].use_for_download);
    }

    #[tokio::test]
    async fn test_malformed_number_is_a_hard_error() {
        let dir = TempDir::new().unwrap();
        let mut registry = ConnectorRegistry::new();
        registry.register(Arc::new(StubConnector {
            chapters: vec![remote("bad", "１２")],
        }));
        let ctx = crate::test_support::context_with(&dir, registry);

        let mut manga = Manga::new("Alpha");
        manga.download = true;
        ctx.store.upsert_manga(&manga).unwrap();
        ctx.store
            .upsert_manga_link(&MangaConnectorLink {
                manga_id: manga.id,
                connector_id: ConnectorId::from("stub"),
                remote_id: "alpha".to_string(),
                remote_url: "https://stub.example/m/alpha".to_string(),
                use_for_download: true,
            })
            .unwrap();

        let work = RetrieveChapters::new(manga.id, ConnectorId::from("stub"), "Alpha".into());
        let result = work.run(&ctx, &CancellationToken::new()).await;
        assert!(matches!(result, Err(WorkError::ChapterNumber(_))));
    }
}
