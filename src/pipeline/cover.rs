use async_trait::async_trait;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::model::{Manga, MangaId};
use crate::ratelimit::RequestClass;
use crate::worker::{Result, Work, WorkError, WorkOutcome, WorkerContext, WorkerId};

use super::naming::sanitize_filename;

/// Puts a `cover.*` image into the manga's library folder, going through an
/// on-disk cache keyed by connector and manga id so re-linked titles never
/// refetch. Filesystem checks here are advisory; losing a race to another
/// writer is fine, last writer wins.
pub struct EnsureCover {
    manga_id: MangaId,
    manga_title: String,
}

impl EnsureCover {
    pub fn new(manga: &Manga) -> Self {
        Self {
            manga_id: manga.id,
            manga_title: manga.title.clone(),
        }
    }
}

#[async_trait]
impl Work for EnsureCover {
    fn id(&self) -> WorkerId {
        WorkerId::from(format!("cover:{}", self.manga_id))
    }

    fn label(&self) -> String {
        format!("cover for {}", self.manga_title)
    }

    async fn run(&self, ctx: &WorkerContext, _cancel: &CancellationToken) -> Result<WorkOutcome> {
        let manga = ctx
            .store
            .get_manga(self.manga_id)?
            .ok_or_else(|| WorkError::Other(format!("manga {} missing", self.manga_id)))?;

        let Some(library_id) = manga.library_id else {
            debug!(manga = %self.manga_title, "no library assigned, cover stays cached only");
            return Ok(WorkOutcome::none());
        };
        let Some(library) = ctx.store.get_library(library_id)? else {
            return Ok(WorkOutcome::none());
        };
        let dest_dir = library.root.join(sanitize_filename(&manga.title));
        if has_cover(&dest_dir) {
            debug!(manga = %self.manga_title, "cover already present");
            return Ok(WorkOutcome::none());
        }

        let Some(cover_url) = manga.cover_url.as_deref() else {
            debug!(manga = %self.manga_title, "no cover url known");
            return Ok(WorkOutcome::none());
        };
        let connector = ctx
            .store
            .manga_links(self.manga_id)?
            .into_iter()
            .map(|l| l.connector_id)
            .next()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "unlinked".to_string());

        let ext = extension_of(cover_url);
        let settings = ctx.config.snapshot();
        let cached = settings
            .cover_cache_dir
            .join(format!("{}-{}.{}", connector, self.manga_id, ext));

        if !cached.exists() {
            let response = ctx
                .client
                .make_request(cover_url, RequestClass::MangaCover, None)
                .await;
            if !response.is_success() {
                return Err(WorkError::Other(format!(
                    "cover fetch for {} failed with {}",
                    self.manga_title, response.status
                )));
            }
            std::fs::create_dir_all(&settings.cover_cache_dir)?;
            std::fs::write(&cached, &response.body)?;
            debug!(manga = %self.manga_title, "cover cached");
        }

        std::fs::create_dir_all(&dest_dir)?;
        std::fs::copy(&cached, dest_dir.join(format!("cover.{ext}")))?;
        info!(manga = %self.manga_title, "cover placed");
        Ok(WorkOutcome::none())
    }
}

fn has_cover(dir: &Path) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    entries.flatten().any(|e| {
        e.file_name()
            .to_str()
            .map(|name| name.starts_with("cover."))
            .unwrap_or(false)
    })
}

fn extension_of(url: &str) -> &str {
    url.split('?')
        .next()
        .and_then(|path| path.rsplit('.').next())
        .filter(|ext| ext.len() <= 4 && !ext.contains('/'))
        .unwrap_or("jpg")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Library;
    use crate::model::LibraryId;
    use tempfile::TempDir;

    #[test]
    fn test_extension_parsing() {
        assert_eq!(extension_of("https://c.example/covers/a.png?size=big"), "png");
        assert_eq!(extension_of("https://c.example/covers/a"), "jpg");
    }

    #[test]
    fn test_has_cover_detects_any_extension() {
        let dir = TempDir::new().unwrap();
        assert!(!has_cover(dir.path()));
        std::fs::write(dir.path().join("cover.webp"), b"x").unwrap();
        assert!(has_cover(dir.path()));
    }

    #[tokio::test]
    async fn test_existing_cover_short_circuits() {
        let dir = TempDir::new().unwrap();
        let ctx = crate::test_support::context(&dir);

        let library = Library {
            id: LibraryId::new(),
            name: "main".to_string(),
            root: dir.path().join("library"),
        };
        ctx.store.upsert_library(&library).unwrap();

        let mut manga = Manga::new("Alpha");
        manga.library_id = Some(library.id);
        // Would require a fetch if the short-circuit failed.
        manga.cover_url = Some("https://c.example/a.jpg".to_string());
        ctx.store.upsert_manga(&manga).unwrap();

        let dest = library.root.join("Alpha");
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(dest.join("cover.jpg"), b"x").unwrap();

        EnsureCover::new(&manga)
            .run(&ctx, &CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cache_hit_skips_fetch() {
        let dir = TempDir::new().unwrap();
        let ctx = crate::test_support::context(&dir);

        let library = Library {
            id: LibraryId::new(),
            name: "main".to_string(),
            root: dir.path().join("library"),
        };
        ctx.store.upsert_library(&library).unwrap();

        let mut manga = Manga::new("Alpha");
        manga.library_id = Some(library.id);
        manga.cover_url = Some("https://c.example/a.jpg".to_string());
        ctx.store.upsert_manga(&manga).unwrap();

        let cache = ctx.config.snapshot().cover_cache_dir.clone();
        std::fs::create_dir_all(&cache).unwrap();
        std::fs::write(
            cache.join(format!("unlinked-{}.jpg", manga.id)),
            b"cached-bytes",
        )
        .unwrap();

        EnsureCover::new(&manga)
            .run(&ctx, &CancellationToken::new())
            .await
            .unwrap();

        let placed = library.root.join("Alpha").join("cover.jpg");
        assert_eq!(std::fs::read(placed).unwrap(), b"cached-bytes");
    }
}
