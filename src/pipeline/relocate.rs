use async_trait::async_trait;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::model::{Chapter, ChapterId, Manga, MangaId};
use crate::worker::{Result, Work, WorkError, WorkOutcome, WorkerContext, WorkerId};

use super::naming::sanitize_filename;

/// Moves a finished archive from the staging directory into the manga's
/// library root. Tolerates a lost race: someone else having moved the file
/// already is success, not an error.
pub struct MoveArchive {
    manga_id: MangaId,
    chapter_id: ChapterId,
    manga_title: String,
    file_name: String,
}

impl MoveArchive {
    pub fn new(manga: &Manga, chapter: &Chapter) -> Self {
        Self {
            manga_id: manga.id,
            chapter_id: chapter.id,
            manga_title: manga.title.clone(),
            file_name: chapter.file_name.clone(),
        }
    }
}

#[async_trait]
impl Work for MoveArchive {
    fn id(&self) -> WorkerId {
        WorkerId::from(format!("move:{}", self.chapter_id))
    }

    fn label(&self) -> String {
        format!("move {} / {}", self.manga_title, self.file_name)
    }

    async fn run(&self, ctx: &WorkerContext, _cancel: &CancellationToken) -> Result<WorkOutcome> {
        let manga = ctx
            .store
            .get_manga(self.manga_id)?
            .ok_or_else(|| WorkError::Other(format!("manga {} missing", self.manga_id)))?;
        let Some(library_id) = manga.library_id else {
            debug!(archive = %self.file_name, "no library assigned, archive stays staged");
            return Ok(WorkOutcome::none());
        };
        let Some(library) = ctx.store.get_library(library_id)? else {
            return Ok(WorkOutcome::none());
        };

        let folder = sanitize_filename(&manga.title);
        let src = ctx
            .config
            .snapshot()
            .download_dir
            .join(&folder)
            .join(&self.file_name);
        let dest = library.root.join(&folder).join(&self.file_name);

        if !src.exists() {
            if dest.exists() {
                debug!(archive = %self.file_name, "already moved");
                return Ok(WorkOutcome::none());
            }
            return Err(WorkError::Other(format!(
                "archive {} not found in staging or library",
                self.file_name
            )));
        }

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        move_file(&src, &dest)?;
        info!(archive = %self.file_name, dest = %dest.display(), "archive moved");
        Ok(WorkOutcome::none())
    }
}

/// Rename when possible, copy-and-remove when the library sits on another
/// filesystem.
fn move_file(src: &Path, dest: &Path) -> std::io::Result<()> {
    match std::fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(_) => {
            std::fs::copy(src, dest)?;
            std::fs::remove_file(src)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Library;
    use crate::model::LibraryId;
    use tempfile::TempDir;

    fn seed(ctx: &WorkerContext, root: &Path) -> (Manga, Chapter) {
        let library = Library {
            id: LibraryId::new(),
            name: "main".to_string(),
            root: root.to_path_buf(),
        };
        ctx.store.upsert_library(&library).unwrap();

        let mut manga = Manga::new("Alpha");
        manga.library_id = Some(library.id);
        ctx.store.upsert_manga(&manga).unwrap();

        let chapter = Chapter {
            id: ChapterId::new(),
            manga_id: manga.id,
            number: "1".parse().unwrap(),
            volume: None,
            title: None,
            file_name: "Alpha - Ch.1.cbz".to_string(),
            downloaded: true,
        };
        ctx.store.upsert_chapter(&chapter).unwrap();
        (manga, chapter)
    }

    #[tokio::test]
    async fn test_moves_archive_into_library() {
        let dir = TempDir::new().unwrap();
        let ctx = crate::test_support::context(&dir);
        let (manga, chapter) = seed(&ctx, &dir.path().join("library"));

        let staging = ctx.config.snapshot().download_dir.join("Alpha");
        std::fs::create_dir_all(&staging).unwrap();
        std::fs::write(staging.join("Alpha - Ch.1.cbz"), b"archive").unwrap();

        MoveArchive::new(&manga, &chapter)
            .run(&ctx, &CancellationToken::new())
            .await
            .unwrap();

        let dest = dir.path().join("library/Alpha/Alpha - Ch.1.cbz");
        assert_eq!(std::fs::read(dest).unwrap(), b"archive");
        assert!(!staging.join("Alpha - Ch.1.cbz").exists());
    }

    #[tokio::test]
    async fn test_already_moved_is_success() {
        let dir = TempDir::new().unwrap();
        let ctx = crate::test_support::context(&dir);
        let (manga, chapter) = seed(&ctx, &dir.path().join("library"));

        let dest_dir = dir.path().join("library/Alpha");
        std::fs::create_dir_all(&dest_dir).unwrap();
        std::fs::write(dest_dir.join("Alpha - Ch.1.cbz"), b"archive").unwrap();

        MoveArchive::new(&manga, &chapter)
            .run(&ctx, &CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_archive_everywhere_fails() {
        let dir = TempDir::new().unwrap();
        let ctx = crate::test_support::context(&dir);
        let (manga, chapter) = seed(&ctx, &dir.path().join("library"));

        let result = MoveArchive::new(&manga, &chapter)
            .run(&ctx, &CancellationToken::new())
            .await;
        assert!(result.is_err());
    }
}
