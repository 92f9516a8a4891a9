use async_trait::async_trait;
use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ChapterMatch;
use crate::model::{
    Chapter, ChapterConnectorLink, ChapterId, ChapterNumber, Manga, MangaId, Notification,
    Urgency,
};
use crate::ratelimit::RequestClass;
use crate::worker::{
    Result, Work, WorkError, WorkOutcome, WorkerCategory, WorkerContext, WorkerId,
};

use super::archive::{write_cbz, ComicInfo};
use super::naming::sanitize_filename;

/// Downloads all pages of one chapter and writes the archive into the
/// staging directory. Atomic at chapter granularity: any page failure drops
/// the buffered pages and leaves no archive behind.
pub struct DownloadChapter {
    manga_id: MangaId,
    chapter_id: ChapterId,
    manga_title: String,
    number: ChapterNumber,
}

impl DownloadChapter {
    pub fn new(manga: &Manga, chapter: &Chapter) -> Self {
        Self {
            manga_id: manga.id,
            chapter_id: chapter.id,
            manga_title: manga.title.clone(),
            number: chapter.number.clone(),
        }
    }
}

#[async_trait]
impl Work for DownloadChapter {
    fn id(&self) -> WorkerId {
        WorkerId::from(format!("download:{}", self.chapter_id))
    }

    fn label(&self) -> String {
        format!("download {} Ch.{}", self.manga_title, self.number)
    }

    fn category(&self) -> WorkerCategory {
        WorkerCategory::Download
    }

    fn order_key(&self) -> Option<ChapterNumber> {
        Some(self.number.clone())
    }

    async fn run(&self, ctx: &WorkerContext, cancel: &CancellationToken) -> Result<WorkOutcome> {
        let result = self.download(ctx, cancel).await;
        if result.is_err() {
            ctx.metrics.chapter_failed();
        }
        result
    }
}

impl DownloadChapter {
    async fn download(
        &self,
        ctx: &WorkerContext,
        _cancel: &CancellationToken,
    ) -> Result<WorkOutcome> {
        let mut chapter = ctx
            .store
            .get_chapter(self.manga_id, self.chapter_id)?
            .ok_or_else(|| WorkError::Other(format!("chapter {} missing", self.chapter_id)))?;
        if chapter.downloaded {
            debug!(chapter = %self.label(), "already downloaded");
            return Ok(WorkOutcome::none());
        }
        let manga = ctx
            .store
            .get_manga(self.manga_id)?
            .ok_or_else(|| WorkError::Other(format!("manga {} missing", self.manga_id)))?;

        let settings = ctx.config.snapshot();
        let staging_dir = settings
            .download_dir
            .join(sanitize_filename(&manga.title));
        let dest = staging_dir.join(&chapter.file_name);

        // An archive may already exist from an earlier run or a manual
        // import; in that case only the flag needs fixing.
        let mut search_dirs = vec![staging_dir.clone()];
        if let Some(library_id) = manga.library_id {
            if let Some(library) = ctx.store.get_library(library_id)? {
                search_dirs.push(library.root.join(sanitize_filename(&manga.title)));
            }
        }
        if archive_present(&search_dirs, &chapter.file_name, &settings.chapter_match) {
            info!(chapter = %self.label(), "archive already on disk, marking downloaded");
            chapter.downloaded = true;
            ctx.store.upsert_chapter(&chapter)?;
            return Ok(WorkOutcome::none());
        }

        let Some(mut link) = self.download_link(ctx)? else {
            debug!(chapter = %self.label(), "no downloadable link");
            return Ok(WorkOutcome::none());
        };
        let connector = ctx.connectors.get(&link.connector_id)?;
        let urls = connector.chapter_image_urls(&link).await?;

        if urls.is_empty() {
            // The source has no pages for this chapter. Mark the link so the
            // pipeline never retries it; a different connector may still
            // serve the chapter later.
            warn!(chapter = %self.label(), connector = %link.connector_id, "zero images, skipping permanently");
            link.use_for_download = false;
            ctx.store.upsert_chapter_link(&link)?;
            return Ok(WorkOutcome::none());
        }

        let mut pages = Vec::with_capacity(urls.len());
        for (index, url) in urls.iter().enumerate() {
            let response = ctx
                .client
                .make_request(url, RequestClass::MangaImage, Some(&link.remote_url))
                .await;
            if !response.is_success() {
                return Err(WorkError::Other(format!(
                    "page {} of {} failed with {}",
                    index + 1,
                    self.label(),
                    response.status
                )));
            }
            let bytes = if settings.image_processing_enabled() {
                process_page(&response.body, settings.image_quality, settings.grayscale)?
            } else {
                response.body.to_vec()
            };
            pages.push((
                page_name(index, url, settings.image_processing_enabled()),
                bytes,
            ));
        }

        write_cbz(&dest, &ComicInfo::for_chapter(&manga, &chapter), &pages)?;

        chapter.downloaded = true;
        ctx.store.upsert_chapter(&chapter)?;
        ctx.metrics.chapter_downloaded();
        ctx.store.push_notification(&Notification::new(
            format!("Chapter downloaded: {}", manga.title),
            format!("Ch.{}", chapter.number),
            Urgency::Normal,
        ))?;
        info!(chapter = %self.label(), pages = pages.len(), "chapter downloaded");
        Ok(WorkOutcome::none())
    }

    /// The first link flagged for download, across all connectors linked to
    /// the manga.
    fn download_link(&self, ctx: &WorkerContext) -> Result<Option<ChapterConnectorLink>> {
        for manga_link in ctx.store.manga_links(self.manga_id)? {
            let links = ctx
                .store
                .chapter_links(self.manga_id, &manga_link.connector_id)?;
            if let Some(link) = links
                .into_iter()
                .find(|l| l.chapter_id == self.chapter_id && l.use_for_download)
            {
                return Ok(Some(link));
            }
        }
        Ok(None)
    }
}

/// Look for an archive matching `file_name` in any of `dirs`, either exactly
/// or by fuzzy score depending on configuration.
fn archive_present(dirs: &[PathBuf], file_name: &str, matching: &ChapterMatch) -> bool {
    for dir in dirs {
        match matching {
            ChapterMatch::Exact => {
                if dir.join(file_name).exists() {
                    return true;
                }
            }
            ChapterMatch::Fuzzy { threshold } => {
                if fuzzy_hit(dir, file_name, *threshold) {
                    return true;
                }
            }
        }
    }
    false
}

fn fuzzy_hit(dir: &Path, file_name: &str, threshold: i64) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    let matcher = SkimMatcherV2::default();
    let target = stem(file_name);
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.ends_with(".cbz") {
            continue;
        }
        if let Some(score) = matcher.fuzzy_match(stem(name), target) {
            if score >= threshold {
                return true;
            }
        }
    }
    false
}

fn stem(name: &str) -> &str {
    name.strip_suffix(".cbz").unwrap_or(name)
}

/// Page file name inside the archive: zero-padded index plus the source
/// extension, or `.jpg` once re-encoded.
fn page_name(index: usize, url: &str, processed: bool) -> String {
    let ext = if processed {
        "jpg"
    } else {
        url.split('?')
            .next()
            .and_then(|path| path.rsplit('.').next())
            .filter(|ext| ext.len() <= 4 && !ext.contains('/'))
            .unwrap_or("jpg")
    };
    format!("{:03}.{}", index + 1, ext)
}

/// Decode, optionally desaturate, and re-encode as JPEG at the configured
/// quality.
fn process_page(bytes: &[u8], quality: u8, grayscale: bool) -> Result<Vec<u8>> {
    let image = image::load_from_memory(bytes).map_err(|e| WorkError::Image(e.to_string()))?;
    let mut out = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality);
    let encoded = if grayscale {
        encoder.encode_image(&image.to_luma8())
    } else {
        encoder.encode_image(&image.to_rgb8())
    };
    encoded.map_err(|e| WorkError::Image(e.to_string()))?;
    Ok(out)
}
