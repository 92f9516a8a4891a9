//! Chapter download pipeline
//!
//! Five chained works move a chapter from discovery to the reading library:
//! [`RetrieveChapters`] diffs the connector's chapter list into the store and
//! spawns a chain per pending chapter, [`DownloadChapter`] fetches the pages
//! and writes the archive, [`EnsureCover`] puts a cover image next to it,
//! [`MoveArchive`] relocates the archive under the library root and
//! [`RefreshLibrary`] tells the downstream library to rescan. Worker ids are
//! deterministic per entity, so re-discovering a pending chapter folds into
//! the chain that is already queued.

mod archive;
mod cover;
mod download;
mod metadata_update;
mod naming;
mod refresh;
mod relocate;
mod retrieve;

pub use archive::{write_cbz, ComicInfo};
pub use cover::EnsureCover;
pub use download::DownloadChapter;
pub use metadata_update::UpdateMetadata;
pub use naming::{chapter_file_name, sanitize_filename};
pub use refresh::RefreshLibrary;
pub use relocate::MoveArchive;
pub use retrieve::RetrieveChapters;

use crate::model::{Chapter, Manga};
use crate::worker::WorkerSpec;
use std::sync::Arc;

/// Build the download → move → refresh chain for one pending chapter, with
/// the cover as an independent branch off the download. The move waits only
/// on the download, so a cover fetch that ends badly never leaves a finished
/// archive stuck in staging. The caller enqueues the returned specs;
/// duplicate ids collapse into workers already queued.
pub fn download_chain(manga: &Manga, chapter: &Chapter) -> Vec<WorkerSpec> {
    let download = DownloadChapter::new(manga, chapter);
    let cover = EnsureCover::new(manga);
    let relocate = MoveArchive::new(manga, chapter);
    let refresh = RefreshLibrary::new(manga, chapter);

    let download_id = crate::worker::Work::id(&download);
    let relocate_id = crate::worker::Work::id(&relocate);

    vec![
        WorkerSpec::new(Arc::new(download)),
        WorkerSpec::new(Arc::new(cover)).after(download_id.clone()),
        WorkerSpec::new(Arc::new(relocate)).after(download_id),
        WorkerSpec::new(Arc::new(refresh)).after(relocate_id),
    ]
}
