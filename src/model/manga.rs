use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::{ChapterId, ConnectorId, LibraryId, MangaId};

/// A tracked manga title.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manga {
    pub id: MangaId,
    pub title: String,
    #[serde(default)]
    pub alt_titles: Vec<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Target library; None means the title is not assigned for on-disk
    /// download yet.
    #[serde(default)]
    pub library_id: Option<LibraryId>,
    /// When set, newly discovered chapter links are flagged for download.
    #[serde(default)]
    pub download: bool,
    #[serde(default)]
    pub cover_url: Option<String>,
}

impl Manga {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: MangaId::new(),
            title: title.into(),
            alt_titles: Vec::new(),
            authors: Vec::new(),
            tags: Vec::new(),
            language: None,
            description: None,
            library_id: None,
            download: false,
            cover_url: None,
        }
    }
}

/// Association between a manga and one connector's identity for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MangaConnectorLink {
    pub manga_id: MangaId,
    pub connector_id: ConnectorId,
    /// Connector-site identifier for this title.
    pub remote_id: String,
    pub remote_url: String,
    #[serde(default)]
    pub use_for_download: bool,
}

/// Association between a chapter and the connector it was discovered on.
///
/// `use_for_download = false` is a terminal skip: the download pipeline will
/// not attempt this link again (set when a connector reports zero images).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterConnectorLink {
    pub chapter_id: ChapterId,
    pub manga_id: MangaId,
    pub connector_id: ConnectorId,
    /// Connector-site identifier for this chapter; new chapters are distinct
    /// by this value.
    pub remote_id: String,
    pub remote_url: String,
    #[serde(default)]
    pub use_for_download: bool,
}

/// A downstream reading library the archives land in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Library {
    pub id: LibraryId,
    pub name: String,
    pub root: PathBuf,
}
