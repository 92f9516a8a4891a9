//! Metadata provider capability
//!
//! A metadata fetcher links a tracked manga to an entry on an external
//! metadata site (AniList/MAL style) and pulls richer title information from
//! it. A periodic worker applies updates through this trait.

use async_trait::async_trait;
use thiserror::Error;

use crate::model::Manga;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("metadata lookup failed: {0}")]
    Lookup(String),

    #[error("no metadata entry linked for manga {0}")]
    NotLinked(String),
}

pub type Result<T> = std::result::Result<T, MetadataError>;

/// A candidate entry on the metadata site.
#[derive(Debug, Clone)]
pub struct MetadataEntry {
    pub provider_id: String,
    pub title: String,
    pub url: String,
}

/// Fresh metadata for a linked entry. `None` fields leave the stored value
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct MetadataUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub authors: Option<Vec<String>>,
    pub alt_titles: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
}

impl MetadataUpdate {
    /// Apply the update onto a stored manga.
    pub fn apply(&self, manga: &mut Manga) {
        if let Some(title) = &self.title {
            manga.title = title.clone();
        }
        if let Some(description) = &self.description {
            manga.description = Some(description.clone());
        }
        if let Some(authors) = &self.authors {
            manga.authors = authors.clone();
        }
        if let Some(alt_titles) = &self.alt_titles {
            manga.alt_titles = alt_titles.clone();
        }
        if let Some(tags) = &self.tags {
            manga.tags = tags.clone();
        }
    }
}

#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    /// Search the provider for candidate entries matching a manga.
    async fn search_entry(&self, manga: &Manga) -> Result<Vec<MetadataEntry>>;

    /// Fetch current metadata for a linked entry.
    async fn update_metadata(&self, entry: &MetadataEntry) -> Result<MetadataUpdate>;
}
