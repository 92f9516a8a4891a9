//! Source connector capability
//!
//! A connector is a source-specific integration able to search titles, list
//! chapters and resolve chapter page images. The per-site scraping itself
//! lives behind this trait; the core only consumes it.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::model::{ChapterConnectorLink, ConnectorId, MangaConnectorLink};

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("failed to parse source response: {0}")]
    Parse(String),

    #[error("connector is disabled: {0}")]
    Disabled(ConnectorId),

    #[error("unknown connector: {0}")]
    Unknown(ConnectorId),
}

pub type Result<T> = std::result::Result<T, ConnectorError>;

/// A chapter as reported by a connector. `number` stays a raw string here;
/// it is parsed into a [`crate::model::ChapterNumber`] at ingest, where a
/// malformed value is a hard error.
#[derive(Debug, Clone)]
pub struct RemoteChapter {
    pub remote_id: String,
    pub url: String,
    pub number: String,
    pub volume: Option<u32>,
    pub title: Option<String>,
}

/// A search hit for a title on a connector.
#[derive(Debug, Clone)]
pub struct RemoteManga {
    pub remote_id: String,
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub cover_url: Option<String>,
}

/// Source-specific integration the download pipeline talks to.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    fn id(&self) -> ConnectorId;

    fn enabled(&self) -> bool {
        true
    }

    /// ISO language codes this source publishes in.
    fn supported_languages(&self) -> Vec<String>;

    fn base_urls(&self) -> Vec<String>;

    /// All chapters currently available for the linked title.
    async fn list_chapters(&self, link: &MangaConnectorLink) -> Result<Vec<RemoteChapter>>;

    /// Page image URLs for one chapter, in reading order. An empty list is a
    /// valid answer and means the chapter cannot be downloaded from this
    /// source.
    async fn chapter_image_urls(&self, link: &ChapterConnectorLink) -> Result<Vec<String>>;

    async fn search_manga(&self, query: &str) -> Result<Vec<RemoteManga>>;
}

/// Registry of available connectors, keyed by connector id.
#[derive(Default, Clone)]
pub struct ConnectorRegistry {
    connectors: HashMap<ConnectorId, Arc<dyn SourceConnector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, connector: Arc<dyn SourceConnector>) {
        self.connectors.insert(connector.id(), connector);
    }

    /// Look up an enabled connector; disabled and unknown connectors are
    /// both errors so callers cannot silently skip a source.
    pub fn get(&self, id: &ConnectorId) -> Result<Arc<dyn SourceConnector>> {
        let connector = self
            .connectors
            .get(id)
            .cloned()
            .ok_or_else(|| ConnectorError::Unknown(id.clone()))?;
        if !connector.enabled() {
            return Err(ConnectorError::Disabled(id.clone()));
        }
        Ok(connector)
    }

    pub fn list(&self) -> Vec<Arc<dyn SourceConnector>> {
        self.connectors.values().cloned().collect()
    }
}
