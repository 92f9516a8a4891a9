//! Fjall-based persistence for the domain entities and worker records
//!
//! Everything the core needs from storage is repository-style CRUD plus a
//! few filtered queries ("chapters flagged for download and not yet
//! downloaded"). Entities are stored as JSON values under prefix-encoded
//! keys spread over one partition per entity kind:
//!
//! - `manga`:       manga:{manga_id} -> Manga
//! - `chapters`:    chapter:{manga_id}:{chapter_id} -> Chapter
//! - `manga_links`: mlink:{manga_id}:{connector} -> MangaConnectorLink
//! - `chapter_links`: clink:{manga_id}:{connector}:{remote_id} -> ChapterConnectorLink
//! - `libraries`:   library:{library_id} -> Library
//! - `notifications`: notif:{id} -> Notification
//! - `workers`:     worker:{worker_id} -> WorkerRecord
//!
//! The worker records are a crash-recovery mirror of the scheduler's live
//! set, refreshed on every tick and served by the listing API.

mod keys;
#[allow(clippy::module_inception)]
mod store;

pub use store::{Store, WorkerRecord};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
