//! Key layout and encoding for the store partitions

use crate::model::{ChapterId, ConnectorId, LibraryId, MangaId};
use uuid::Uuid;

pub fn manga_key(id: MangaId) -> Vec<u8> {
    format!("manga:{}", id).into_bytes()
}

pub fn chapter_key(manga_id: MangaId, chapter_id: ChapterId) -> Vec<u8> {
    format!("chapter:{}:{}", manga_id, chapter_id).into_bytes()
}

/// Prefix for a range scan over one manga's chapters.
pub fn chapter_prefix(manga_id: MangaId) -> Vec<u8> {
    format!("chapter:{}:", manga_id).into_bytes()
}

pub fn manga_link_key(manga_id: MangaId, connector: &ConnectorId) -> Vec<u8> {
    format!("mlink:{}:{}", manga_id, connector).into_bytes()
}

pub fn manga_link_prefix(manga_id: MangaId) -> Vec<u8> {
    format!("mlink:{}:", manga_id).into_bytes()
}

pub fn chapter_link_key(manga_id: MangaId, connector: &ConnectorId, remote_id: &str) -> Vec<u8> {
    format!("clink:{}:{}:{}", manga_id, connector, remote_id).into_bytes()
}

pub fn chapter_link_prefix(manga_id: MangaId, connector: &ConnectorId) -> Vec<u8> {
    format!("clink:{}:{}:", manga_id, connector).into_bytes()
}

pub fn library_key(id: LibraryId) -> Vec<u8> {
    format!("library:{}", id).into_bytes()
}

pub fn notification_key(id: Uuid) -> Vec<u8> {
    format!("notif:{}", id).into_bytes()
}

pub fn worker_key(worker_id: &str) -> Vec<u8> {
    format!("worker:{}", worker_id).into_bytes()
}
