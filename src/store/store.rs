use std::path::Path;

use chrono::{DateTime, Utc};
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::model::{
    Chapter, ChapterConnectorLink, ChapterId, ConnectorId, Library, LibraryId, Manga,
    MangaConnectorLink, MangaId, Notification,
};

use super::keys;
use super::Result;

/// Persisted mirror of one scheduler worker, for crash recovery and the
/// listing API. `next_execution` is derived, not stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub id: String,
    pub label: String,
    pub category: String,
    pub state: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub recurrence_ms: Option<u64>,
    #[serde(default)]
    pub last_execution: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl WorkerRecord {
    pub fn next_execution(&self) -> Option<DateTime<Utc>> {
        match (self.last_execution, self.recurrence_ms) {
            (Some(last), Some(ms)) => Some(last + chrono::Duration::milliseconds(ms as i64)),
            _ => None,
        }
    }
}

/// Fjall-backed repository for manga, chapters, connector links, libraries,
/// notifications and worker records.
#[derive(Clone)]
pub struct Store {
    keyspace: Keyspace,
    manga: PartitionHandle,
    chapters: PartitionHandle,
    manga_links: PartitionHandle,
    chapter_links: PartitionHandle,
    libraries: PartitionHandle,
    notifications: PartitionHandle,
    workers: PartitionHandle,
}

impl Store {
    /// Open or create a store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening store at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;

        let manga = keyspace.open_partition("manga", PartitionCreateOptions::default())?;
        let chapters = keyspace.open_partition("chapters", PartitionCreateOptions::default())?;
        let manga_links =
            keyspace.open_partition("manga_links", PartitionCreateOptions::default())?;
        let chapter_links =
            keyspace.open_partition("chapter_links", PartitionCreateOptions::default())?;
        let libraries = keyspace.open_partition("libraries", PartitionCreateOptions::default())?;
        let notifications =
            keyspace.open_partition("notifications", PartitionCreateOptions::default())?;
        let workers = keyspace.open_partition("workers", PartitionCreateOptions::default())?;

        Ok(Self {
            keyspace,
            manga,
            chapters,
            manga_links,
            chapter_links,
            libraries,
            notifications,
            workers,
        })
    }

    fn put<T: Serialize>(partition: &PartitionHandle, key: Vec<u8>, value: &T) -> Result<()> {
        partition.insert(key, serde_json::to_vec(value)?)?;
        Ok(())
    }

    fn read<T: for<'de> Deserialize<'de>>(
        partition: &PartitionHandle,
        key: Vec<u8>,
    ) -> Result<Option<T>> {
        match partition.get(key)? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    fn scan<T: for<'de> Deserialize<'de>>(
        partition: &PartitionHandle,
        prefix: Vec<u8>,
    ) -> Result<Vec<T>> {
        let mut out = Vec::new();
        for item in partition.prefix(prefix) {
            let (_, value) = item?;
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }

    // Manga

    pub fn upsert_manga(&self, manga: &Manga) -> Result<()> {
        debug!(manga_id = %manga.id, title = %manga.title, "upsert manga");
        Self::put(&self.manga, keys::manga_key(manga.id), manga)
    }

    pub fn get_manga(&self, id: MangaId) -> Result<Option<Manga>> {
        Self::read(&self.manga, keys::manga_key(id))
    }

    pub fn list_manga(&self) -> Result<Vec<Manga>> {
        Self::scan(&self.manga, b"manga:".to_vec())
    }

    // Chapters

    pub fn upsert_chapter(&self, chapter: &Chapter) -> Result<()> {
        Self::put(
            &self.chapters,
            keys::chapter_key(chapter.manga_id, chapter.id),
            chapter,
        )
    }

    pub fn get_chapter(&self, manga_id: MangaId, id: ChapterId) -> Result<Option<Chapter>> {
        Self::read(&self.chapters, keys::chapter_key(manga_id, id))
    }

    /// All chapters of a manga, ascending by chapter number.
    pub fn chapters_of_manga(&self, manga_id: MangaId) -> Result<Vec<Chapter>> {
        let mut chapters: Vec<Chapter> = Self::scan(&self.chapters, keys::chapter_prefix(manga_id))?;
        chapters.sort_by(|a, b| a.number.cmp(&b.number));
        Ok(chapters)
    }

    // Connector links

    pub fn upsert_manga_link(&self, link: &MangaConnectorLink) -> Result<()> {
        Self::put(
            &self.manga_links,
            keys::manga_link_key(link.manga_id, &link.connector_id),
            link,
        )
    }

    pub fn manga_links(&self, manga_id: MangaId) -> Result<Vec<MangaConnectorLink>> {
        Self::scan(&self.manga_links, keys::manga_link_prefix(manga_id))
    }

    pub fn upsert_chapter_link(&self, link: &ChapterConnectorLink) -> Result<()> {
        Self::put(
            &self.chapter_links,
            keys::chapter_link_key(link.manga_id, &link.connector_id, &link.remote_id),
            link,
        )
    }

    pub fn get_chapter_link(
        &self,
        manga_id: MangaId,
        connector: &ConnectorId,
        remote_id: &str,
    ) -> Result<Option<ChapterConnectorLink>> {
        Self::read(
            &self.chapter_links,
            keys::chapter_link_key(manga_id, connector, remote_id),
        )
    }

    pub fn chapter_links(
        &self,
        manga_id: MangaId,
        connector: &ConnectorId,
    ) -> Result<Vec<ChapterConnectorLink>> {
        Self::scan(
            &self.chapter_links,
            keys::chapter_link_prefix(manga_id, connector),
        )
    }

    /// Chapters of one manga that are flagged for download and not yet
    /// downloaded, paired with the link to fetch them through. Ascending by
    /// chapter number.
    pub fn pending_downloads(
        &self,
        manga_id: MangaId,
    ) -> Result<Vec<(Chapter, ChapterConnectorLink)>> {
        let mut pending = Vec::new();
        for item in self.chapter_links.prefix(format!("clink:{}:", manga_id)) {
            let (_, value) = item?;
            let link: ChapterConnectorLink = serde_json::from_slice(&value)?;
            if !link.use_for_download {
                continue;
            }
            if let Some(chapter) = self.get_chapter(link.manga_id, link.chapter_id)? {
                if !chapter.downloaded {
                    pending.push((chapter, link));
                }
            }
        }
        pending.sort_by(|a, b| a.0.number.cmp(&b.0.number));
        Ok(pending)
    }

    // Libraries

    pub fn upsert_library(&self, library: &Library) -> Result<()> {
        Self::put(&self.libraries, keys::library_key(library.id), library)
    }

    pub fn get_library(&self, id: LibraryId) -> Result<Option<Library>> {
        Self::read(&self.libraries, keys::library_key(id))
    }

    pub fn list_libraries(&self) -> Result<Vec<Library>> {
        Self::scan(&self.libraries, b"library:".to_vec())
    }

    pub fn find_library_by_name(&self, name: &str) -> Result<Option<Library>> {
        Ok(self.list_libraries()?.into_iter().find(|l| l.name == name))
    }

    // Notifications

    pub fn push_notification(&self, notification: &Notification) -> Result<()> {
        Self::put(
            &self.notifications,
            keys::notification_key(notification.id),
            notification,
        )
    }

    pub fn unsent_notifications(&self) -> Result<Vec<Notification>> {
        let all: Vec<Notification> = Self::scan(&self.notifications, b"notif:".to_vec())?;
        Ok(all.into_iter().filter(|n| !n.sent).collect())
    }

    pub fn mark_notification_sent(&self, id: Uuid) -> Result<()> {
        if let Some(mut n) = Self::read::<Notification>(&self.notifications, keys::notification_key(id))? {
            n.sent = true;
            Self::put(&self.notifications, keys::notification_key(id), &n)?;
        }
        Ok(())
    }

    // Worker records

    pub fn upsert_worker_record(&self, record: &WorkerRecord) -> Result<()> {
        Self::put(&self.workers, keys::worker_key(&record.id), record)
    }

    pub fn get_worker_record(&self, id: &str) -> Result<Option<WorkerRecord>> {
        Self::read(&self.workers, keys::worker_key(id))
    }

    pub fn list_worker_records(&self) -> Result<Vec<WorkerRecord>> {
        Self::scan(&self.workers, b"worker:".to_vec())
    }

    pub fn delete_worker_record(&self, id: &str) -> Result<()> {
        self.workers.remove(keys::worker_key(id))?;
        Ok(())
    }

    /// Persist all pending writes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }
}
