//! Domain model for ChapterBox
//!
//! Entities are plain data keyed by id newtypes and navigated through the
//! store by id lookups; there are no live back-references between manga,
//! chapters and connector links.

mod chapter;
mod ids;
mod manga;
mod notification;

pub use chapter::{Chapter, ChapterNumber, ChapterNumberError};
pub use ids::{ChapterId, ConnectorId, LibraryId, MangaId};
pub use manga::{ChapterConnectorLink, Library, Manga, MangaConnectorLink};
pub use notification::{Notification, Urgency};
