//! CBZ assembly
//!
//! Archives are written next to their final path as `<name>.cbz.tmp` and moved
//! into place with a rename, so readers never observe a half-written file
//! and a crash leaves at most a stale temp file behind.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::model::{Chapter, Manga};
use crate::worker::{Result, WorkError};

/// Subset of the ComicInfo.xml schema comic readers consume. Empty fields
/// are omitted from the output entirely.
#[derive(Debug, Clone, Default)]
pub struct ComicInfo {
    pub series: String,
    pub title: Option<String>,
    pub number: String,
    pub volume: Option<u32>,
    pub authors: Vec<String>,
    pub tags: Vec<String>,
    pub language: Option<String>,
}

impl ComicInfo {
    pub fn for_chapter(manga: &Manga, chapter: &Chapter) -> Self {
        Self {
            series: manga.title.clone(),
            title: chapter.title.clone(),
            number: chapter.number.to_string(),
            volume: chapter.volume,
            authors: manga.authors.clone(),
            tags: manga.tags.clone(),
            language: manga.language.clone(),
        }
    }

    pub fn to_xml(&self) -> String {
        let mut xml = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<ComicInfo>\n");
        push_tag(&mut xml, "Series", Some(&self.series));
        push_tag(&mut xml, "Title", self.title.as_deref());
        push_tag(&mut xml, "Number", Some(&self.number));
        if let Some(volume) = self.volume {
            push_tag(&mut xml, "Volume", Some(&volume.to_string()));
        }
        if !self.authors.is_empty() {
            push_tag(&mut xml, "Writer", Some(&self.authors.join(", ")));
        }
        if !self.tags.is_empty() {
            push_tag(&mut xml, "Tags", Some(&self.tags.join(", ")));
        }
        push_tag(&mut xml, "LanguageISO", self.language.as_deref());
        xml.push_str("</ComicInfo>\n");
        xml
    }
}

fn push_tag(xml: &mut String, tag: &str, value: Option<&str>) {
    if let Some(value) = value {
        if value.is_empty() {
            return;
        }
        xml.push_str(&format!("  <{tag}>{}</{tag}>\n", escape(value)));
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Write a finished chapter archive: `ComicInfo.xml` plus the pages in
/// reading order. Replaces any existing archive at `dest` atomically.
pub fn write_cbz(dest: &Path, info: &ComicInfo, pages: &[(String, Vec<u8>)]) -> Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = dest.with_extension("cbz.tmp");

    let file = File::create(&tmp)?;
    let mut writer = ZipWriter::new(file);
    let deflated = FileOptions::default().compression_method(CompressionMethod::Deflated);
    // Image payloads are already compressed; store them as-is.
    let stored = FileOptions::default().compression_method(CompressionMethod::Stored);

    let result = (|| -> Result<()> {
        writer
            .start_file("ComicInfo.xml", deflated)
            .map_err(|e| WorkError::Archive(e.to_string()))?;
        writer.write_all(info.to_xml().as_bytes())?;

        for (name, bytes) in pages {
            writer
                .start_file(name.as_str(), stored)
                .map_err(|e| WorkError::Archive(e.to_string()))?;
            writer.write_all(bytes)?;
        }
        writer
            .finish()
            .map_err(|e| WorkError::Archive(e.to_string()))?;
        Ok(())
    })();

    if let Err(e) = result {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }

    std::fs::rename(&tmp, dest)?;
    Ok(())
}
