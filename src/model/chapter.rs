use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::{ChapterId, MangaId};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChapterNumberError {
    #[error("empty chapter number")]
    Empty,

    #[error("non-numeric chapter number component: {0:?}")]
    NonNumericComponent(String),
}

/// Dotted numeric chapter ordering key ("10", "10.2", "1.5.1").
///
/// Components compare left-to-right as integers, so "10.2" sorts before
/// "10.10", never lexicographically. A non-numeric component is a hard
/// format error, not a silent zero.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChapterNumber(Vec<u32>);

impl ChapterNumber {
    pub fn components(&self) -> &[u32] {
        &self.0
    }

    pub fn major(&self) -> u32 {
        self.0[0]
    }
}

impl FromStr for ChapterNumber {
    type Err = ChapterNumberError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ChapterNumberError::Empty);
        }
        let mut components = Vec::new();
        for part in s.split('.') {
            let n: u32 = part
                .parse()
                .map_err(|_| ChapterNumberError::NonNumericComponent(part.to_string()))?;
            components.push(n);
        }
        Ok(Self(components))
    }
}

impl Ord for ChapterNumber {
    fn cmp(&self, other: &Self) -> Ordering {
        // Vec<u32> lexicographic order is exactly component-wise integer
        // order, with a shorter prefix ranking first ("10" < "10.1").
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for ChapterNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ChapterNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for c in &self.0 {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{}", c)?;
            first = false;
        }
        Ok(())
    }
}

impl Serialize for ChapterNumber {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ChapterNumber {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One chapter of a manga. `downloaded` is only ever set true after the
/// archive has been fully written, or when a matching archive is found on
/// disk before downloading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    pub id: ChapterId,
    pub manga_id: MangaId,
    pub number: ChapterNumber,
    #[serde(default)]
    pub volume: Option<u32>,
    #[serde(default)]
    pub title: Option<String>,
    /// Archive file name this chapter downloads to (naming-scheme output).
    pub file_name: String,
    #[serde(default)]
    pub downloaded: bool,
}
