//! Archive naming
//!
//! Renders the configurable file-name template and keeps the result safe
//! for every filesystem the archive may land on.

use crate::model::{Chapter, ChapterNumber};

/// Replace characters that are unsafe or reserved on common filesystems.
/// Leading/trailing dots and whitespace are trimmed as well since Windows
/// rejects them.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_matches('.').trim();
    // A name that was nothing but reserved characters collapses to
    // underscores; that carries no information either.
    if trimmed.is_empty() || trimmed.chars().all(|c| c == '_') {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Render the archive file name for a chapter from the naming template.
///
/// Supported placeholders: `{manga}`, `{volume}`, `{chapter}`, `{title}`.
/// A `Vol.{volume}` fragment disappears entirely when the chapter has no
/// volume, and an empty `{title}` leaves no trailing separator behind.
pub fn chapter_file_name(template: &str, manga_title: &str, chapter: &Chapter) -> String {
    let rendered = render(
        template,
        manga_title,
        chapter.volume,
        &chapter.number,
        chapter.title.as_deref(),
    );
    format!("{}.cbz", sanitize_filename(&rendered))
}

fn render(
    template: &str,
    manga_title: &str,
    volume: Option<u32>,
    number: &ChapterNumber,
    title: Option<&str>,
) -> String {
    let mut out = template.to_string();

    match volume {
        Some(v) => out = out.replace("{volume}", &v.to_string()),
        None => {
            // Drop the whole "Vol.{volume}" fragment, not just the digits.
            out = out.replace("Vol.{volume} ", "");
            out = out.replace("Vol.{volume}", "");
            out = out.replace("{volume}", "");
        }
    }

    out = out.replace("{manga}", manga_title);
    out = out.replace("{chapter}", &number.to_string());
    out = out.replace("{title}", title.unwrap_or(""));

    collapse_spaces(&out)
}

fn collapse_spaces(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_space = false;
    for c in s.chars() {
        if c == ' ' {
            if !last_space {
                out.push(c);
            }
            last_space = true;
        } else {
            out.push(c);
            last_space = false;
        }
    }
    out.trim().trim_end_matches('-').trim().to_string()
}
