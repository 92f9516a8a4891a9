//! Outbound fetching
//!
//! [`DownloadClient`] is the single path for outbound HTTP: it waits on the
//! per-class rate limit, retries transient failures with backoff, and
//! escalates anti-bot challenge pages to a shared headless-browser fallback.
//! It fails softly: callers always receive a [`FetchResult`] and branch on
//! its status; transport-level errors are logged and converted to a
//! 500-equivalent result rather than thrown.

mod browser;
mod client;

pub use browser::{BrowserError, BrowserFallback};
pub use client::DownloadClient;

use bytes::Bytes;
use reqwest::StatusCode;

/// Result of one outbound fetch. The caller owns the body bytes.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub status: StatusCode,
    pub body: Bytes,
    pub final_url: String,
    pub redirected: bool,
}

impl FetchResult {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Body as text (lossy).
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Parse the body as an HTML document.
    ///
    /// Parsed on demand because `scraper::Html` is not `Send`; keep the
    /// document inside one synchronous scope and never across an await.
    pub fn html(&self) -> scraper::Html {
        scraper::Html::parse_document(&self.text())
    }

    /// 500-equivalent result standing in for a transport-level failure.
    pub fn transport_failure(url: &str) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: Bytes::new(),
            final_url: url.to_string(),
            redirected: false,
        }
    }

    pub(crate) fn from_rendered_html(url: &str, html: String) -> Self {
        Self {
            status: StatusCode::OK,
            body: Bytes::from(html),
            final_url: url.to_string(),
            redirected: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_failure_is_500_with_empty_body() {
        let result = FetchResult::transport_failure("https://a.example/x");
        assert_eq!(result.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(result.body.is_empty());
        assert!(!result.is_success());
    }

    #[test]
    fn test_html_parses_rendered_body() {
        let result = FetchResult::from_rendered_html(
            "https://a.example",
            "<html><body><p id=\"x\">hi</p></body></html>".to_string(),
        );
        let doc = result.html();
        let sel = scraper::Selector::parse("#x").unwrap();
        let text: String = doc.select(&sel).next().unwrap().text().collect();
        assert_eq!(text, "hi");
    }
}
