//! Shared headless-browser fallback for challenge-protected pages
//!
//! Exactly one browser process is started lazily for the whole daemon; page
//! usage is bounded by a small semaphore. Navigation runs on the blocking
//! pool because `headless_chrome` is a synchronous API.

use headless_chrome::{Browser, LaunchOptions};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OnceCell, Semaphore};
use tracing::{debug, warn};

use crate::config::BrowserFallbackConfig;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("browser fallback is disabled")]
    Disabled,

    #[error("browser launch failed: {0}")]
    Launch(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("browser fallback unavailable")]
    Unavailable,
}

/// Lazily-started shared browser with a bounded page pool.
pub struct BrowserFallback {
    config: BrowserFallbackConfig,
    browser: OnceCell<Arc<Browser>>,
    pages: Semaphore,
}

impl BrowserFallback {
    pub fn new(config: BrowserFallbackConfig) -> Self {
        let pages = Semaphore::new(config.max_pages);
        Self {
            config,
            browser: OnceCell::new(),
            pages,
        }
    }

    /// Start (once) and return the shared browser instance.
    async fn browser(&self) -> Result<Arc<Browser>, BrowserError> {
        self.browser
            .get_or_try_init(|| async {
                debug!("launching shared headless browser");
                let launched = tokio::task::spawn_blocking(|| {
                    let options = LaunchOptions::default_builder()
                        .headless(true)
                        .build()
                        .map_err(|e| BrowserError::Launch(e.to_string()))?;
                    Browser::new(options).map_err(|e| BrowserError::Launch(e.to_string()))
                })
                .await
                .map_err(|_| BrowserError::Unavailable)??;
                Ok(Arc::new(launched))
            })
            .await
            .cloned()
    }

    /// Render a page and return its final HTML.
    ///
    /// Navigation is retried up to `nav_retries` times with linear backoff;
    /// the page scrolls to the bottom once so lazily-loaded content appears.
    pub async fn fetch_page(&self, url: &str) -> Result<String, BrowserError> {
        if !self.config.enabled {
            return Err(BrowserError::Disabled);
        }

        let _permit = self
            .pages
            .acquire()
            .await
            .map_err(|_| BrowserError::Unavailable)?;
        let browser = self.browser().await?;
        let timeout = Duration::from_secs(self.config.nav_timeout_secs);

        let mut last_error = BrowserError::Unavailable;
        for attempt in 1..=self.config.nav_retries.max(1) {
            let browser = browser.clone();
            let url_owned = url.to_string();
            let outcome =
                tokio::task::spawn_blocking(move || render_page(&browser, &url_owned, timeout))
                    .await
                    .map_err(|_| BrowserError::Unavailable)?;
            match outcome {
                Ok(html) => return Ok(html),
                Err(e) => {
                    warn!(url, attempt, error = %e, "browser navigation failed");
                    last_error = e;
                    // Linear backoff between navigation attempts.
                    tokio::time::sleep(Duration::from_secs(attempt as u64)).await;
                }
            }
        }
        Err(last_error)
    }
}

/// One navigation attempt on a fresh tab. The tab is closed on every path.
fn render_page(browser: &Browser, url: &str, timeout: Duration) -> Result<String, BrowserError> {
    let tab = browser
        .new_tab()
        .map_err(|e| BrowserError::Navigation(e.to_string()))?;
    tab.set_default_timeout(timeout);

    let result = navigate_and_extract(&tab, url);
    // Release the page even when navigation failed.
    let _ = tab.close(true);
    result
}

fn navigate_and_extract(
    tab: &headless_chrome::Tab,
    url: &str,
) -> Result<String, BrowserError> {
    tab.navigate_to(url)
        .map_err(|e| BrowserError::Navigation(e.to_string()))?;
    tab.wait_until_navigated()
        .map_err(|e| BrowserError::Navigation(e.to_string()))?;

    // Trigger lazy-loaded images, then give the page a moment to settle.
    tab.evaluate("window.scrollTo(0, document.body.scrollHeight);", false)
        .map_err(|e| BrowserError::Navigation(e.to_string()))?;
    std::thread::sleep(Duration::from_millis(500));

    tab.get_content()
        .map_err(|e| BrowserError::Navigation(e.to_string()))
}
