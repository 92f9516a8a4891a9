use bytes::Bytes;
use rand::Rng;
use regex::Regex;
use reqwest::{Client, StatusCode, header};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::FetchConfig;
use crate::ratelimit::{RateLimiter, RequestClass};

use super::{BrowserFallback, FetchResult};

/// Direct image URLs skip the browser fallback entirely; fetching them
/// through the plain HTTP path is much cheaper.
fn image_url_pattern() -> Regex {
    Regex::new(r"(?i)\.(jpe?g|png|gif|webp|avif)(\?.*)?$").expect("static pattern")
}

/// Rate-limited outbound HTTP client with retry, backoff and a headless
/// browser escalation for challenge pages.
pub struct DownloadClient {
    client: Client,
    limiter: Arc<RateLimiter>,
    browser: Arc<BrowserFallback>,
    config: FetchConfig,
    image_url: Regex,
}

impl DownloadClient {
    pub fn new(
        config: FetchConfig,
        limiter: Arc<RateLimiter>,
        browser: Arc<BrowserFallback>,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;

        Ok(Self {
            client,
            limiter,
            browser,
            config,
            image_url: image_url_pattern(),
        })
    }

    /// Fetch a URL within its request-class budget.
    ///
    /// Never returns an error: transport failures and exhausted retries come
    /// back as a 500-equivalent [`FetchResult`], HTTP failures as a result
    /// carrying the status, so callers branch on status alone.
    pub async fn make_request(
        &self,
        url: &str,
        class: RequestClass,
        referrer: Option<&str>,
    ) -> FetchResult {
        let mut attempts = 0;
        loop {
            attempts += 1;

            if let Err(e) = self.limiter.acquire(class).await {
                // Unknown or zero-rate classes are configuration bugs; fail
                // the fetch rather than dispatching unlimited.
                warn!(url, ?class, error = %e, "rate limit refused request");
                return FetchResult::transport_failure(url);
            }

            let (result, challenge) = self.request_once(url, referrer).await;

            if result.is_success() {
                if attempts > 1 {
                    debug!(url, attempts, "fetch succeeded after retry");
                }
                return result;
            }

            if challenge && is_blocked(result.status) && !self.is_direct_image_url(url) {
                return self.escalate_to_browser(url, result).await;
            }

            if !is_retryable_status(result.status) || attempts > self.config.max_retries {
                return result;
            }

            let backoff = retry_delay(attempts);
            warn!(url, attempts, status = %result.status, wait = ?backoff, "fetch failed, retrying");
            tokio::time::sleep(backoff).await;
        }
    }

    async fn request_once(&self, url: &str, referrer: Option<&str>) -> (FetchResult, bool) {
        let mut request = self.client.get(url);
        if let Some(referrer) = referrer {
            request = request.header(header::REFERER, referrer);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(url, error = %e, "transport error");
                return (FetchResult::transport_failure(url), false);
            }
        };

        let status = response.status();
        let final_url = response.url().to_string();
        let redirected = final_url != url;
        let challenge = server_header_matches_challenge(response.headers());

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                warn!(url, error = %e, "failed to read response body");
                return (FetchResult::transport_failure(url), false);
            }
        };

        if body.len() as u64 > self.config.max_body_bytes.as_u64() {
            warn!(url, size = body.len(), "response body over configured limit");
            let result = FetchResult {
                status: StatusCode::BAD_GATEWAY,
                body: Bytes::new(),
                final_url,
                redirected,
            };
            return (result, false);
        }

        let result = FetchResult {
            status,
            body,
            final_url,
            redirected,
        };
        (result, challenge)
    }

    async fn escalate_to_browser(&self, url: &str, original: FetchResult) -> FetchResult {
        debug!(url, status = %original.status, "challenge detected, escalating to browser");
        match self.browser.fetch_page(url).await {
            Ok(html) => FetchResult::from_rendered_html(url, html),
            Err(e) => {
                warn!(url, error = %e, "browser fallback failed");
                original
            }
        }
    }

    fn is_direct_image_url(&self, url: &str) -> bool {
        self.image_url.is_match(url)
    }
}

/// Statuses worth retrying through the plain HTTP path: rate limiting,
/// server errors and the Cloudflare 52x family.
fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status.as_u16(),
        429 | 500 | 502 | 503 | 504 | 520..=527
    )
}

/// Exponential backoff with jitter to avoid thundering-herd retries.
fn retry_delay(attempt: u32) -> Duration {
    let base_ms = 500u64.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
    let capped = base_ms.min(8_000);
    let jitter = rand::thread_rng().gen_range(0.75..=1.25);
    Duration::from_millis((capped as f64 * jitter) as u64)
}

fn server_header_matches_challenge(headers: &header::HeaderMap) -> bool {
    if headers.contains_key("cf-mitigated") {
        return true;
    }
    headers
        .get(header::SERVER)
        .and_then(|v| v.to_str().ok())
        .map(|server| {
            let server = server.to_ascii_lowercase();
            server.contains("cloudflare") || server.contains("ddos-guard")
        })
        .unwrap_or(false)
}

/// The escalation path only reacts to the blocked statuses an edge proxy
/// answers challenges with.
fn is_blocked(status: StatusCode) -> bool {
    matches!(status.as_u16(), 403 | 503)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_url_detection() {
        let re = image_url_pattern();
        assert!(re.is_match("https://cdn.example/p/001.jpg"));
        assert!(re.is_match("https://cdn.example/p/001.PNG?token=x"));
        assert!(re.is_match("https://cdn.example/p/cover.webp"));
        assert!(!re.is_match("https://site.example/chapter/12"));
        assert!(!re.is_match("https://site.example/page.html"));
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(is_retryable_status(StatusCode::from_u16(522).unwrap()));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!is_retryable_status(StatusCode::FORBIDDEN));
    }

    #[test]
    fn test_challenge_fingerprint() {
        let mut headers = header::HeaderMap::new();
        assert!(!server_header_matches_challenge(&headers));

        headers.insert(header::SERVER, "cloudflare".parse().unwrap());
        assert!(server_header_matches_challenge(&headers));

        headers.insert(header::SERVER, "nginx/1.24".parse().unwrap());
        assert!(!server_header_matches_challenge(&headers));

        headers.insert("cf-mitigated", "challenge".parse().unwrap());
        assert!(server_header_matches_challenge(&headers));
    }

    #[test]
    fn test_retry_delay_grows_and_caps() {
        let d1 = retry_delay(1);
        assert!(d1 >= Duration::from_millis(375) && d1 <= Duration::from_millis(625));
        let d10 = retry_delay(10);
        assert!(d10 <= Duration::from_millis(10_000));
    }
}
