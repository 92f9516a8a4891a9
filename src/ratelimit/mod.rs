//! Outbound request rate limiting.
//!
//! Every outbound HTTP request belongs to a [`RequestClass`], and each class
//! carries its own requests-per-minute budget. [`RateLimiter::acquire`]
//! sleeps until the per-class interval since the last dispatch has elapsed,
//! then stamps the class. Unknown classes are rejected outright; nothing is
//! silently unlimited.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Built-in user agent; requests running under it get a stricter global cap.
pub const DEFAULT_USER_AGENT: &str =
    concat!("ChapterBox/", env!("CARGO_PKG_VERSION"));

/// Hard ceiling for the `Default` class under the built-in user agent, even
/// when a higher override is configured.
const DEFAULT_IDENTITY_CEILING: u32 = 60;

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("unknown request class: {0:?}")]
    UnknownClass(RequestClass),

    #[error("request rate must be positive for class {0:?}")]
    ZeroRate(RequestClass),
}

pub type Result<T> = std::result::Result<T, RateLimitError>;

/// Class of outbound request, each with its own budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestClass {
    Default,
    MangaInfo,
    MangaCover,
    MangaImage,
}

impl RequestClass {
    pub const ALL: &'static [RequestClass] = &[
        RequestClass::Default,
        RequestClass::MangaInfo,
        RequestClass::MangaCover,
        RequestClass::MangaImage,
    ];
}

/// Per-class requests-per-minute table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimits {
    #[serde(default = "default_default_rpm")]
    pub default: u32,
    #[serde(default = "default_info_rpm")]
    pub manga_info: u32,
    #[serde(default = "default_cover_rpm")]
    pub manga_cover: u32,
    #[serde(default = "default_image_rpm")]
    pub manga_image: u32,
}

fn default_default_rpm() -> u32 {
    60
}

fn default_info_rpm() -> u32 {
    250
}

fn default_cover_rpm() -> u32 {
    250
}

fn default_image_rpm() -> u32 {
    40
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            default: default_default_rpm(),
            manga_info: default_info_rpm(),
            manga_cover: default_cover_rpm(),
            manga_image: default_image_rpm(),
        }
    }
}

impl RateLimits {
    pub fn requests_per_minute(&self, class: RequestClass) -> u32 {
        match class {
            RequestClass::Default => self.default,
            RequestClass::MangaInfo => self.manga_info,
            RequestClass::MangaCover => self.manga_cover,
            RequestClass::MangaImage => self.manga_image,
        }
    }
}

/// Interval gate: at most `rate` dispatches per minute per class, enforced by
/// sleeping callers until `last_dispatch + 60s/rate`.
#[derive(Debug)]
pub struct RateLimiter {
    intervals: HashMap<RequestClass, Duration>,
    // Instant of the last dispatch per class; behind one async mutex so a
    // sleeping caller holds its slot and later callers queue behind it.
    last_dispatch: Mutex<HashMap<RequestClass, Instant>>,
}

impl RateLimiter {
    /// Build a limiter from the per-class table. When `user_agent` is the
    /// built-in default identity, the `Default` class is capped at
    /// [`DEFAULT_IDENTITY_CEILING`] regardless of a higher configured value.
    pub fn new(limits: &RateLimits, user_agent: &str) -> Result<Self> {
        let mut intervals = HashMap::new();
        for &class in RequestClass::ALL {
            let mut rpm = limits.requests_per_minute(class);
            if class == RequestClass::Default
                && user_agent == DEFAULT_USER_AGENT
                && rpm > DEFAULT_IDENTITY_CEILING
            {
                debug!(
                    configured = rpm,
                    ceiling = DEFAULT_IDENTITY_CEILING,
                    "capping default-class rate for default user agent"
                );
                rpm = DEFAULT_IDENTITY_CEILING;
            }
            if rpm == 0 {
                return Err(RateLimitError::ZeroRate(class));
            }
            intervals.insert(class, Duration::from_secs(60) / rpm);
        }
        Ok(Self {
            intervals,
            last_dispatch: Mutex::new(HashMap::new()),
        })
    }

    /// Interval between dispatches for a class.
    pub fn interval(&self, class: RequestClass) -> Result<Duration> {
        self.intervals
            .get(&class)
            .copied()
            .ok_or(RateLimitError::UnknownClass(class))
    }

    /// Block (sleep) until a dispatch slot for `class` is available, then
    /// claim it.
    pub async fn acquire(&self, class: RequestClass) -> Result<()> {
        let interval = self.interval(class)?;
        let mut last = self.last_dispatch.lock().await;
        let now = Instant::now();
        let ready_at = match last.get(&class) {
            Some(prev) => *prev + interval,
            None => now,
        };
        if ready_at > now {
            trace!(?class, wait = ?(ready_at - now), "rate limit wait");
            tokio::time::sleep_until(ready_at).await;
        }
        last.insert(class, Instant::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_n_plus_one_waits_full_interval() {
        // 6/minute => one dispatch every 10 seconds.
        let limits = RateLimits {
            manga_image: 6,
            ..RateLimits::default()
        };
        let limiter = RateLimiter::new(&limits, "custom-agent/1.0").unwrap();

        let start = Instant::now();
        limiter.acquire(RequestClass::MangaImage).await.unwrap();
        limiter.acquire(RequestClass::MangaImage).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(10));
        assert!(start.elapsed() < Duration::from_secs(11));
    }

    #[tokio::test]
    async fn test_first_acquire_does_not_wait() {
        let limiter = RateLimiter::new(&RateLimits::default(), "custom-agent/1.0").unwrap();
        let start = std::time::Instant::now();
        limiter.acquire(RequestClass::Default).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_default_identity_is_capped() {
        let limits = RateLimits {
            default: 6000,
            ..RateLimits::default()
        };
        let capped = RateLimiter::new(&limits, DEFAULT_USER_AGENT).unwrap();
        assert_eq!(
            capped.interval(RequestClass::Default).unwrap(),
            Duration::from_secs(60) / DEFAULT_IDENTITY_CEILING
        );

        let uncapped = RateLimiter::new(&limits, "custom-agent/1.0").unwrap();
        assert_eq!(
            uncapped.interval(RequestClass::Default).unwrap(),
            Duration::from_secs(60) / 6000
        );
    }

    #[test]
    fn test_zero_rate_rejected() {
        let limits = RateLimits {
            manga_info: 0,
            ..RateLimits::default()
        };
        assert!(matches!(
            RateLimiter::new(&limits, "x").unwrap_err(),
            RateLimitError::ZeroRate(RequestClass::MangaInfo)
        ));
    }

}
