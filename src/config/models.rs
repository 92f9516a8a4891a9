use crate::humanize::ByteSize;
use crate::ratelimit::RateLimits;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub rates: RateLimits,
    #[serde(default)]
    pub settings: Settings,
    /// Libraries seeded into the store at startup (name + root path).
    #[serde(default)]
    pub libraries: Vec<LibrarySeed>,
    /// Notification sinks built at startup.
    #[serde(default)]
    pub notifiers: Vec<NotifierSeed>,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    #[serde(default = "default_fjall_path")]
    pub fjall_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            fjall_path: default_fjall_path(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    "0.0.0.0:8080".parse().unwrap()
}

fn default_fjall_path() -> PathBuf {
    PathBuf::from("data/store")
}

/// Outbound HTTP client configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetchConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Responses larger than this are treated as failed fetches.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: ByteSize,
    #[serde(default)]
    pub browser: BrowserFallbackConfig,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
            max_body_bytes: default_max_body_bytes(),
            browser: BrowserFallbackConfig::default(),
        }
    }
}

fn default_user_agent() -> String {
    crate::ratelimit::DEFAULT_USER_AGENT.to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_body_bytes() -> ByteSize {
    ByteSize(100 * 1024 * 1024) // 100 MB
}

/// Headless-browser fallback for anti-bot challenge pages
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrowserFallbackConfig {
    #[serde(default = "default_browser_enabled")]
    pub enabled: bool,
    /// Concurrent browser pages (one shared browser process).
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default = "default_nav_timeout_secs")]
    pub nav_timeout_secs: u64,
    #[serde(default = "default_nav_retries")]
    pub nav_retries: u32,
}

impl Default for BrowserFallbackConfig {
    fn default() -> Self {
        Self {
            enabled: default_browser_enabled(),
            max_pages: default_max_pages(),
            nav_timeout_secs: default_nav_timeout_secs(),
            nav_retries: default_nav_retries(),
        }
    }
}

fn default_browser_enabled() -> bool {
    true
}

fn default_max_pages() -> usize {
    2
}

fn default_nav_timeout_secs() -> u64 {
    30
}

fn default_nav_retries() -> u32 {
    3
}

/// How a finished chapter decides whether to trigger a library refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum RefreshPolicy {
    /// Refresh after every downloaded chapter.
    AfterEveryChapter,
    /// Refresh once all chapters of the finished chapter's manga are
    /// downloaded.
    AfterMangaFinished,
    /// Refresh once no download worker remains anywhere in the system.
    AfterAllFinished,
    /// Refresh on an independent timer while downloads are running.
    WhileDownloading {
        #[serde(default = "default_refresh_timer_secs")]
        interval_secs: u64,
    },
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        RefreshPolicy::AfterMangaFinished
    }
}

fn default_refresh_timer_secs() -> u64 {
    60
}

/// What happens to a worker whose dependency terminally failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DependencyFailurePolicy {
    /// Cancel the blocked dependent (default).
    #[default]
    Cancel,
    /// Leave the dependent blocked until externally cancelled.
    Block,
}

/// "Already downloaded" matching against files on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum ChapterMatch {
    /// Exact archive-name match only.
    Exact,
    /// Fuzzy filename match at or above the given score.
    Fuzzy {
        #[serde(default = "default_fuzzy_threshold")]
        threshold: i64,
    },
}

impl Default for ChapterMatch {
    fn default() -> Self {
        ChapterMatch::Fuzzy {
            threshold: default_fuzzy_threshold(),
        }
    }
}

fn default_fuzzy_threshold() -> i64 {
    60
}

/// Runtime-mutable settings. The API exposes this section for live updates;
/// components read it through [`super::SharedConfig`] snapshots rather than
/// any global.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Settings {
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    #[serde(default = "default_cover_cache_dir")]
    pub cover_cache_dir: PathBuf,
    /// Overall concurrent worker ceiling.
    #[serde(default = "default_max_workers")]
    pub max_concurrent_workers: usize,
    /// Independent ceiling for chapter download workers.
    #[serde(default = "default_max_downloads")]
    pub max_concurrent_downloads: usize,
    /// Scheduler tick.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Hard wall-clock deadline per worker run.
    #[serde(default = "default_worker_deadline_secs")]
    pub worker_deadline_secs: u64,
    /// Recurrence for chapter-list retrieval per connector link.
    #[serde(default = "default_retrieve_interval_secs")]
    pub retrieve_interval_secs: u64,
    /// JPEG quality 1..=100; 100 plus `grayscale = false` disables image
    /// processing entirely.
    #[serde(default = "default_image_quality")]
    pub image_quality: u8,
    #[serde(default)]
    pub grayscale: bool,
    /// Archive naming template: `{manga}`, `{volume}`, `{chapter}`, `{title}`.
    #[serde(default = "default_naming_template")]
    pub naming_template: String,
    #[serde(default)]
    pub chapter_match: ChapterMatch,
    #[serde(default)]
    pub refresh_policy: RefreshPolicy,
    /// Minimum gap between two refresh calls to the same library.
    #[serde(default = "default_min_refresh_secs")]
    pub min_refresh_interval_secs: u64,
    #[serde(default)]
    pub on_dependency_failure: DependencyFailurePolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            cover_cache_dir: default_cover_cache_dir(),
            max_concurrent_workers: default_max_workers(),
            max_concurrent_downloads: default_max_downloads(),
            tick_ms: default_tick_ms(),
            worker_deadline_secs: default_worker_deadline_secs(),
            retrieve_interval_secs: default_retrieve_interval_secs(),
            image_quality: default_image_quality(),
            grayscale: false,
            naming_template: default_naming_template(),
            chapter_match: ChapterMatch::default(),
            refresh_policy: RefreshPolicy::default(),
            min_refresh_interval_secs: default_min_refresh_secs(),
            on_dependency_failure: DependencyFailurePolicy::default(),
        }
    }
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("data/downloads")
}

fn default_cover_cache_dir() -> PathBuf {
    PathBuf::from("data/covers")
}

fn default_max_workers() -> usize {
    16
}

fn default_max_downloads() -> usize {
    4
}

fn default_tick_ms() -> u64 {
    1000
}

fn default_worker_deadline_secs() -> u64 {
    600
}

fn default_retrieve_interval_secs() -> u64 {
    3 * 60 * 60
}

fn default_image_quality() -> u8 {
    100
}

fn default_naming_template() -> String {
    "{manga} - Vol.{volume} Ch.{chapter}".to_string()
}

fn default_min_refresh_secs() -> u64 {
    30
}

impl Settings {
    /// Image processing is a no-op at quality 100 with grayscale off.
    pub fn image_processing_enabled(&self) -> bool {
        self.image_quality < 100 || self.grayscale
    }
}

/// Library seed entry from the config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LibrarySeed {
    pub name: String,
    pub root: PathBuf,
}

/// Notification sink entry from the config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotifierSeed {
    Ntfy {
        endpoint: String,
        topic: String,
        #[serde(default)]
        token: Option<String>,
    },
}
