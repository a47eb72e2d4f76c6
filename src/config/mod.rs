//! Configuration management for the wayfarer crawler
//!
//! This module handles loading and validating configuration from environment
//! variables and TOML files. Command-line overrides are applied by the binary
//! on top of whichever source was loaded.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Crawler configuration
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// Persistent frontier storage
    #[serde(default)]
    pub storage: StorageConfig,

    /// Duplicate detection
    #[serde(default)]
    pub dedup: DedupConfig,

    /// URL acceptance policy
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Crawler-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// URLs the frontier is seeded with on a fresh start
    pub seed_urls: Vec<String>,

    /// Number of concurrent workers
    pub worker_count: usize,

    /// Minimum time between two dispatches to the same domain
    pub politeness_interval_secs: f64,

    /// Delay a worker sleeps after finishing each URL
    pub inter_request_delay_secs: f64,

    /// Upper bound for a single throttled backoff sleep
    pub max_throttle_backoff_secs: f64,

    /// Sleep while the queue is empty but other workers are still busy
    pub idle_poll_secs: f64,

    /// Pages whose text has this many words or fewer are not expanded
    pub min_content_words: usize,

    /// User agent string
    pub user_agent: String,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,

    /// Global request cap across all workers (0 = unlimited)
    pub requests_per_second: u32,

    /// Retries for 429/5xx responses (0 = never retry)
    pub max_fetch_retries: u32,
}

/// Persistent store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file backing the frontier
    pub store_path: PathBuf,

    /// Discard existing persistent state and reseed
    pub restart: bool,
}

/// Duplicate detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Maximum Hamming distance at which two fingerprints count as near-duplicates
    pub near_duplicate_hamming_threshold: u32,
}

/// URL acceptance policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Host suffixes that may be crawled (empty = any host)
    pub allowed_domains: Vec<String>,

    /// Path extensions that are never fetched
    pub blocked_extensions: Vec<String>,

    /// Query parameters that mark crawler traps
    pub trap_query_params: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

/// Extensions of binary and media resources that carry no crawlable text
pub const DEFAULT_BLOCKED_EXTENSIONS: &[&str] = &[
    "css", "js", "bmp", "gif", "jpg", "jpeg", "ico", "png", "tif", "tiff", "mid", "mp2", "mp3",
    "mp4", "wav", "avi", "mov", "mpeg", "ram", "m4v", "mkv", "ogg", "ogv", "pdf", "ps", "eps",
    "tex", "ppt", "pptx", "doc", "docx", "xls", "xlsx", "names", "data", "dat", "exe", "bz2",
    "tar", "msi", "bin", "7z", "psd", "dmg", "iso", "epub", "dll", "cnf", "tgz", "sha1", "thmx",
    "mso", "arff", "rtf", "jar", "csv", "rm", "smil", "wmv", "swf", "wma", "zip", "rar", "gz",
];

/// Query parameters that usually generate unbounded URL spaces
pub const DEFAULT_TRAP_QUERY_PARAMS: &[&str] = &["calendar", "page", "sort", "refid"];

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            seed_urls: Vec::new(),
            worker_count: 4,
            politeness_interval_secs: 0.5,
            inter_request_delay_secs: 0.5,
            max_throttle_backoff_secs: 1.0,
            idle_poll_secs: 0.1,
            min_content_words: 20,
            user_agent: format!("wayfarer/{}", env!("CARGO_PKG_VERSION")),
            request_timeout_secs: 30,
            requests_per_second: 0,
            max_fetch_retries: 0,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("data/frontier.db"),
            restart: false,
        }
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            near_duplicate_hamming_threshold: 3,
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            allowed_domains: Vec::new(),
            blocked_extensions: DEFAULT_BLOCKED_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            trap_query_params: DEFAULT_TRAP_QUERY_PARAMS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Unset variables fall back to the defaults. `WAYFARER_SEED_URLS` is a
    /// comma-separated list.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let seed_urls = std::env::var("WAYFARER_SEED_URLS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let worker_count = env_parse("WAYFARER_WORKER_COUNT").unwrap_or(defaults.crawler.worker_count);

        let politeness_interval_secs = env_parse("WAYFARER_POLITENESS_INTERVAL")
            .unwrap_or(defaults.crawler.politeness_interval_secs);

        let inter_request_delay_secs = env_parse("WAYFARER_INTER_REQUEST_DELAY")
            .unwrap_or(defaults.crawler.inter_request_delay_secs);

        let request_timeout_secs =
            env_parse("WAYFARER_REQUEST_TIMEOUT").unwrap_or(defaults.crawler.request_timeout_secs);

        let user_agent =
            std::env::var("WAYFARER_USER_AGENT").unwrap_or(defaults.crawler.user_agent);

        let store_path = std::env::var("WAYFARER_STORE_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.storage.store_path);

        let restart = env_parse("WAYFARER_RESTART").unwrap_or(false);

        let near_duplicate_hamming_threshold = env_parse("WAYFARER_HAMMING_THRESHOLD")
            .unwrap_or(defaults.dedup.near_duplicate_hamming_threshold);

        let allowed_domains = std::env::var("WAYFARER_ALLOWED_DOMAINS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let log_level =
            std::env::var("WAYFARER_LOG_LEVEL").unwrap_or_else(|_| String::from("info"));

        let log_format =
            std::env::var("WAYFARER_LOG_FORMAT").unwrap_or_else(|_| String::from("text"));

        Ok(Self {
            crawler: CrawlerConfig {
                seed_urls,
                worker_count,
                politeness_interval_secs,
                inter_request_delay_secs,
                request_timeout_secs,
                user_agent,
                ..defaults.crawler
            },
            storage: StorageConfig {
                store_path,
                restart,
            },
            dedup: DedupConfig {
                near_duplicate_hamming_threshold,
            },
            policy: PolicyConfig {
                allowed_domains,
                ..defaults.policy
            },
            logging: LoggingConfig {
                level: log_level,
                format: log_format,
            },
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.crawler.seed_urls.is_empty() {
            anyhow::bail!("at least one seed url is required");
        }

        for seed in &self.crawler.seed_urls {
            let parsed =
                Url::parse(seed).with_context(|| format!("seed url is not absolute: {seed}"))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                anyhow::bail!("seed url must use http or https: {seed}");
            }
            if parsed.host_str().is_none() {
                anyhow::bail!("seed url has no host: {seed}");
            }
        }

        if self.crawler.worker_count == 0 {
            anyhow::bail!("worker_count must be greater than 0");
        }

        for (name, value) in [
            ("politeness_interval_secs", self.crawler.politeness_interval_secs),
            ("inter_request_delay_secs", self.crawler.inter_request_delay_secs),
            ("max_throttle_backoff_secs", self.crawler.max_throttle_backoff_secs),
            ("idle_poll_secs", self.crawler.idle_poll_secs),
        ] {
            if Duration::try_from_secs_f64(value).is_err() {
                anyhow::bail!("{name} must be a non-negative number of seconds, got {value}");
            }
        }

        // Both bound a worker's wait between frontier polls
        for (name, value) in [
            ("max_throttle_backoff_secs", self.crawler.max_throttle_backoff_secs),
            ("idle_poll_secs", self.crawler.idle_poll_secs),
        ] {
            if value == 0.0 {
                anyhow::bail!("{name} must be positive");
            }
        }

        if self.dedup.near_duplicate_hamming_threshold > 64 {
            anyhow::bail!("near_duplicate_hamming_threshold cannot exceed 64");
        }

        if self.storage.store_path.as_os_str().is_empty() {
            anyhow::bail!("store_path must not be empty");
        }

        Ok(())
    }

    /// Minimum time between dispatches to one domain
    #[must_use]
    pub fn politeness_interval(&self) -> Duration {
        Duration::from_secs_f64(self.crawler.politeness_interval_secs)
    }

    /// Delay applied after each processed URL
    #[must_use]
    pub fn inter_request_delay(&self) -> Duration {
        Duration::from_secs_f64(self.crawler.inter_request_delay_secs)
    }

    /// Cap on a single throttled sleep
    #[must_use]
    pub fn max_throttle_backoff(&self) -> Duration {
        Duration::from_secs_f64(self.crawler.max_throttle_backoff_secs)
    }

    /// Sleep used while other workers still hold in-flight URLs
    #[must_use]
    pub fn idle_poll(&self) -> Duration {
        Duration::from_secs_f64(self.crawler.idle_poll_secs)
    }

    /// Get request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.crawler.request_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            crawler: CrawlerConfig::default(),
            storage: StorageConfig::default(),
            dedup: DedupConfig::default(),
            policy: PolicyConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}
