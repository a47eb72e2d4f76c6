//! wayfarer - Polite, deduplicating web crawler
//!
//! A multi-worker crawler with a crash-recoverable frontier, per-domain
//! politeness and near-duplicate page detection.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`crawler`] - Frontier, politeness scheduling, fetching and the worker pool
//! - [`parser`] - Link and text extraction from HTML
//! - [`storage`] - Durable URL store and content duplicate detection
//! - [`error`] - Unified error type
//! - [`utils`] - Hashing and formatting helpers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use wayfarer::config::Config;
//! use wayfarer::crawler::{Collaborators, DefaultUrlPolicy, Frontier, HttpFetcher, WorkerPool, WorkerSettings};
//! use wayfarer::storage::DuplicateDetector;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let policy = Arc::new(DefaultUrlPolicy::new(&config.policy)?);
//!     let frontier = Arc::new(Frontier::open(&config, policy.as_ref())?);
//!     let detector = Arc::new(DuplicateDetector::new(config.dedup.near_duplicate_hamming_threshold));
//!     let fetcher = Arc::new(HttpFetcher::new(&config.crawler)?);
//!
//!     let pool = WorkerPool::new(
//!         frontier,
//!         detector,
//!         Collaborators::with_html_parser(fetcher, policy)?,
//!         WorkerSettings::from_config(&config),
//!         config.crawler.worker_count,
//!     );
//!     let stats = pool.run().await;
//!     println!("{stats:?}");
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod crawler;
pub mod error;
pub mod parser;
pub mod storage;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::crawler::{
        Collaborators, DefaultUrlPolicy, Fetcher, Frontier, HttpFetcher, NextUrl, UrlPolicy,
        WorkerPool, WorkerSettings, WorkerState,
    };
    pub use crate::error::{Error, ErrorCategory, Result, WayfarerErrorTrait};
    pub use crate::parser::{HtmlParser, LinkExtractor, TextExtractor};
    pub use crate::storage::{DedupVerdict, DuplicateDetector, SqliteUrlStore, UrlStore};
}
