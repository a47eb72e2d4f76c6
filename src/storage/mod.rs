//! Persistence and duplicate tracking
//!
//! - [`repository`] holds the durable URL store behind the frontier
//! - [`dedup`] holds the process-wide content duplicate detector

pub mod dedup;
pub mod repository;

pub use dedup::{
    checksum, fingerprint, hamming_distance, Checksum, DedupStats, DedupVerdict,
    DuplicateDetector, Fingerprint,
};
pub use repository::{
    reset_store_files, MemoryUrlStore, SharedUrlStore, SqliteUrlStore, StoreStats, UrlRecord,
    UrlStore,
};
