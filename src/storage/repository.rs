//! Repository Pattern for the persistent URL store
//!
//! The frontier never talks to SQLite directly. It goes through the
//! [`UrlStore`] trait, so tests can swap the on-disk store for an in-memory
//! one with the same contract.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Frontier                            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     UrlStore trait                          │
//! └─────────────────────────────────────────────────────────────┘
//!                    ┌─────────┴─────────┐
//!                    ▼                   ▼
//!          ┌─────────────────┐ ┌─────────────────┐
//!          │     SQLite      │ │     Memory      │
//!          │  Implementation │ │ Implementation  │
//!          └─────────────────┘ └─────────────────┘
//! ```
//!
//! # Durability
//!
//! Every write on [`SqliteUrlStore`] is a single autocommit statement with
//! `synchronous=FULL`, so it is on disk before the call returns. A write that
//! was in flight at crash time may be lost; the record then stays incomplete
//! and the page is fetched again after restart.
//!
//! Those fsyncs block the calling thread. Async callers go through
//! `tokio::task::spawn_blocking`.
//!
//! # Usage
//!
//! ```rust,ignore
//! use wayfarer::storage::repository::{SqliteUrlStore, UrlRecord, UrlStore};
//!
//! let store = SqliteUrlStore::new("data/frontier.db")?;
//! let record = UrlRecord::new("http://a.example/x", hash_key);
//! assert!(store.insert_if_absent(&record)?);
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

// ============================================================================
// Core Types
// ============================================================================

/// A URL known to the frontier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlRecord {
    /// Normalized URL
    pub url: String,

    /// Stable identity derived from the normalized URL
    pub hash_key: String,

    /// Whether the URL has been processed
    pub completed: bool,
}

impl UrlRecord {
    /// Create an incomplete record
    pub fn new(url: impl Into<String>, hash_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            hash_key: hash_key.into(),
            completed: false,
        }
    }

    /// Mark the record as completed
    pub fn completed(mut self) -> Self {
        self.completed = true;
        self
    }
}

/// Store statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub total: usize,
    pub completed: usize,
    pub pending: usize,
}

impl StoreStats {
    /// Fraction of known URLs already processed (0.0 - 1.0)
    pub fn completion_rate(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.completed as f64 / self.total as f64
    }
}

// ============================================================================
// Repository Trait
// ============================================================================

/// Durable mapping from a URL's hash key to its record
///
/// Implementations guarantee at most one record per hash key, and never
/// reset `completed` from true back to false.
pub trait UrlStore: Send + Sync {
    /// Insert `record` unless its hash key is already known
    ///
    /// Returns `true` when a new record was created. Concurrent callers
    /// racing on the same key see exactly one `true`.
    fn insert_if_absent(&self, record: &UrlRecord) -> Result<bool>;

    /// Get a record by hash key
    fn get(&self, hash_key: &str) -> Result<Option<UrlRecord>>;

    /// Insert or update a record
    fn put(&self, record: &UrlRecord) -> Result<()>;

    /// Set `completed` for a hash key, creating the record if it is unknown
    ///
    /// Returns whether the record existed beforehand.
    fn mark_completed(&self, hash_key: &str, url: &str) -> Result<bool>;

    /// All records in insertion order
    fn all_records(&self) -> Result<Vec<UrlRecord>>;

    /// Get store statistics
    fn stats(&self) -> Result<StoreStats>;

    /// Check if the store holds no records
    fn is_empty(&self) -> Result<bool> {
        Ok(self.stats()?.total == 0)
    }
}

/// Thread-safe shared store handle
pub type SharedUrlStore = Arc<dyn UrlStore>;

// ============================================================================
// SQLite Implementation
// ============================================================================

/// SQLite implementation of UrlStore
///
/// Uses `Mutex` to ensure thread-safety for the SQLite connection.
pub struct SqliteUrlStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteUrlStore {
    /// Open (or create) the store at `path`
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create store directory {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite store {}", path.display()))?;

        // WAL for concurrent readers, FULL so a returned write survives a crash
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")
            .context("Failed to configure SQLite store")?;

        let store = Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        };
        store.create_schema()?;

        tracing::info!(path = %path.display(), "SQLite url store initialized");
        Ok(store)
    }

    /// Create in-memory store (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to create in-memory SQLite")?;
        let store = Self {
            conn: Mutex::new(conn),
            path: None,
        };
        store.create_schema()?;
        Ok(store)
    }

    /// Location of the database file, if on disk
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn create_schema(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute_batch(
            r#"
                CREATE TABLE IF NOT EXISTS urls (
                    hash_key TEXT PRIMARY KEY,
                    url TEXT NOT NULL,
                    completed INTEGER NOT NULL DEFAULT 0,
                    updated_at TEXT
                );

                CREATE INDEX IF NOT EXISTS idx_urls_completed
                    ON urls(completed);
                "#,
        )
        .context("Failed to create SQLite schema")?;

        Ok(())
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<UrlRecord> {
    Ok(UrlRecord {
        hash_key: row.get(0)?,
        url: row.get(1)?,
        completed: row.get(2)?,
    })
}

impl UrlStore for SqliteUrlStore {
    fn insert_if_absent(&self, record: &UrlRecord) -> Result<bool> {
        let conn = self.conn();
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO urls (hash_key, url, completed, updated_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    record.hash_key,
                    record.url,
                    record.completed,
                    Utc::now().to_rfc3339()
                ],
            )
            .with_context(|| format!("Failed to insert url {}", record.url))?;

        Ok(inserted > 0)
    }

    fn get(&self, hash_key: &str) -> Result<Option<UrlRecord>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT hash_key, url, completed FROM urls WHERE hash_key = ?1",
            params![hash_key],
            row_to_record,
        )
        .optional()
        .context("Failed to get url record")
    }

    fn put(&self, record: &UrlRecord) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO urls (hash_key, url, completed, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(hash_key) DO UPDATE SET
                url = excluded.url,
                completed = MAX(urls.completed, excluded.completed),
                updated_at = excluded.updated_at",
            params![
                record.hash_key,
                record.url,
                record.completed,
                Utc::now().to_rfc3339()
            ],
        )
        .with_context(|| format!("Failed to store url {}", record.url))?;

        Ok(())
    }

    fn mark_completed(&self, hash_key: &str, url: &str) -> Result<bool> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();

        let updated = conn
            .execute(
                "UPDATE urls SET completed = 1, updated_at = ?2 WHERE hash_key = ?1",
                params![hash_key, now],
            )
            .with_context(|| format!("Failed to complete url {url}"))?;

        if updated > 0 {
            return Ok(true);
        }

        conn.execute(
            "INSERT OR IGNORE INTO urls (hash_key, url, completed, updated_at)
             VALUES (?1, ?2, 1, ?3)",
            params![hash_key, url, now],
        )
        .with_context(|| format!("Failed to record unknown url {url}"))?;

        Ok(false)
    }

    fn all_records(&self) -> Result<Vec<UrlRecord>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT hash_key, url, completed FROM urls ORDER BY rowid")
            .context("Failed to prepare record scan")?;

        let records = stmt
            .query_map([], row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read url records")?;

        Ok(records)
    }

    fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn();
        let (total, completed): (i64, i64) = conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(completed), 0) FROM urls",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .context("Failed to get store stats")?;

        let total = total as usize;
        let completed = completed as usize;
        Ok(StoreStats {
            total,
            completed,
            pending: total.saturating_sub(completed),
        })
    }
}

/// Delete a store's database file and its WAL companions
///
/// Missing files are not an error. Returns the files that were removed.
pub fn reset_store_files(path: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let path = path.as_ref();
    let mut removed = Vec::new();

    for suffix in ["", "-wal", "-shm"] {
        let mut name = path.as_os_str().to_owned();
        name.push(suffix);
        let candidate = PathBuf::from(name);

        match std::fs::remove_file(&candidate) {
            Ok(()) => removed.push(candidate),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to remove store file {}", candidate.display())
                })
            }
        }
    }

    Ok(removed)
}

// ============================================================================
// Memory Implementation (for testing)
// ============================================================================

#[derive(Default)]
struct MemoryState {
    index: HashMap<String, usize>,
    records: Vec<UrlRecord>,
}

/// In-memory implementation of UrlStore
///
/// Useful for testing without touching the filesystem. Nothing survives the
/// process, so it only models durability within one run.
#[derive(Default)]
pub struct MemoryUrlStore {
    state: RwLock<MemoryState>,
}

impl MemoryUrlStore {
    /// Create a new memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of records
    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MemoryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MemoryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl UrlStore for MemoryUrlStore {
    fn insert_if_absent(&self, record: &UrlRecord) -> Result<bool> {
        let mut state = self.write();
        if state.index.contains_key(&record.hash_key) {
            return Ok(false);
        }
        let position = state.records.len();
        state.index.insert(record.hash_key.clone(), position);
        state.records.push(record.clone());
        Ok(true)
    }

    fn get(&self, hash_key: &str) -> Result<Option<UrlRecord>> {
        let state = self.read();
        Ok(state
            .index
            .get(hash_key)
            .map(|&position| state.records[position].clone()))
    }

    fn put(&self, record: &UrlRecord) -> Result<()> {
        let mut state = self.write();
        match state.index.get(&record.hash_key).copied() {
            Some(position) => {
                let existing = &mut state.records[position];
                existing.url = record.url.clone();
                existing.completed |= record.completed;
            }
            None => {
                let position = state.records.len();
                state.index.insert(record.hash_key.clone(), position);
                state.records.push(record.clone());
            }
        }
        Ok(())
    }

    fn mark_completed(&self, hash_key: &str, url: &str) -> Result<bool> {
        let mut state = self.write();
        if let Some(position) = state.index.get(hash_key).copied() {
            state.records[position].completed = true;
            return Ok(true);
        }

        let position = state.records.len();
        state.index.insert(hash_key.to_string(), position);
        state.records.push(UrlRecord::new(url, hash_key).completed());
        Ok(false)
    }

    fn all_records(&self) -> Result<Vec<UrlRecord>> {
        Ok(self.read().records.clone())
    }

    fn stats(&self) -> Result<StoreStats> {
        let state = self.read();
        let total = state.records.len();
        let completed = state.records.iter().filter(|r| r.completed).count();
        Ok(StoreStats {
            total,
            completed,
            pending: total - completed,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
