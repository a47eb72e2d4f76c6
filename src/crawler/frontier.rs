//! Persistent, politeness-aware URL frontier
//!
//! The frontier owns three pieces of state:
//! - the durable [`UrlStore`](crate::storage::UrlStore), one record per
//!   normalized URL
//! - the in-memory [`DomainScheduler`] holding URLs not yet dispatched
//! - the set of URLs handed to a worker and not yet marked complete
//!
//! Store writes happen outside the in-memory lock. `add` lets the store's
//! insert-if-absent decide which caller owns a new URL, and only that caller
//! queues it, so two workers discovering the same link enqueue it once.
//!
//! # Termination
//!
//! [`Frontier::next`] separates "nothing eligible yet" from "nothing left".
//! A worker that sees [`NextUrl::Throttled`] or [`NextUrl::Pending`] must
//! wait and retry; only [`NextUrl::Empty`] means the crawl is over.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::futures::Notified;
use tokio::sync::Notify;

use crate::config::Config;
use crate::crawler::policy::UrlPolicy;
use crate::crawler::politeness::{DomainScheduler, Poll};
use crate::crawler::url::{domain_of, hash_key, normalize_url};
use crate::error::{Error, Result};
use crate::storage::{reset_store_files, SharedUrlStore, SqliteUrlStore, StoreStats, UrlRecord};

/// Result of asking the frontier for work
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextUrl {
    /// A URL now owned by the caller until it is marked complete
    Ready(String),

    /// Work is queued but every domain is inside its politeness interval
    Throttled { retry_after: Duration },

    /// Queue is empty, but in-flight URLs may still discover new links
    Pending,

    /// Queue is empty and nothing is in flight
    Empty,
}

struct FrontierState {
    scheduler: DomainScheduler,
    in_flight: HashSet<String>,
}

/// Crash-recoverable URL frontier shared by all workers
pub struct Frontier {
    store: SharedUrlStore,
    state: Mutex<FrontierState>,
    notify: Notify,
}

impl Frontier {
    /// Open the on-disk frontier described by `config`
    ///
    /// With `restart` set, existing store files are deleted and the frontier
    /// is seeded. Otherwise incomplete records accepted by `policy` are
    /// restored, and an empty store is seeded.
    pub fn open(config: &Config, policy: &dyn UrlPolicy) -> Result<Self> {
        let path = &config.storage.store_path;

        if config.storage.restart {
            let removed = reset_store_files(path).map_err(Error::storage)?;
            tracing::info!(
                path = %path.display(),
                files = removed.len(),
                "Restart requested, deleted persistent frontier"
            );
        }

        let store = SqliteUrlStore::new(path).map_err(Error::storage)?;
        let frontier = Self::with_store(Arc::new(store), config.politeness_interval());

        if !config.storage.restart {
            frontier.restore(policy)?;
        }

        if frontier.store.is_empty().map_err(Error::storage)? {
            tracing::info!(path = %path.display(), "Starting from seed urls");
            frontier.seed(&config.crawler.seed_urls)?;
        }

        Ok(frontier)
    }

    /// Build an empty frontier over an existing store
    pub fn with_store(store: SharedUrlStore, politeness_interval: Duration) -> Self {
        Self {
            store,
            state: Mutex::new(FrontierState {
                scheduler: DomainScheduler::new(politeness_interval),
                in_flight: HashSet::new(),
            }),
            notify: Notify::new(),
        }
    }

    /// Queue every incomplete record in the store that `policy` accepts
    ///
    /// Returns the number of URLs queued.
    pub fn restore(&self, policy: &dyn UrlPolicy) -> Result<usize> {
        let records = self.store.all_records().map_err(Error::storage)?;
        let total = records.len();
        let now = Instant::now();

        let mut restored = 0;
        let mut state = self.lock();
        for record in records.into_iter().filter(|r| !r.completed) {
            if !policy.is_acceptable(&record.url) {
                tracing::debug!(url = %record.url, "Persisted url rejected by policy");
                continue;
            }
            match domain_of(&record.url) {
                Ok(domain) => {
                    state.scheduler.push(&domain, record.url, now);
                    restored += 1;
                }
                Err(e) => tracing::warn!(url = %record.url, error = %e, "Skipping unparseable record"),
            }
        }
        drop(state);

        tracing::info!(
            restored,
            total,
            "Found {restored} urls to be downloaded from {total} total urls discovered"
        );
        Ok(restored)
    }

    /// Add seed URLs; returns how many were new
    pub fn seed(&self, seeds: &[String]) -> Result<usize> {
        let mut added = 0;
        for seed in seeds {
            if self.add(seed)? {
                added += 1;
            }
        }
        tracing::info!(seeds = seeds.len(), added, "Frontier seeded");
        Ok(added)
    }

    /// Add a URL, returning `true` if it was not known before
    ///
    /// The record is durable before the URL becomes visible to `next`.
    /// Re-adding a known URL, in any equivalent spelling, is a no-op.
    pub fn add(&self, url: &str) -> Result<bool> {
        let normalized = normalize_url(url)?;
        let key = hash_key(&normalized)?;
        let domain = domain_of(&normalized)?;

        let record = UrlRecord::new(normalized.clone(), key);
        if !self.store.insert_if_absent(&record).map_err(Error::storage)? {
            return Ok(false);
        }

        self.lock()
            .scheduler
            .push(&domain, normalized, Instant::now());
        self.notify.notify_waiters();
        Ok(true)
    }

    /// Add discovered links, skipping ones that cannot be normalized
    ///
    /// Returns how many were new. Store failures abort the batch.
    pub fn add_many<I, S>(&self, urls: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut added = 0;
        for url in urls {
            let url = url.as_ref();
            match self.add(url) {
                Ok(true) => added += 1,
                Ok(false) => {}
                Err(Error::Frontier(e)) => tracing::debug!(url, error = %e, "Skipping invalid link"),
                Err(e) => return Err(e),
            }
        }
        Ok(added)
    }

    /// Take the next dispatchable URL
    pub fn next(&self) -> NextUrl {
        self.next_at(Instant::now())
    }

    /// [`next`](Self::next) against an explicit clock reading
    pub fn next_at(&self, now: Instant) -> NextUrl {
        let mut state = self.lock();

        match state.scheduler.poll(now) {
            Poll::Ready { url, domain } => {
                tracing::trace!(url = %url, domain = %domain, "Dispatching url");
                state.in_flight.insert(url.clone());
                NextUrl::Ready(url)
            }
            Poll::NotBefore(at) => NextUrl::Throttled {
                retry_after: at.saturating_duration_since(now),
            },
            Poll::Empty if state.in_flight.is_empty() => NextUrl::Empty,
            Poll::Empty => NextUrl::Pending,
        }
    }

    /// Durably mark a URL as processed
    ///
    /// Completing a URL the store has never seen is a consistency problem,
    /// not a failure: it is logged and the URL is recorded as completed so
    /// it can never be queued later.
    pub fn mark_complete(&self, url: &str) -> Result<()> {
        let normalized = normalize_url(url)?;
        let key = hash_key(&normalized)?;

        let known = self.store.mark_completed(&key, &normalized);

        self.lock().in_flight.remove(&normalized);
        self.notify.notify_waiters();

        if !known.map_err(Error::storage)? {
            tracing::warn!(url = %normalized, "Completed a url the frontier never saw");
        }
        Ok(())
    }

    /// URLs queued and not yet dispatched
    pub fn pending(&self) -> usize {
        self.lock().scheduler.len()
    }

    /// URLs dispatched and not yet completed
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight.len()
    }

    /// Snapshot of the queued URLs
    pub fn ready_urls(&self) -> Vec<String> {
        self.lock().scheduler.queued_urls()
    }

    /// Resolves on the next `add` or `mark_complete`
    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }

    /// Backing store
    pub fn store(&self) -> &SharedUrlStore {
        &self.store
    }

    /// Record counts from the backing store
    pub fn stats(&self) -> Result<StoreStats> {
        self.store.stats().map_err(Error::storage)
    }

    fn lock(&self) -> MutexGuard<'_, FrontierState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::policy::AcceptAll;
    use crate::storage::MemoryUrlStore;

    const INTERVAL: Duration = Duration::from_millis(500);

    fn frontier() -> Frontier {
        Frontier::with_store(Arc::new(MemoryUrlStore::new()), INTERVAL)
    }

    #[test]
    fn test_add_is_idempotent_across_spellings() {
        let frontier = frontier();

        assert!(frontier.add("http://a.example/x").unwrap());
        assert!(!frontier.add("http://a.example/x").unwrap());
        assert!(!frontier.add("HTTP://A.EXAMPLE/x/#frag").unwrap());

        assert_eq!(frontier.pending(), 1);
        assert_eq!(frontier.stats().unwrap().total, 1);
    }

    #[test]
    fn test_add_rejects_invalid_url() {
        let frontier = frontier();
        assert!(matches!(frontier.add("not a url"), Err(Error::Frontier(_))));
        assert_eq!(frontier.pending(), 0);
    }

    #[test]
    fn test_add_many_skips_invalid_links() {
        let frontier = frontier();
        let added = frontier
            .add_many(["http://a.example/1", "::bad::", "http://a.example/1", "http://b.example/"])
            .unwrap();
        assert_eq!(added, 2);
    }

    #[test]
    fn test_throttled_is_distinct_from_empty() {
        let frontier = frontier();
        frontier.add("http://d.example/1").unwrap();
        frontier.add("http://d.example/2").unwrap();

        let t0 = Instant::now();
        assert_eq!(
            frontier.next_at(t0),
            NextUrl::Ready("http://d.example/1".into())
        );

        match frontier.next_at(t0 + Duration::from_millis(100)) {
            NextUrl::Throttled { retry_after } => {
                assert_eq!(retry_after, Duration::from_millis(400));
            }
            other => panic!("expected throttled, got {other:?}"),
        }
        assert_eq!(frontier.pending(), 1);
    }

    #[test]
    fn test_pending_until_in_flight_completes() {
        let frontier = frontier();
        frontier.add("http://a.example/x").unwrap();

        let NextUrl::Ready(url) = frontier.next() else {
            panic!("expected a url");
        };
        assert_eq!(frontier.next(), NextUrl::Pending);
        assert_eq!(frontier.in_flight(), 1);

        frontier.mark_complete(&url).unwrap();
        assert_eq!(frontier.in_flight(), 0);
        assert_eq!(frontier.next(), NextUrl::Empty);
    }

    #[test]
    fn test_completed_url_is_never_requeued() {
        let frontier = frontier();
        frontier.add("http://a.example/x").unwrap();
        let NextUrl::Ready(url) = frontier.next() else {
            panic!("expected a url");
        };
        frontier.mark_complete(&url).unwrap();

        assert!(!frontier.add("http://a.example/x").unwrap());
        assert_eq!(frontier.next(), NextUrl::Empty);
    }

    #[test]
    fn test_mark_complete_of_unseen_url_is_recorded() {
        let frontier = frontier();
        frontier.mark_complete("http://never.example/seen").unwrap();

        let key = hash_key("http://never.example/seen").unwrap();
        let record = frontier.store().get(&key).unwrap().unwrap();
        assert!(record.completed);
        assert!(!frontier.add("http://never.example/seen").unwrap());
    }

    #[test]
    fn test_restore_applies_policy() {
        struct OnlyA;
        impl UrlPolicy for OnlyA {
            fn is_acceptable(&self, url: &str) -> bool {
                url.starts_with("http://a.example/")
            }
        }

        let store: SharedUrlStore = Arc::new(MemoryUrlStore::new());
        {
            let first = Frontier::with_store(Arc::clone(&store), INTERVAL);
            first.add("http://a.example/1").unwrap();
            first.add("http://b.example/1").unwrap();
        }

        let all = Frontier::with_store(Arc::clone(&store), INTERVAL);
        assert_eq!(all.restore(&AcceptAll).unwrap(), 2);

        let filtered = Frontier::with_store(store, INTERVAL);
        assert_eq!(filtered.restore(&OnlyA).unwrap(), 1);
        assert_eq!(filtered.ready_urls(), vec!["http://a.example/1"]);
    }

    #[tokio::test]
    async fn test_add_wakes_waiters() {
        let frontier = Arc::new(frontier());

        let waiter = {
            let frontier = Arc::clone(&frontier);
            tokio::spawn(async move {
                let notified = frontier.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                notified.await;
            })
        };

        // Give the waiter a chance to register before adding
        tokio::task::yield_now().await;
        while !waiter.is_finished() {
            frontier.add(&format!("http://a.example/{}", frontier.pending())).unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        waiter.await.unwrap();
    }
}
