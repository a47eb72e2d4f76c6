//! Worker pool driving the crawl
//!
//! Every worker is a small state machine over the shared [`Frontier`] and
//! [`DuplicateDetector`]:
//!
//! ```text
//!            ┌──────────────────────────────────────────────┐
//!            ▼                                              │
//!   ┌──────────────┐ url  ┌──────────┐     ┌────────────┐   │   ┌─────────────┐
//!   │ AWAITING_URL │─────▶│ FETCHING │────▶│ EVALUATING │───┴──▶│ DISPATCHING │
//!   └──────────────┘      └──────────┘     └────────────┘       └─────────────┘
//!      │    ▲  throttled / pending                                     │
//!      │    └──────────── sleep ──────────────────────────  mark complete, delay
//!      │ empty / shutdown
//!      ▼
//!   ┌────────────┐
//!   │ TERMINATED │
//!   └────────────┘
//! ```
//!
//! A panic anywhere between FETCHING and DISPATCHING is caught, logged with
//! the URL, and the URL is marked complete so a broken page cannot be
//! retried forever. The worker carries on with the next URL.
//!
//! Frontier writes fsync the store, so they run on tokio's blocking pool
//! rather than on the worker's runtime thread.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::watch;

use crate::config::Config;
use crate::crawler::fetcher::{FetchResponse, Fetcher};
use crate::crawler::frontier::{Frontier, NextUrl};
use crate::crawler::policy::UrlPolicy;
use crate::error::{Error, Result, WayfarerErrorTrait};
use crate::parser::sanitize::{has_informative_content, word_count};
use crate::parser::{HtmlParser, LinkExtractor, TextExtractor};
use crate::storage::dedup::{DedupVerdict, DuplicateDetector};
use crate::utils::error::FetchError;

// ============================================================================
// Configuration
// ============================================================================

/// Per-worker timing and content settings
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Sleep after each processed URL
    pub inter_request_delay: Duration,

    /// Longest single sleep while every domain is throttled
    pub max_throttle_backoff: Duration,

    /// Sleep while the queue is empty but other workers are busy
    pub idle_poll: Duration,

    /// Pages with this many words or fewer are not expanded
    pub min_content_words: usize,
}

impl WorkerSettings {
    /// Settings from the crawler configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            inter_request_delay: config.inter_request_delay(),
            max_throttle_backoff: config.max_throttle_backoff(),
            idle_poll: config.idle_poll(),
            min_content_words: config.crawler.min_content_words,
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// External collaborators a worker calls into
#[derive(Clone)]
pub struct Collaborators {
    pub fetcher: Arc<dyn Fetcher>,
    pub links: Arc<dyn LinkExtractor>,
    pub text: Arc<dyn TextExtractor>,
    pub policy: Arc<dyn UrlPolicy>,
}

impl Collaborators {
    /// Use [`HtmlParser`] for both link and text extraction
    pub fn with_html_parser(fetcher: Arc<dyn Fetcher>, policy: Arc<dyn UrlPolicy>) -> Result<Self> {
        let parser = Arc::new(HtmlParser::new()?);
        Ok(Self {
            fetcher,
            links: parser.clone(),
            text: parser,
            policy,
        })
    }
}

// ============================================================================
// Pipeline Statistics
// ============================================================================

/// Pipeline statistics (thread-safe)
#[derive(Debug, Default)]
pub struct PipelineStats {
    /// URLs handed to a worker
    pub dispatched: AtomicU64,

    /// Fetches that produced a response
    pub fetched: AtomicU64,

    /// Iterations that hit an error or a panic
    pub failed: AtomicU64,

    /// Pages not expanded (bad status, empty or thin content)
    pub skipped: AtomicU64,

    /// Pages rejected as exact or near duplicates
    pub duplicates: AtomicU64,

    /// New URLs added to the frontier
    pub links_added: AtomicU64,
}

impl PipelineStats {
    /// Create new stats counter
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    /// Get snapshot of current stats
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            fetched: self.fetched.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            links_added: self.links_added.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of pipeline statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub dispatched: u64,
    pub fetched: u64,
    pub failed: u64,
    pub skipped: u64,
    pub duplicates: u64,
    pub links_added: u64,
}

impl StatsSnapshot {
    /// Share of dispatched URLs that were expanded (0.0 - 1.0)
    pub fn expansion_rate(&self) -> f64 {
        if self.dispatched == 0 {
            return 1.0;
        }
        let expanded = self
            .dispatched
            .saturating_sub(self.failed + self.skipped + self.duplicates);
        expanded as f64 / self.dispatched as f64
    }
}

// ============================================================================
// Worker State Machine
// ============================================================================

/// Observable worker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    AwaitingUrl,
    Fetching,
    Evaluating,
    Dispatching,
    Terminated,
}

impl WorkerState {
    /// Short label used in log fields
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingUrl => "awaiting_url",
            Self::Fetching => "fetching",
            Self::Evaluating => "evaluating",
            Self::Dispatching => "dispatching",
            Self::Terminated => "terminated",
        }
    }
}

/// Why a fetched page was not expanded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Non-2xx status
    Status(u16),

    /// No response body
    EmptyBody,

    /// Too few words to be worth expanding
    ThinContent { words: usize },
}

/// How one URL was processed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    /// Page accepted; `links_added` new URLs entered the frontier
    Expanded { links_added: usize },

    /// Page rejected by the duplicate detector
    Duplicate(DedupVerdict),

    /// Page fetched but not expanded
    Skipped(SkipReason),

    /// Fetch, extraction, or the iteration itself failed
    Failed,
}

/// A page whose links should be followed
struct Page {
    base_url: String,
    html: String,
}

enum Stage {
    AwaitingUrl,
    Fetching {
        url: String,
    },
    Evaluating {
        url: String,
        response: std::result::Result<FetchResponse, FetchError>,
    },
    Dispatching {
        url: String,
        page: Option<Page>,
        outcome: IterationOutcome,
    },
    Terminated,
}

impl Stage {
    fn state(&self) -> WorkerState {
        match self {
            Self::AwaitingUrl => WorkerState::AwaitingUrl,
            Self::Fetching { .. } => WorkerState::Fetching,
            Self::Evaluating { .. } => WorkerState::Evaluating,
            Self::Dispatching { .. } => WorkerState::Dispatching,
            Self::Terminated => WorkerState::Terminated,
        }
    }

    fn url(&self) -> Option<&str> {
        match self {
            Self::Fetching { url } | Self::Evaluating { url, .. } | Self::Dispatching { url, .. } => {
                Some(url)
            }
            Self::AwaitingUrl | Self::Terminated => None,
        }
    }
}

/// One crawl worker
pub struct Worker {
    id: usize,
    stage: Stage,
    frontier: Arc<Frontier>,
    detector: Arc<DuplicateDetector>,
    collaborators: Collaborators,
    settings: WorkerSettings,
    stats: Arc<PipelineStats>,
    shutdown: watch::Receiver<bool>,
    shutdown_open: bool,
    throttle_streak: u32,
    last_outcome: Option<IterationOutcome>,
}

impl Worker {
    /// Current state
    pub fn state(&self) -> WorkerState {
        self.stage.state()
    }

    /// Worker identifier used in logs
    pub fn id(&self) -> usize {
        self.id
    }

    /// Run until the frontier is exhausted or shutdown is requested
    pub async fn run(mut self) {
        tracing::debug!(worker_id = self.id, "Worker started");
        while self.step().await != WorkerState::Terminated {}
        tracing::info!(worker_id = self.id, "Worker terminated");
    }

    /// Process a single URL from AWAITING_URL back to AWAITING_URL
    ///
    /// Returns `None` if the worker terminated before completing a URL.
    pub async fn run_once(&mut self) -> Option<IterationOutcome> {
        loop {
            match self.step().await {
                WorkerState::Terminated => return self.last_outcome.take(),
                WorkerState::AwaitingUrl if self.last_outcome.is_some() => {
                    return self.last_outcome.take();
                }
                _ => {}
            }
        }
    }

    /// Perform one state transition and return the new state
    pub async fn step(&mut self) -> WorkerState {
        let stage = std::mem::replace(&mut self.stage, Stage::Terminated);
        let url = stage.url().map(str::to_string);
        let from = stage.state();

        let next = match AssertUnwindSafe(self.advance(stage)).catch_unwind().await {
            Ok(next) => next,
            Err(payload) => {
                let cause = panic_message(payload.as_ref());
                match url {
                    Some(url) => {
                        tracing::error!(
                            worker_id = self.id,
                            url = %url,
                            state = from.as_str(),
                            cause = %cause,
                            "Worker iteration panicked"
                        );
                        self.finish(&url, IterationOutcome::Failed).await;
                    }
                    None => {
                        Self::bump(&self.stats.failed);
                        tracing::error!(
                            worker_id = self.id,
                            state = from.as_str(),
                            cause = %cause,
                            "Worker panicked while waiting for work"
                        );
                    }
                }
                Stage::AwaitingUrl
            }
        };

        self.stage = next;
        self.stage.state()
    }

    async fn advance(&mut self, stage: Stage) -> Stage {
        match stage {
            Stage::AwaitingUrl => self.await_url().await,
            Stage::Fetching { url } => {
                let response = self.collaborators.fetcher.fetch(&url).await;
                if response.is_ok() {
                    Self::bump(&self.stats.fetched);
                }
                Stage::Evaluating { url, response }
            }
            Stage::Evaluating { url, response } => self.evaluate(url, response),
            Stage::Dispatching { url, page, outcome } => {
                self.dispatch(url, page, outcome).await;
                Stage::AwaitingUrl
            }
            Stage::Terminated => Stage::Terminated,
        }
    }

    async fn await_url(&mut self) -> Stage {
        if *self.shutdown.borrow() {
            tracing::info!(worker_id = self.id, "Shutdown requested");
            return Stage::Terminated;
        }

        match self.frontier.next() {
            NextUrl::Ready(url) => {
                self.throttle_streak = 0;
                Self::bump(&self.stats.dispatched);
                tracing::debug!(worker_id = self.id, url = %url, "Dispatched url");
                Stage::Fetching { url }
            }
            NextUrl::Throttled { retry_after } => {
                self.throttle_streak = self.throttle_streak.saturating_add(1);
                let wait = retry_after.min(self.settings.max_throttle_backoff);
                tracing::trace!(
                    worker_id = self.id,
                    wait_ms = wait.as_millis() as u64,
                    streak = self.throttle_streak,
                    "All ready domains throttled"
                );
                self.pause(wait).await;
                Stage::AwaitingUrl
            }
            NextUrl::Pending => {
                self.pause(self.settings.idle_poll).await;
                Stage::AwaitingUrl
            }
            NextUrl::Empty => {
                tracing::info!(worker_id = self.id, "Frontier is empty, stopping worker");
                Stage::Terminated
            }
        }
    }

    fn evaluate(
        &self,
        url: String,
        response: std::result::Result<FetchResponse, FetchError>,
    ) -> Stage {
        let skip = |url: String, reason: SkipReason| Stage::Dispatching {
            url,
            page: None,
            outcome: IterationOutcome::Skipped(reason),
        };
        let fail = |url: String| Stage::Dispatching {
            url,
            page: None,
            outcome: IterationOutcome::Failed,
        };

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(worker_id = self.id, url = %url, error = %e, "Fetch failed");
                return fail(url);
            }
        };

        tracing::info!(
            worker_id = self.id,
            url = %url,
            status = response.status,
            final_url = %response.final_url,
            "Downloaded"
        );

        if !response.is_success() {
            return skip(url, SkipReason::Status(response.status));
        }

        let Some(html) = response.text() else {
            return skip(url, SkipReason::EmptyBody);
        };

        let text = match self.collaborators.text.plain_text(&html) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(worker_id = self.id, url = %url, error = %e, "Text extraction failed");
                return fail(url);
            }
        };

        if !has_informative_content(&text, self.settings.min_content_words) {
            let words = word_count(&text);
            tracing::debug!(worker_id = self.id, url = %url, words, "Page has too little text");
            return skip(url, SkipReason::ThinContent { words });
        }

        let verdict = self.detector.evaluate(&text);
        if verdict.is_duplicate() {
            tracing::info!(
                worker_id = self.id,
                url = %url,
                verdict = verdict.as_str(),
                "Skipping duplicate page"
            );
            return Stage::Dispatching {
                url,
                page: None,
                outcome: IterationOutcome::Duplicate(verdict),
            };
        }

        Stage::Dispatching {
            url,
            page: Some(Page {
                base_url: response.final_url,
                html,
            }),
            outcome: IterationOutcome::Expanded { links_added: 0 },
        }
    }

    async fn dispatch(&mut self, url: String, page: Option<Page>, outcome: IterationOutcome) {
        let outcome = match page {
            Some(page) => self.expand(&url, &page).await,
            None => outcome,
        };
        self.finish(&url, outcome).await;
    }

    async fn expand(&self, url: &str, page: &Page) -> IterationOutcome {
        let links = match self.collaborators.links.extract_links(&page.base_url, &page.html) {
            Ok(links) => links,
            Err(e) => {
                tracing::error!(worker_id = self.id, url, error = %e, "Link extraction failed");
                return IterationOutcome::Failed;
            }
        };

        let found = links.len();
        let accepted: Vec<String> = links
            .into_iter()
            .filter(|link| self.collaborators.policy.is_acceptable(link))
            .collect();

        let accepted_count = accepted.len();

        match self.with_frontier(move |frontier| frontier.add_many(&accepted)).await {
            Ok(links_added) => {
                tracing::debug!(
                    worker_id = self.id,
                    url,
                    found,
                    accepted = accepted_count,
                    added = links_added,
                    "Expanded page"
                );
                IterationOutcome::Expanded { links_added }
            }
            Err(e) => {
                tracing::error!(
                    worker_id = self.id,
                    url,
                    category = e.category().as_str(),
                    error = %e,
                    "Failed to enqueue links"
                );
                IterationOutcome::Failed
            }
        }
    }

    /// Mark `url` complete, record the outcome, then apply the inter-request delay
    async fn finish(&mut self, url: &str, outcome: IterationOutcome) {
        let completed = url.to_string();
        if let Err(e) = self
            .with_frontier(move |frontier| frontier.mark_complete(&completed))
            .await
        {
            tracing::error!(
                worker_id = self.id,
                url,
                category = e.category().as_str(),
                error = %e,
                "Failed to mark url complete"
            );
        }

        match outcome {
            IterationOutcome::Expanded { links_added } => {
                PipelineStats::bump(&self.stats.links_added, links_added as u64);
            }
            IterationOutcome::Duplicate(_) => Self::bump(&self.stats.duplicates),
            IterationOutcome::Skipped(_) => Self::bump(&self.stats.skipped),
            IterationOutcome::Failed => Self::bump(&self.stats.failed),
        }
        self.last_outcome = Some(outcome);

        if !self.settings.inter_request_delay.is_zero() {
            self.sleep_unless_shutdown(self.settings.inter_request_delay).await;
        }
    }

    /// Run a store-backed frontier operation on the blocking pool
    async fn with_frontier<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Frontier) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let frontier = Arc::clone(&self.frontier);
        tokio::task::spawn_blocking(move || op(&frontier))
            .await
            .map_err(|e| Error::storage(anyhow::anyhow!("frontier task failed: {e}")))?
    }

    /// Sleep up to `duration`, waking early on frontier activity or shutdown
    async fn pause(&mut self, duration: Duration) {
        let closed = tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = self.frontier.notified() => false,
            changed = self.shutdown.changed(), if self.shutdown_open => changed.is_err(),
        };
        if closed {
            self.shutdown_open = false;
        }
    }

    async fn sleep_unless_shutdown(&mut self, duration: Duration) {
        let closed = tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            changed = self.shutdown.changed(), if self.shutdown_open => changed.is_err(),
        };
        if closed {
            self.shutdown_open = false;
        }
    }

    fn bump(counter: &AtomicU64) {
        PipelineStats::bump(counter, 1);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

// ============================================================================
// Pool
// ============================================================================

/// Requests a cooperative shutdown of every worker
///
/// Workers finish their current iteration, then terminate.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    /// Trigger shutdown
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    /// Check whether shutdown was requested
    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Fixed-size pool of crawl workers
pub struct WorkerPool {
    frontier: Arc<Frontier>,
    detector: Arc<DuplicateDetector>,
    collaborators: Collaborators,
    settings: WorkerSettings,
    worker_count: usize,
    stats: Arc<PipelineStats>,
    shutdown: watch::Sender<bool>,
}

impl WorkerPool {
    /// Create a pool of `worker_count` workers
    pub fn new(
        frontier: Arc<Frontier>,
        detector: Arc<DuplicateDetector>,
        collaborators: Collaborators,
        settings: WorkerSettings,
        worker_count: usize,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            frontier,
            detector,
            collaborators,
            settings,
            worker_count: worker_count.max(1),
            stats: PipelineStats::new(),
            shutdown,
        }
    }

    /// Handle that stops the pool from another task
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown.clone(),
        }
    }

    /// Build a worker sharing this pool's state
    pub fn worker(&self, id: usize) -> Worker {
        Worker {
            id,
            stage: Stage::AwaitingUrl,
            frontier: Arc::clone(&self.frontier),
            detector: Arc::clone(&self.detector),
            collaborators: self.collaborators.clone(),
            settings: self.settings.clone(),
            stats: Arc::clone(&self.stats),
            shutdown: self.shutdown.subscribe(),
            shutdown_open: true,
            throttle_streak: 0,
            last_outcome: None,
        }
    }

    /// Current statistics
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Run every worker to termination
    pub async fn run(&self) -> StatsSnapshot {
        tracing::info!(
            workers = self.worker_count,
            pending = self.frontier.pending(),
            "Starting worker pool"
        );

        let handles: Vec<_> = (0..self.worker_count)
            .map(|id| tokio::spawn(self.worker(id).run()))
            .collect();

        for (id, handle) in handles.into_iter().enumerate() {
            if let Err(e) = handle.await {
                tracing::error!(worker_id = id, error = %e, "Worker task aborted");
            }
        }

        let snapshot = self.stats.snapshot();
        tracing::info!(
            dispatched = snapshot.dispatched,
            fetched = snapshot.fetched,
            failed = snapshot.failed,
            skipped = snapshot.skipped,
            duplicates = snapshot.duplicates,
            links_added = snapshot.links_added,
            "Worker pool finished"
        );
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_snapshot() {
        let stats = PipelineStats::new();
        PipelineStats::bump(&stats.dispatched, 4);
        PipelineStats::bump(&stats.duplicates, 1);
        PipelineStats::bump(&stats.links_added, 7);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.dispatched, 4);
        assert_eq!(snapshot.links_added, 7);
        assert!((snapshot.expansion_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(StatsSnapshot::default().expansion_rate(), 1.0);
    }

    #[test]
    fn test_worker_state_labels() {
        assert_eq!(WorkerState::AwaitingUrl.as_str(), "awaiting_url");
        assert_eq!(WorkerState::Terminated.as_str(), "terminated");
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned boom"));
        assert_eq!(panic_message(payload.as_ref()), "owned boom");

        let payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }

    #[test]
    fn test_shutdown_handle_without_workers() {
        let (tx, _) = watch::channel(false);
        let handle = ShutdownHandle { tx };
        assert!(!handle.is_shutdown());
        handle.shutdown();
        assert!(handle.is_shutdown());
    }

    #[test]
    fn test_default_settings() {
        let settings = WorkerSettings::default();
        assert_eq!(settings.min_content_words, 20);
        assert_eq!(settings.inter_request_delay, Duration::from_millis(500));
    }
}
