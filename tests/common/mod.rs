//! Common test utilities
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use wayfarer::crawler::{
    AcceptAll, Collaborators, FetchResponse, Fetcher, Frontier, UrlPolicy, WorkerPool,
    WorkerSettings,
};
use wayfarer::error::FetchError;
use wayfarer::storage::{DuplicateDetector, MemoryUrlStore, UrlRecord, UrlStore};

/// Canned behavior for one URL
#[derive(Clone)]
pub enum Scripted {
    Page { status: u16, body: String },
    Fail,
    Panic,
}

/// In-process fetcher answering from a fixed script
///
/// Unscripted URLs answer 404 with an empty body.
#[derive(Default)]
pub struct ScriptedFetcher {
    script: HashMap<String, Scripted>,
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, status: u16, body: impl Into<String>) -> Self {
        self.script.insert(
            url.to_string(),
            Scripted::Page {
                status,
                body: body.into(),
            },
        );
        self
    }

    pub fn failing(mut self, url: &str) -> Self {
        self.script.insert(url.to_string(), Scripted::Fail);
        self
    }

    pub fn panicking(mut self, url: &str) -> Self {
        self.script.insert(url.to_string(), Scripted::Panic);
        self
    }

    /// Hold the answer for `url` back by `delay`
    pub fn delayed(mut self, url: &str, delay: Duration) -> Self {
        self.delays.insert(url.to_string(), delay);
        self
    }

    /// URLs fetched so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        if let Some(delay) = self.delays.get(url) {
            tokio::time::sleep(*delay).await;
        }

        match self.script.get(url).cloned() {
            Some(Scripted::Page { status, body }) => Ok(FetchResponse {
                status,
                final_url: url.to_string(),
                content: (!body.is_empty()).then(|| Bytes::from(body)),
                content_type: Some("text/html; charset=utf-8".to_string()),
            }),
            Some(Scripted::Fail) => Err(FetchError::Timeout),
            Some(Scripted::Panic) => panic!("scripted panic for {url}"),
            None => Ok(FetchResponse {
                status: 404,
                final_url: url.to_string(),
                content: None,
                content_type: None,
            }),
        }
    }
}

/// `"{prefix}0 {prefix}1 ..."`
pub fn words(prefix: &str, n: usize) -> String {
    (0..n)
        .map(|i| format!("{prefix}{i}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// HTML page with `n` distinct words of body text and the given links
pub fn html_page(prefix: &str, n: usize, links: &[&str]) -> String {
    let anchors: String = links
        .iter()
        .map(|href| format!(r#"<a href="{href}"></a>"#))
        .collect();
    format!(
        "<html><head><title>{prefix}</title></head><body><p>{}</p>{anchors}</body></html>",
        words(prefix, n)
    )
}

/// Frontier over an in-memory store
pub fn memory_frontier(interval: Duration) -> Arc<Frontier> {
    Arc::new(Frontier::with_store(Arc::new(MemoryUrlStore::new()), interval))
}

/// Settings without sleeps so tests run fast
pub fn fast_settings() -> WorkerSettings {
    WorkerSettings {
        inter_request_delay: Duration::ZERO,
        max_throttle_backoff: Duration::from_millis(50),
        idle_poll: Duration::from_millis(10),
        min_content_words: 20,
    }
}

/// Worker pool using the HTML parser and `policy`
pub fn pool_with_policy(
    frontier: Arc<Frontier>,
    fetcher: Arc<ScriptedFetcher>,
    policy: Arc<dyn UrlPolicy>,
    workers: usize,
) -> WorkerPool {
    WorkerPool::new(
        frontier,
        Arc::new(DuplicateDetector::default()),
        Collaborators::with_html_parser(fetcher, policy).unwrap(),
        fast_settings(),
        workers,
    )
}

/// Worker pool that follows every link
pub fn pool(frontier: Arc<Frontier>, fetcher: Arc<ScriptedFetcher>, workers: usize) -> WorkerPool {
    pool_with_policy(frontier, fetcher, Arc::new(AcceptAll), workers)
}

/// Persisted record for `url`, if any
pub fn record(frontier: &Frontier, url: &str) -> Option<UrlRecord> {
    frontier
        .store()
        .all_records()
        .unwrap()
        .into_iter()
        .find(|r| r.url == url)
}
