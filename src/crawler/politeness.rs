//! Per-domain politeness scheduling
//!
//! URLs are queued FIFO per domain, and every domain with queued work has
//! exactly one entry in a min-heap keyed by the earliest instant it may be
//! contacted again. Picking the next URL is a heap peek instead of a scan
//! over the whole ready queue, and a caller blocked purely on politeness
//! learns exactly how long to sleep.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Outcome of polling the scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll {
    /// A URL whose domain is eligible right now
    Ready { url: String, domain: String },

    /// Work is queued, but no domain is eligible before this instant
    NotBefore(Instant),

    /// Nothing is queued
    Empty,
}

/// Min-heap scheduler enforcing a minimum interval between dispatches per domain
#[derive(Debug)]
pub struct DomainScheduler {
    interval: Duration,
    queues: HashMap<String, VecDeque<String>>,
    last_access: HashMap<String, Instant>,
    heap: BinaryHeap<Reverse<(Instant, u64, String)>>,
    seq: u64,
    len: usize,
}

impl DomainScheduler {
    /// Create a scheduler with the given per-domain interval
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            queues: HashMap::new(),
            last_access: HashMap::new(),
            heap: BinaryHeap::new(),
            seq: 0,
            len: 0,
        }
    }

    /// Minimum spacing between two dispatches to one domain
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Queue `url` under `domain`
    pub fn push(&mut self, domain: &str, url: String, now: Instant) {
        self.len += 1;

        if let Some(queue) = self.queues.get_mut(domain) {
            queue.push_back(url);
            return;
        }

        self.queues
            .insert(domain.to_string(), VecDeque::from([url]));

        let eligible = self
            .last_access
            .get(domain)
            .map(|last| self.after_interval(*last))
            .unwrap_or(now);
        self.schedule(domain.to_string(), eligible);
    }

    /// Take the next eligible URL, recording the dispatch time for its domain
    pub fn poll(&mut self, now: Instant) -> Poll {
        loop {
            let Some(Reverse((eligible, _, _))) = self.heap.peek() else {
                return Poll::Empty;
            };
            if *eligible > now {
                return Poll::NotBefore(*eligible);
            }

            let Some(Reverse((_, _, domain))) = self.heap.pop() else {
                return Poll::Empty;
            };

            let Some(queue) = self.queues.get_mut(&domain) else {
                continue;
            };
            let Some(url) = queue.pop_front() else {
                self.queues.remove(&domain);
                continue;
            };

            self.len -= 1;
            self.last_access.insert(domain.clone(), now);

            if queue.is_empty() {
                self.queues.remove(&domain);
            } else {
                self.schedule(domain.clone(), self.after_interval(now));
            }

            return Poll::Ready { url, domain };
        }
    }

    /// Number of queued URLs across all domains
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if no URL is queued
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of domains with queued work
    pub fn domain_count(&self) -> usize {
        self.queues.len()
    }

    /// Last dispatch time for a domain, if any
    pub fn last_access(&self, domain: &str) -> Option<Instant> {
        self.last_access.get(domain).copied()
    }

    /// Queued URLs, in the order their domains become eligible
    pub fn queued_urls(&self) -> Vec<String> {
        let mut entries: Vec<_> = self.heap.iter().map(|Reverse(entry)| entry).collect();
        entries.sort();

        entries
            .into_iter()
            .filter_map(|(_, _, domain)| self.queues.get(domain))
            .flat_map(|queue| queue.iter().cloned())
            .collect()
    }

    fn schedule(&mut self, domain: String, eligible: Instant) {
        self.seq += 1;
        self.heap.push(Reverse((eligible, self.seq, domain)));
    }

    fn after_interval(&self, instant: Instant) -> Instant {
        instant.checked_add(self.interval).unwrap_or(instant)
    }
}
