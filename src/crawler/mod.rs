//! Crawling: the frontier, politeness, fetching and the worker pool
//!
//! A crawl is a [`WorkerPool`] of workers sharing one [`Frontier`] and one
//! [`DuplicateDetector`](crate::storage::DuplicateDetector). Workers pull
//! URLs from the frontier, fetch them through a [`Fetcher`], and feed the
//! links of every new page back into the frontier through the
//! [`UrlPolicy`].

pub mod fetcher;
pub mod frontier;
pub mod pipeline;
pub mod policy;
pub mod politeness;
pub mod url;

pub use fetcher::{FetchResponse, Fetcher, HttpFetcher};
pub use frontier::{Frontier, NextUrl};
pub use pipeline::{
    Collaborators, IterationOutcome, PipelineStats, ShutdownHandle, SkipReason, StatsSnapshot,
    Worker, WorkerPool, WorkerSettings, WorkerState,
};
pub use policy::{AcceptAll, DefaultUrlPolicy, UrlPolicy};
pub use politeness::DomainScheduler;
