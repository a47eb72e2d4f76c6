//! Unified error handling for the wayfarer crate
//!
//! This module consolidates the domain-specific errors into a single `Error`
//! enum, while keeping the domain errors available for callers that want
//! to match on them directly.
//!
//! # Architecture
//!
//! - [`WayfarerErrorTrait`] - Common interface implemented by the unified error
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use wayfarer::error::{Error, WayfarerErrorTrait};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         tracing::warn!(error = %err, "transient failure");
//!     } else {
//!         tracing::error!(error = %err, category = ?err.category(), "fatal failure");
//!     }
//! }
//! ```

use thiserror::Error;

pub use crate::utils::error::{FetchError, FrontierError, ParseError};

/// Common trait for wayfarer error types
pub trait WayfarerErrorTrait: std::error::Error {
    /// Check if this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Network-related errors (HTTP, timeout)
    Network,
    /// Parsing and data extraction errors
    Parsing,
    /// Persistent store and I/O errors
    Storage,
    /// Frontier bookkeeping errors (bad URLs)
    Frontier,
    /// Configuration and validation errors
    Config,
}

impl ErrorCategory {
    /// Short label used in log fields
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Parsing => "parsing",
            Self::Storage => "storage",
            Self::Frontier => "frontier",
            Self::Config => "config",
        }
    }
}

/// Unified error type for the wayfarer crate
#[derive(Error, Debug)]
pub enum Error {
    /// Fetch-specific errors
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Parse-specific errors
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Frontier errors
    #[error("Frontier error: {0}")]
    Frontier(#[from] FrontierError),

    /// Persistent store errors
    #[error("Storage error: {0:#}")]
    Storage(anyhow::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),
}

impl WayfarerErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Fetch(e) => e.is_recoverable(),
            Self::Parse(_) => false,
            Self::Frontier(_) => false,
            Self::Storage(_) => false,
            Self::Config(_) => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Fetch(_) => ErrorCategory::Network,
            Self::Parse(_) => ErrorCategory::Parsing,
            Self::Frontier(_) => ErrorCategory::Frontier,
            Self::Storage(_) => ErrorCategory::Storage,
            Self::Config(_) => ErrorCategory::Config,
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Wrap a persistent store failure
    pub fn storage(err: anyhow::Error) -> Self {
        Self::Storage(err)
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
