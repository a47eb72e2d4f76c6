//! Error types for the wayfarer crawler
//!
//! This module defines the domain-specific error types used by the fetcher,
//! the parser, and the frontier.

use thiserror::Error;

/// Errors that can occur during HTTP fetching operations
#[derive(Error, Debug)]
pub enum FetchError {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Request timeout
    #[error("Request timeout")]
    Timeout,

    /// Maximum retry attempts exceeded
    #[error("Maximum retry attempts exceeded after {attempts} attempts")]
    MaxRetriesExceeded { attempts: u32 },

    /// Response body could not be read
    #[error("Failed to read response body: {0}")]
    Body(String),
}

/// Errors that can occur while parsing fetched content
#[derive(Error, Debug)]
pub enum ParseError {
    /// Base URL of the page could not be parsed
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// A CSS selector failed to compile
    #[error("Invalid selector: {0}")]
    InvalidSelector(String),
}

/// Errors raised by frontier operations
#[derive(Error, Debug)]
pub enum FrontierError {
    /// URL could not be parsed into a crawlable form
    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// URL has no host component
    #[error("URL has no host: {0}")]
    MissingHost(String),
}

impl FetchError {
    /// Transient failures that may succeed on a later attempt
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout => true,
            Self::MaxRetriesExceeded { .. } => false,
            Self::Body(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_recoverable() {
        assert!(FetchError::Timeout.is_recoverable());
        assert!(FetchError::Body("connection reset".into()).is_recoverable());
        assert!(!FetchError::MaxRetriesExceeded { attempts: 3 }.is_recoverable());
    }

    #[test]
    fn test_frontier_error_display() {
        let err = FrontierError::InvalidUrl {
            url: "ht!tp://".to_string(),
            reason: "relative URL without a base".to_string(),
        };
        assert!(err.to_string().contains("ht!tp://"));
    }
}
