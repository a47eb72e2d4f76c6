//! URL acceptance policy
//!
//! Decides which discovered links are worth enqueueing. The frontier also
//! consults the policy when restoring persisted records, so tightening the
//! policy between runs drops URLs that no longer qualify.

use regex::Regex;
use url::Url;

use crate::config::PolicyConfig;
use crate::error::{Error, Result};

/// Decides whether a URL may enter the frontier
pub trait UrlPolicy: Send + Sync {
    fn is_acceptable(&self, url: &str) -> bool;
}

/// Accepts every URL
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl UrlPolicy for AcceptAll {
    fn is_acceptable(&self, _url: &str) -> bool {
        true
    }
}

/// Scheme, domain allow-list, extension deny-list and crawler-trap filtering
#[derive(Debug, Clone)]
pub struct DefaultUrlPolicy {
    allowed_domains: Vec<String>,
    blocked_extension: Option<Regex>,
    trap_query: Option<Regex>,
}

impl DefaultUrlPolicy {
    /// Build the policy from configuration
    pub fn new(config: &PolicyConfig) -> Result<Self> {
        let allowed_domains = config
            .allowed_domains
            .iter()
            .map(|d| d.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .collect();

        let blocked_extension = alternation(&config.blocked_extensions)
            .map(|alts| Regex::new(&format!(r"\.(?:{alts})$")))
            .transpose()
            .map_err(|e| Error::config(format!("Invalid blocked_extensions: {e}")))?;

        let trap_query = alternation(&config.trap_query_params)
            .map(|alts| Regex::new(&format!(r"(?:^|[&;])(?:{alts})=")))
            .transpose()
            .map_err(|e| Error::config(format!("Invalid trap_query_params: {e}")))?;

        Ok(Self {
            allowed_domains,
            blocked_extension,
            trap_query,
        })
    }

    fn domain_allowed(&self, host: &str) -> bool {
        self.allowed_domains.is_empty()
            || self.allowed_domains.iter().any(|allowed| {
                host == allowed
                    || host
                        .strip_suffix(allowed.as_str())
                        .is_some_and(|prefix| prefix.ends_with('.'))
            })
    }
}

impl UrlPolicy for DefaultUrlPolicy {
    fn is_acceptable(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };

        if !matches!(parsed.scheme(), "http" | "https") {
            return false;
        }

        let Some(host) = parsed.host_str() else {
            return false;
        };
        if !self.domain_allowed(&host.to_ascii_lowercase()) {
            return false;
        }

        if let Some(blocked) = &self.blocked_extension {
            if blocked.is_match(&parsed.path().to_ascii_lowercase()) {
                return false;
            }
        }

        if let (Some(trap), Some(query)) = (&self.trap_query, parsed.query()) {
            if trap.is_match(&query.to_ascii_lowercase()) {
                return false;
            }
        }

        true
    }
}

/// `a|b|c` over escaped, lowercased entries; `None` when nothing is listed
fn alternation(entries: &[String]) -> Option<String> {
    let escaped: Vec<String> = entries
        .iter()
        .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .map(|e| regex::escape(&e))
        .collect();

    (!escaped.is_empty()).then(|| escaped.join("|"))
}
