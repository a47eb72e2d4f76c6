//! URL normalization and identity
//!
//! Every URL entering the frontier goes through [`normalize_url`], and its
//! persistent identity is the [`hash_key`] of the normalized form.

use url::Url;

use crate::utils::error::FrontierError;
use crate::utils::sha256_hex;

/// Parse and canonicalize a URL
///
/// The canonical form has a lowercase scheme and host, no default port, no
/// fragment, and no trailing slash on non-root paths.
///
/// # Examples
///
/// ```
/// use wayfarer::crawler::url::normalize_url;
///
/// let url = normalize_url("HTTP://Example.COM:80/a/b/#section").unwrap();
/// assert_eq!(url, "http://example.com/a/b");
/// ```
pub fn normalize_url(raw: &str) -> Result<String, FrontierError> {
    let mut parsed = Url::parse(raw.trim()).map_err(|e| FrontierError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    if parsed.cannot_be_a_base() || parsed.host_str().is_none() {
        return Err(FrontierError::MissingHost(raw.to_string()));
    }

    parsed.set_fragment(None);

    let trimmed = parsed.path().trim_end_matches('/').to_string();
    if trimmed.is_empty() {
        parsed.set_path("/");
    } else {
        parsed.set_path(&trimmed);
    }

    Ok(parsed.to_string())
}

/// Network location of a URL: host plus explicit port
///
/// This is the unit politeness throttling is applied to.
pub fn domain_of(url: &str) -> Result<String, FrontierError> {
    let parsed = Url::parse(url).map_err(|e| FrontierError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    netloc(&parsed).ok_or_else(|| FrontierError::MissingHost(url.to_string()))
}

/// Stable identity of a normalized URL
///
/// Hex SHA-256 over `netloc/path/query`. The scheme is deliberately left out,
/// so `http://` and `https://` variants of a page share one record.
pub fn hash_key(url: &str) -> Result<String, FrontierError> {
    let parsed = Url::parse(url).map_err(|e| FrontierError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    let netloc = netloc(&parsed).ok_or_else(|| FrontierError::MissingHost(url.to_string()))?;

    let identity = format!(
        "{netloc}/{}/{}",
        parsed.path().trim_end_matches('/'),
        parsed.query().unwrap_or("")
    );
    Ok(sha256_hex(identity.as_bytes()))
}

fn netloc(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_lowercases_scheme_and_host() {
        assert_eq!(
            normalize_url("HTTPS://WWW.ICS.UCI.EDU/About").unwrap(),
            "https://www.ics.uci.edu/About"
        );
    }

    #[test]
    fn test_normalize_strips_fragment_and_trailing_slash() {
        assert_eq!(
            normalize_url("http://a.example/x/#top").unwrap(),
            "http://a.example/x"
        );
        assert_eq!(normalize_url("http://a.example").unwrap(), "http://a.example/");
    }

    #[test]
    fn test_normalize_keeps_query() {
        assert_eq!(
            normalize_url("http://a.example/search?q=rust#results").unwrap(),
            "http://a.example/search?q=rust"
        );
    }

    #[test]
    fn test_normalize_drops_default_port() {
        assert_eq!(
            normalize_url("http://a.example:80/x").unwrap(),
            "http://a.example/x"
        );
        assert_eq!(
            normalize_url("http://a.example:8080/x").unwrap(),
            "http://a.example:8080/x"
        );
    }

    #[test]
    fn test_normalize_rejects_relative_and_hostless() {
        assert!(matches!(
            normalize_url("/relative"),
            Err(FrontierError::InvalidUrl { .. })
        ));
        assert!(matches!(
            normalize_url("mailto:someone@example.com"),
            Err(FrontierError::MissingHost(_))
        ));
    }

    #[test]
    fn test_hash_key_ignores_scheme() {
        let http = hash_key("http://a.example/x").unwrap();
        let https = hash_key("https://a.example/x").unwrap();
        assert_eq!(http, https);
        assert_eq!(http.len(), 64);
    }

    #[test]
    fn test_hash_key_distinguishes_path_and_query() {
        let a = hash_key("http://a.example/x").unwrap();
        let b = hash_key("http://a.example/y").unwrap();
        let c = hash_key("http://a.example/x?v=1").unwrap();
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_domain_of_includes_explicit_port() {
        assert_eq!(domain_of("http://a.example/x").unwrap(), "a.example");
        assert_eq!(domain_of("http://127.0.0.1:4000/x").unwrap(), "127.0.0.1:4000");
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn normalization_is_idempotent(path in "[a-z0-9]{1,8}(/[a-z0-9]{1,8}){0,3}/?", frag in "[a-z]{0,5}") {
                let raw = format!("HTTP://Host.Example/{path}#{frag}");
                let once = normalize_url(&raw).unwrap();
                let twice = normalize_url(&once).unwrap();
                prop_assert_eq!(&once, &twice);
                prop_assert_eq!(hash_key(&once).unwrap(), hash_key(&twice).unwrap());
            }
        }
    }
}
