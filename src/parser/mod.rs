//! HTML parsing and data extraction
//!
//! The worker pool only depends on the [`LinkExtractor`] and
//! [`TextExtractor`] traits. [`HtmlParser`] implements both with `scraper`.

pub mod sanitize;

use std::collections::HashSet;

use scraper::{Html, Node, Selector};
use url::Url;

use crate::utils::error::ParseError;

/// Elements whose text never counts as page content
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

/// Extracts outbound links from a fetched page
pub trait LinkExtractor: Send + Sync {
    /// Absolute URLs linked from `html`, resolved against `base_url`
    fn extract_links(&self, base_url: &str, html: &str) -> Result<Vec<String>, ParseError>;
}

/// Extracts the plain text used for duplicate detection
pub trait TextExtractor: Send + Sync {
    /// Visible text of `html`, whitespace-normalized
    fn plain_text(&self, html: &str) -> Result<String, ParseError>;
}

/// HTML parser backed by `scraper`
pub struct HtmlParser {
    link_selector: Selector,
}

impl HtmlParser {
    /// Create a new parser instance
    pub fn new() -> Result<Self, ParseError> {
        Ok(Self {
            link_selector: Selector::parse("a[href]")
                .map_err(|e| ParseError::InvalidSelector(format!("a[href]: {e:?}")))?,
        })
    }
}

impl LinkExtractor for HtmlParser {
    fn extract_links(&self, base_url: &str, html: &str) -> Result<Vec<String>, ParseError> {
        let base = Url::parse(base_url)
            .map_err(|e| ParseError::InvalidUrl(format!("{base_url}: {e}")))?;
        let document = Html::parse_document(html);

        let mut seen = HashSet::new();
        let mut links = Vec::new();

        for element in document.select(&self.link_selector) {
            let Some(href) = element.value().attr("href") else {
                continue;
            };
            let href = href.trim();
            if href.is_empty() || href.starts_with('#') {
                continue;
            }

            let Ok(mut resolved) = base.join(href) else {
                tracing::trace!(href, base = %base, "Skipping unresolvable link");
                continue;
            };
            resolved.set_fragment(None);

            let resolved = resolved.to_string();
            if seen.insert(resolved.clone()) {
                links.push(resolved);
            }
        }

        Ok(links)
    }
}

impl TextExtractor for HtmlParser {
    fn plain_text(&self, html: &str) -> Result<String, ParseError> {
        let document = Html::parse_document(html);
        let mut parts = Vec::new();

        for node in document.root_element().descendants() {
            let Node::Text(text) = node.value() else {
                continue;
            };

            let hidden = node.ancestors().any(|ancestor| {
                ancestor
                    .value()
                    .as_element()
                    .is_some_and(|element| SKIPPED_ELEMENTS.contains(&element.name()))
            });
            if !hidden {
                parts.push(&**text);
            }
        }

        let text = sanitize::remove_zero_width(&parts.join(" "));
        Ok(sanitize::normalize_whitespace(&text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r##"
        <html>
          <head>
            <title>Research Groups</title>
            <style>body { color: red; }</style>
            <script>var tracking = "ignore me";</script>
          </head>
          <body>
            <h1>Groups</h1>
            <p>Machine   learning and
               systems.</p>
            <noscript>Enable JavaScript</noscript>
            <a href="/people#faculty">People</a>
            <a href="projects/">Projects</a>
            <a href="https://other.example/x?q=1">Other</a>
            <a href="#top">Top</a>
            <a href="/people">People again</a>
            <a>No href</a>
          </body>
        </html>
    "##;

    #[test]
    fn test_extract_links_resolves_and_dedups() {
        let parser = HtmlParser::new().unwrap();
        let links = parser
            .extract_links("http://a.example/groups/index.html", PAGE)
            .unwrap();

        assert_eq!(
            links,
            vec![
                "http://a.example/people",
                "http://a.example/groups/projects/",
                "https://other.example/x?q=1",
            ]
        );
    }

    #[test]
    fn test_extract_links_rejects_bad_base() {
        let parser = HtmlParser::new().unwrap();
        let result = parser.extract_links("not a url", PAGE);
        assert!(matches!(result, Err(ParseError::InvalidUrl(_))));
    }

    #[test]
    fn test_plain_text_skips_scripts_and_styles() {
        let parser = HtmlParser::new().unwrap();
        let text = parser.plain_text(PAGE).unwrap();

        assert!(text.starts_with("Research Groups Groups Machine learning and systems."));
        assert!(!text.contains("tracking"));
        assert!(!text.contains("color"));
        assert!(!text.contains("JavaScript"));
        assert!(!text.contains("  "));
    }

    #[test]
    fn test_plain_text_of_non_html() {
        let parser = HtmlParser::new().unwrap();
        assert_eq!(parser.plain_text("just\n some   text").unwrap(), "just some text");
        assert_eq!(parser.plain_text("").unwrap(), "");
    }
}
