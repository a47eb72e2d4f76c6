//! Text normalization and body decoding
//!
//! This module turns fetched bytes into text and normalizes extracted text
//! before it is counted, checksummed, or fingerprinted.

use encoding_rs::{Encoding, UTF_8};
use regex::Regex;
use std::sync::LazyLock;

// Pre-compiled regex patterns for performance
static WHITESPACE_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

static META_CHARSET_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<meta[^>]+charset\s*=\s*["']?\s*([a-z0-9_\-:.]+)"#).unwrap()
});

/// Number of leading bytes searched for a `<meta charset>` declaration
const META_SNIFF_LIMIT: usize = 1024;

/// Collapse every whitespace run (including newlines) to one space and trim
///
/// # Examples
///
/// ```
/// use wayfarer::parser::sanitize::normalize_whitespace;
///
/// assert_eq!(normalize_whitespace("  Hello \n\n World\t"), "Hello World");
/// ```
pub fn normalize_whitespace(text: &str) -> String {
    WHITESPACE_REGEX.replace_all(text.trim(), " ").into_owned()
}

/// Remove zero-width spaces and similar invisible characters
///
/// Removes U+200B..U+200F, U+2028..U+202F and the byte order mark.
pub fn remove_zero_width(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(*c, '\u{200B}'..='\u{200F}' | '\u{2028}'..='\u{202F}' | '\u{FEFF}'))
        .collect()
}

/// Number of whitespace-separated words
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Check if text has strictly more than `min_words` words
pub fn has_informative_content(text: &str, min_words: usize) -> bool {
    text.split_whitespace().nth(min_words).is_some()
}

/// Charset label from a `Content-Type` header value
///
/// ```
/// use wayfarer::parser::sanitize::charset_from_content_type;
///
/// assert_eq!(
///     charset_from_content_type("text/html; charset=\"ISO-8859-1\""),
///     Some("ISO-8859-1")
/// );
/// assert_eq!(charset_from_content_type("text/html"), None);
/// ```
pub fn charset_from_content_type(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches(|c| c == '"' || c == '\''))
            .filter(|value| !value.is_empty())
    })
}

/// Decode a response body to UTF-8 text
///
/// Resolution order: byte order mark, `Content-Type` charset, `<meta
/// charset>` in the first kilobyte, then UTF-8. Undecodable sequences become
/// U+FFFD rather than failing the page.
pub fn decode_body(bytes: &[u8], content_type: Option<&str>) -> String {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        let (text, _) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
        return text.into_owned();
    }

    let encoding = content_type
        .and_then(charset_from_content_type)
        .and_then(|label| Encoding::for_label(label.as_bytes()))
        .or_else(|| sniff_meta_charset(bytes))
        .unwrap_or(UTF_8);

    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        tracing::debug!(encoding = encoding.name(), "Body contained malformed sequences");
    }
    text.into_owned()
}

fn sniff_meta_charset(bytes: &[u8]) -> Option<&'static Encoding> {
    let head = &bytes[..bytes.len().min(META_SNIFF_LIMIT)];
    let head = String::from_utf8_lossy(head);
    let label = META_CHARSET_REGEX.captures(&head)?.get(1)?.as_str().to_string();
    Encoding::for_label(label.as_bytes())
}
