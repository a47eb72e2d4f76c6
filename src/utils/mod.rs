//! Common utilities and helper functions
//!
//! This module provides the stable hashing helpers shared by the frontier
//! and the duplicate detector, plus small formatting helpers for the CLI.

pub mod error;

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 digest of `bytes`
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Stable 64-bit hash: the first eight bytes of the SHA-256 digest, little-endian
///
/// Unlike `std::hash::DefaultHasher`, the value is identical across processes
/// and platforms, which keeps fingerprints comparable between runs.
pub fn stable_hash64(bytes: &[u8]) -> u64 {
    let digest = Sha256::digest(bytes);
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(head)
}

/// Truncate text to a maximum number of characters
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}

/// Format byte size as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];

    if bytes == 0 {
        return String::from("0 B");
    }

    let base: f64 = 1024.0;
    let exponent = (bytes as f64).log(base).floor() as usize;
    let exponent = exponent.min(UNITS.len() - 1);

    let value = bytes as f64 / base.powi(exponent as i32);

    format!("{value:.2} {}", UNITS[exponent])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_stable_hash64_is_digest_prefix() {
        // ba 78 16 bf 8f 01 cf ea read little-endian
        assert_eq!(stable_hash64(b"abc"), 0xeacf018fbf1678ba);
        assert_ne!(stable_hash64(b"abc"), stable_hash64(b"abd"));
    }

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("short", 10), "short");
        assert_eq!(truncate_text("very long text here", 10), "very lo...");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1_048_576), "1.00 MB");
    }
}
