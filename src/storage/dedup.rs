//! Content deduplication shared by all workers
//!
//! Pages are compared two ways:
//! - an exact checksum over the whitespace-normalized text
//! - a 64-bit simhash fingerprint, where a Hamming distance at or below the
//!   configured threshold marks a near-duplicate
//!
//! Both sets live behind one lock, and the check and the record happen in
//! the same critical section. Two workers holding near-identical pages can
//! therefore never both be told their page is new.
//!
//! Near-duplicate lookup is a linear scan over every accepted fingerprint.
//! This is the scaling ceiling of the detector on large crawls.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::parser::sanitize::normalize_whitespace;
use crate::utils::{sha256_hex, stable_hash64};

/// Default Hamming distance at or below which two fingerprints match
pub const DEFAULT_HAMMING_THRESHOLD: u32 = 3;

// ============================================================================
// Checksum and Fingerprint
// ============================================================================

/// Exact-content checksum (hex SHA-256)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Checksum(String);

impl Checksum {
    /// Hex digest
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 64-bit simhash fingerprint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(pub u64);

impl Fingerprint {
    /// Number of differing bits
    pub fn distance(self, other: Fingerprint) -> u32 {
        hamming_distance(self.0, other.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Count of differing bits between two 64-bit values
pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

/// Checksum of the full text, insensitive to whitespace layout
pub fn checksum(text: &str) -> Checksum {
    Checksum(sha256_hex(normalize_whitespace(text).as_bytes()))
}

/// Token-weighted simhash of the text
///
/// Every whitespace-separated token votes +1 or -1 on each of the 64 bit
/// positions according to its own hash. A bit is set iff its total is
/// positive.
pub fn fingerprint(text: &str) -> Fingerprint {
    let mut weights = [0i64; 64];

    for token in text.split_whitespace() {
        let hash = stable_hash64(token.as_bytes());
        for (bit, weight) in weights.iter_mut().enumerate() {
            if hash & (1u64 << bit) != 0 {
                *weight += 1;
            } else {
                *weight -= 1;
            }
        }
    }

    let value = weights
        .iter()
        .enumerate()
        .filter(|(_, weight)| **weight > 0)
        .fold(0u64, |acc, (bit, _)| acc | (1u64 << bit));

    Fingerprint(value)
}

// ============================================================================
// Verdicts and Statistics
// ============================================================================

/// Result of a duplicate check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupVerdict {
    /// Content was not seen before and has now been recorded
    New,

    /// Same checksum as an accepted page
    ExactDuplicate,

    /// Fingerprint within the threshold of an accepted page
    NearDuplicate { distance: u32 },
}

impl DedupVerdict {
    /// Check if the content was rejected
    pub fn is_duplicate(&self) -> bool {
        !matches!(self, Self::New)
    }

    /// Short label used in log fields
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::ExactDuplicate => "exact",
            Self::NearDuplicate { .. } => "near",
        }
    }
}

/// Detector statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DedupStats {
    /// Distinct exact checksums recorded
    pub checksums: usize,

    /// Fingerprints recorded
    pub fingerprints: usize,
}

// ============================================================================
// Detector
// ============================================================================

#[derive(Default)]
struct DetectorState {
    checksums: HashSet<Checksum>,
    fingerprints: Vec<Fingerprint>,
}

impl DetectorState {
    fn lookup(&self, checksum: &Checksum, fingerprint: Fingerprint, threshold: u32) -> DedupVerdict {
        if self.checksums.contains(checksum) {
            return DedupVerdict::ExactDuplicate;
        }

        self.fingerprints
            .iter()
            .map(|seen| seen.distance(fingerprint))
            .find(|distance| *distance <= threshold)
            .map(|distance| DedupVerdict::NearDuplicate { distance })
            .unwrap_or(DedupVerdict::New)
    }
}

/// Process-wide duplicate detector
///
/// State only grows: once a checksum or fingerprint is recorded it is never
/// removed for the lifetime of the detector.
pub struct DuplicateDetector {
    threshold: u32,
    state: Mutex<DetectorState>,
}

impl DuplicateDetector {
    /// Create a detector with the given Hamming threshold
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            state: Mutex::new(DetectorState::default()),
        }
    }

    /// Hamming threshold in use
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Check the pair and record it if it is new, as one atomic step
    pub fn check_and_record(&self, checksum: Checksum, fingerprint: Fingerprint) -> DedupVerdict {
        let mut state = self.lock();
        let verdict = state.lookup(&checksum, fingerprint, self.threshold);

        if verdict == DedupVerdict::New {
            state.checksums.insert(checksum);
            state.fingerprints.push(fingerprint);
        }

        verdict
    }

    /// Read-only probe; never records anything
    pub fn is_duplicate(&self, checksum: &Checksum, fingerprint: Fingerprint) -> bool {
        self.lock()
            .lookup(checksum, fingerprint, self.threshold)
            .is_duplicate()
    }

    /// Hash `text` and run [`check_and_record`](Self::check_and_record)
    pub fn evaluate(&self, text: &str) -> DedupVerdict {
        let checksum = checksum(text);
        let fingerprint = fingerprint(text);
        self.check_and_record(checksum, fingerprint)
    }

    /// Get detector statistics
    pub fn stats(&self) -> DedupStats {
        let state = self.lock();
        DedupStats {
            checksums: state.checksums.len(),
            fingerprints: state.fingerprints.len(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DetectorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for DuplicateDetector {
    fn default() -> Self {
        Self::new(DEFAULT_HAMMING_THRESHOLD)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn tokens(prefix: &str, n: usize) -> String {
        (0..n)
            .map(|i| format!("{prefix}{i}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_hamming_distance() {
        assert_eq!(hamming_distance(0, 0), 0);
        assert_eq!(hamming_distance(0b1011, 0b0001), 2);
        assert_eq!(hamming_distance(0, u64::MAX), 64);
    }

    #[test]
    fn test_checksum_ignores_whitespace_layout() {
        assert_eq!(checksum("a  b\n\tc"), checksum("a b c"));
        assert_ne!(checksum("a b c"), checksum("a b d"));
        assert_eq!(checksum("x").as_str().len(), 64);
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let text = tokens("token", 50);
        assert_eq!(fingerprint(&text), fingerprint(&text));
        assert_eq!(fingerprint(""), Fingerprint(0));
    }

    #[test]
    fn test_single_token_fingerprint_is_its_hash() {
        assert_eq!(fingerprint("abc"), Fingerprint(stable_hash64(b"abc")));
    }

    #[test]
    fn test_exact_duplicate() {
        let detector = DuplicateDetector::default();
        let text = tokens("word", 30);

        assert_eq!(detector.evaluate(&text), DedupVerdict::New);
        assert_eq!(detector.evaluate(&text), DedupVerdict::ExactDuplicate);
        assert_eq!(detector.stats().checksums, 1);
    }

    #[test]
    fn test_near_duplicate_with_one_inserted_word() {
        let detector = DuplicateDetector::default();
        let base = tokens("token", 300);
        let edited = format!("{base} inserted");

        assert_eq!(detector.evaluate(&base), DedupVerdict::New);
        let verdict = detector.evaluate(&edited);
        assert!(
            matches!(verdict, DedupVerdict::NearDuplicate { distance } if distance <= 3),
            "got {verdict:?}"
        );
        assert_eq!(detector.stats().fingerprints, 1);
    }

    #[test]
    fn test_unrelated_texts_are_both_accepted() {
        let detector = DuplicateDetector::default();
        let a = tokens("token", 300);
        let b = tokens("omega", 300);

        assert!(fingerprint(&a).distance(fingerprint(&b)) > 3);
        assert_eq!(detector.evaluate(&a), DedupVerdict::New);
        assert_eq!(detector.evaluate(&b), DedupVerdict::New);
        assert_eq!(detector.stats().fingerprints, 2);
    }

    #[test]
    fn test_is_duplicate_does_not_record() {
        let detector = DuplicateDetector::default();
        let text = tokens("word", 30);

        assert!(!detector.is_duplicate(&checksum(&text), fingerprint(&text)));
        assert!(!detector.is_duplicate(&checksum(&text), fingerprint(&text)));
        assert_eq!(detector.stats(), DedupStats::default());
    }

    #[test]
    fn test_zero_threshold_only_matches_identical_fingerprints() {
        let detector = DuplicateDetector::new(0);
        let base = tokens("token", 300);

        assert_eq!(
            detector.check_and_record(Checksum("a".into()), fingerprint(&base)),
            DedupVerdict::New
        );
        assert_eq!(
            detector.check_and_record(Checksum("b".into()), fingerprint(&base)),
            DedupVerdict::NearDuplicate { distance: 0 }
        );
        assert_eq!(
            detector.check_and_record(Checksum("c".into()), Fingerprint(fingerprint(&base).0 ^ 1)),
            DedupVerdict::New
        );
    }

    #[test]
    fn test_concurrent_admission_has_single_winner() {
        let detector = Arc::new(DuplicateDetector::default());
        let text = Arc::new(tokens("token", 300));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let detector = Arc::clone(&detector);
                let text = Arc::clone(&text);
                std::thread::spawn(move || {
                    // Half the threads see the page with one extra word
                    let page = if i % 2 == 0 {
                        text.to_string()
                    } else {
                        format!("{text} inserted")
                    };
                    detector.evaluate(&page)
                })
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|verdict| *verdict == DedupVerdict::New)
            .count();
        assert_eq!(admitted, 1);
    }

    #[test]
    fn test_verdict_labels() {
        assert_eq!(DedupVerdict::New.as_str(), "new");
        assert!(DedupVerdict::ExactDuplicate.is_duplicate());
        assert_eq!(DedupVerdict::NearDuplicate { distance: 2 }.as_str(), "near");
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn hamming_is_symmetric_and_bounded(a in any::<u64>(), b in any::<u64>()) {
                prop_assert_eq!(hamming_distance(a, b), hamming_distance(b, a));
                prop_assert!(hamming_distance(a, b) <= 64);
                prop_assert_eq!(hamming_distance(a, a), 0);
            }
        }
    }
}
