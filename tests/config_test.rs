//! Tests for config loading

use std::path::Path;
use std::time::Duration;

use wayfarer::config::Config;
use wayfarer::crawler::{DefaultUrlPolicy, UrlPolicy};

#[test]
fn test_config_file_exists() {
    let config_path = Path::new("config.toml");
    assert!(
        config_path.exists(),
        "config.toml should exist in project root"
    );
}

#[test]
fn test_config_toml_loads_and_validates() {
    let config = Config::from_file(Path::new("config.toml")).expect("config.toml should parse");

    assert!(!config.crawler.seed_urls.is_empty());
    assert_eq!(config.crawler.worker_count, 4);
    assert_eq!(config.politeness_interval(), Duration::from_millis(500));
    assert_eq!(config.dedup.near_duplicate_hamming_threshold, 3);
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_toml_policy_accepts_its_own_seeds() {
    let config = Config::from_file(Path::new("config.toml")).unwrap();
    let policy = DefaultUrlPolicy::new(&config.policy).unwrap();

    for seed in &config.crawler.seed_urls {
        assert!(policy.is_acceptable(seed), "seed rejected by policy: {seed}");
    }
    assert!(!policy.is_acceptable("https://www.example.com/"));
    // Extensions come from the built-in default list
    assert!(!policy.is_acceptable("https://www.ics.uci.edu/syllabus.pdf"));
}

#[test]
fn test_missing_config_file_is_an_error() {
    let err = Config::from_file(Path::new("does-not-exist.toml")).unwrap_err();
    assert!(err.to_string().contains("does-not-exist.toml"));
}

#[test]
fn test_malformed_config_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "[crawler]\nworker_count = \"many\"\n").unwrap();

    assert!(Config::from_file(&path).is_err());
}
