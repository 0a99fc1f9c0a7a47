//! Configuration file tests.
//!
//! Run with: `cargo test --test config_loading`

use std::path::Path;

use icpslam::{Error, MatcherType, SlamConfig};

#[test]
fn test_shipped_config_matches_defaults() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("icpslam.toml");

    let config = SlamConfig::from_file(&path).unwrap();

    assert_eq!(config, SlamConfig::default());
}

#[test]
fn test_explicit_path_wins() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("custom.toml");
    std::fs::write(&path, "[matcher]\nalgorithm = \"icp\"\n[loop_closure]\nenabled = false\n").unwrap();

    let (config, source) = SlamConfig::load(Some(&path)).unwrap();

    assert_eq!(source.as_deref(), Some(path.as_path()));
    assert_eq!(config.matcher.algorithm, MatcherType::Icp);
    assert!(!config.loop_closure.enabled);
    assert_eq!(config.optimizer.max_iterations, 10);
}

#[test]
fn test_unknown_matcher_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[matcher]\nalgorithm = \"ndt\"\n").unwrap();

    assert!(matches!(SlamConfig::from_file(&path), Err(Error::ConfigParse(_))));
}

#[test]
fn test_invalid_optimizer_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[optimizer]\nmax_iterations = 0\n").unwrap();

    assert!(matches!(SlamConfig::from_file(&path), Err(Error::InvalidParameter(_))));
}
