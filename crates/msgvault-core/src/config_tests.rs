//! Unit tests for configuration loading.

use super::*;

#[test]
fn defaults_point_at_the_messages_store() {
    let config = Config::default();
    assert!(config.store_path.ends_with("Library/Messages/chat.db"));
    assert_eq!(config.converter.binary, "plutil");
    assert_eq!(config.search.default_limit, 20);
    assert!(config.search.fallback_cap >= config.search.fallback_multiplier);
}

#[test]
fn load_from_path_parses_partial_config() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
store_path = "/tmp/fixture-chat.db"
query_timeout_ms = 500

[search]
default_limit = 5
"#,
    )
    .expect("write config");

    let config = Config::load_from_path(&path).expect("load");
    assert_eq!(config.store_path, PathBuf::from("/tmp/fixture-chat.db"));
    assert_eq!(config.query_timeout_ms, 500);
    assert_eq!(config.search.default_limit, 5);
    // Unspecified sections keep their defaults.
    assert_eq!(config.search.max_limit, 100);
    assert_eq!(config.converter.binary, "plutil");
}

#[test]
fn load_from_path_rejects_invalid_toml() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "store_path = [not toml").expect("write config");

    let err = Config::load_from_path(&path).expect_err("should fail");
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn ensure_at_creates_defaults_when_missing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("nested").join("config.toml");

    let config = Config::ensure_at(&path).expect("ensure");
    assert!(path.exists());
    assert_eq!(config.converter.binary, "plutil");

    // A second call loads the file it just wrote.
    let reloaded = Config::ensure_at(&path).expect("reload");
    assert_eq!(reloaded.query_timeout_ms, config.query_timeout_ms);
}

#[test]
fn expand_path_resolves_tilde() {
    let expanded = Config::expand_path("~/somewhere/chat.db");
    assert!(!expanded.to_string_lossy().starts_with('~'));
}
