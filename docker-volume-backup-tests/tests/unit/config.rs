//! Tests for configuration loading and the values derived from it

use chrono::{Local, TimeZone, Utc};
use docker_volume_backup::config::{self, load_config, ConfigError};
use rstest::rstest;
use std::fs;
use test_utils::{full_config_toml, minimal_config_toml, render_config, TestContext};

#[test]
fn test_minimal_config_loads_with_defaults() {
    let ctx = TestContext::new();
    let content = render_config(minimal_config_toml(), ctx.temp_dir());
    let path = ctx.create_file("minimal.toml", &content);

    let config = load_config(&path).unwrap();

    assert_eq!(config.backup.filename, "backup-%Y-%m-%dT%H-%M-%S.tar.gz");
    assert_eq!(config.backup.stop_during_backup_label, "true");
    assert_eq!(config.backup.pruning_leeway_seconds, 60);
    assert!(config.backup.retention_days.is_none());
    assert!(config.storage.local.is_some());
    assert!(config.storage.s3.is_none());
}

#[test]
fn test_full_config_loads_every_section() {
    let ctx = TestContext::new();
    let content = render_config(full_config_toml(), ctx.temp_dir());
    let path = ctx.create_file("full.toml", &content);

    let config = load_config(&path).unwrap();

    assert_eq!(config.backup.retention_days, Some(7));
    assert_eq!(config.backup.skip_backends_from_prune, vec!["s3".to_string()]);
    assert_eq!(config.backup.exec_label.as_deref(), Some("db"));
    assert_eq!(config.notifications.level, "info");
    assert_eq!(config.logging.max_files, 3);
    assert_eq!(config.storage.ssh.as_ref().unwrap().port, 22);
    assert!(config.storage.s3.as_ref().unwrap().path_style);
    assert_eq!(config::pruning_prefix(&config.backup), "nightly-");
}

#[rstest]
#[case::no_storage("[backup]\nretention_days = 7\n")]
#[case::no_sources("[backup]\nsources = []\n[storage.local]\narchive = \"/a\"\n")]
#[case::slash_in_filename("[backup]\nfilename = \"a/b.tar.gz\"\n[storage.local]\narchive = \"/a\"\n")]
#[case::bad_level("[notifications]\nlevel = \"loud\"\n[storage.local]\narchive = \"/a\"\n")]
#[case::empty_label("[backup]\nstop_during_backup_label = \"\"\n[storage.local]\narchive = \"/a\"\n")]
#[case::webdav_scheme("[storage.webdav]\nurl = \"ftp://host\"\n")]
#[case::dropbox_chunk("[storage.dropbox]\nrefresh_token = \"r\"\napp_key = \"k\"\napp_secret = \"s\"\nchunk_size_mb = 200\n")]
fn test_invalid_configs_are_rejected(#[case] content: &str) {
    let ctx = TestContext::new();
    let path = ctx.create_file("invalid.toml", content);

    let result = load_config(&path);

    assert!(
        matches!(result, Err(ConfigError::ValidationError(_))),
        "expected a validation error for {:?}",
        content
    );
}

#[test]
fn test_invalid_toml_is_a_parse_error() {
    let ctx = TestContext::new();
    let path = ctx.create_file("broken.toml", "invalid { toml content");

    assert!(matches!(load_config(&path), Err(ConfigError::ParseError(_))));
}

#[test]
fn test_missing_file_is_a_read_error() {
    let ctx = TestContext::new();
    let path = ctx.temp_dir().join("missing.toml");
    assert!(!path.exists());

    assert!(matches!(load_config(&path), Err(ConfigError::ReadError(_))));
}

#[test]
fn test_derived_values() {
    let ctx = TestContext::new();
    let content = render_config(full_config_toml(), ctx.temp_dir());
    fs::write(ctx.temp_dir().join("full.toml"), content).unwrap();
    let config = load_config(ctx.temp_dir().join("full.toml")).unwrap();

    let start = Local.with_ymd_and_hms(2024, 3, 9, 4, 5, 6).unwrap();
    assert_eq!(
        config::archive_filename(&config.backup, start),
        "nightly-2024-03-09.tar.gz"
    );

    let deadline = config::pruning_deadline(&config.backup, start.with_timezone(&Utc)).unwrap();
    let expected = start.with_timezone(&Utc)
        - chrono::Duration::days(7)
        - chrono::Duration::seconds(120);
    assert_eq!(deadline, expected);
}
