//! Integration tests for configuration resolution and graceful degradation
//!
//! Tests that manipulate DMK_CONFIG or DMK_ROOT_FOLDER are marked with #[serial]
//! so they run sequentially, not in parallel.

use dmk_common::config::{
    load_toml_config, resolve_root_folder, write_toml_config, ConfigResolver, TomlConfig,
    CONFIG_ENV_VAR, ROOT_FOLDER_ENV_VAR,
};
use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[test]
fn test_write_then_load_preserves_values() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("config.toml");

    let mut config = TomlConfig::default();
    config.analysis.window_size_secs = 45.0;
    config.analysis.max_peaks = 3;
    config.scan.root_folder = Some(PathBuf::from("/recordings"));

    write_toml_config(&config, &path).unwrap();
    assert!(path.exists());
    assert!(!path.with_extension("toml.tmp").exists());

    let loaded = load_toml_config(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_load_rejects_invalid_values() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    std::fs::write(&path, "[analysis]\nwindow_size_secs = -5.0\n").unwrap();

    assert!(load_toml_config(&path).is_err());
}

#[test]
fn test_resolver_cli_path_with_garbage_falls_back_to_defaults() {
    // Missing configs -> warning + defaults, never termination
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    std::fs::write(&path, "this is { not toml").unwrap();

    let config = ConfigResolver::new().with_cli_path(Some(path)).resolve();
    assert_eq!(config, TomlConfig::default());
}

#[test]
fn test_resolver_cli_path_missing_file_falls_back_to_defaults() {
    let config = ConfigResolver::new()
        .with_cli_path(Some(PathBuf::from("/nonexistent/dmk/config.toml")))
        .resolve();
    assert_eq!(config, TomlConfig::default());
}

#[test]
#[serial]
fn test_resolver_env_var_used_when_no_cli_path() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("env.toml");
    std::fs::write(&path, "[analysis]\nstep_size_secs = 2.5\n").unwrap();

    env::set_var(CONFIG_ENV_VAR, &path);
    let resolver = ConfigResolver::new();
    assert_eq!(resolver.config_path(), Some(path.clone()));
    let config = resolver.resolve();
    env::remove_var(CONFIG_ENV_VAR);

    assert_eq!(config.analysis.step_size_secs, 2.5);
}

#[test]
#[serial]
fn test_resolver_cli_path_beats_env_var() {
    env::set_var(CONFIG_ENV_VAR, "/from/env.toml");
    let resolver = ConfigResolver::new().with_cli_path(Some(PathBuf::from("/from/cli.toml")));
    let path = resolver.config_path();
    env::remove_var(CONFIG_ENV_VAR);

    assert_eq!(path, Some(PathBuf::from("/from/cli.toml")));
}

#[test]
#[serial]
fn test_root_folder_env_beats_toml() {
    let mut config = TomlConfig::default();
    config.scan.root_folder = Some(PathBuf::from("/from/toml"));

    env::set_var(ROOT_FOLDER_ENV_VAR, "/from/env");
    let root = resolve_root_folder(None, &config);
    env::remove_var(ROOT_FOLDER_ENV_VAR);

    assert_eq!(root, PathBuf::from("/from/env"));
}

#[test]
#[serial]
fn test_root_folder_toml_used_without_env() {
    env::remove_var(ROOT_FOLDER_ENV_VAR);
    let mut config = TomlConfig::default();
    config.scan.root_folder = Some(PathBuf::from("/from/toml"));

    assert_eq!(resolve_root_folder(None, &config), PathBuf::from("/from/toml"));
}

#[test]
#[serial]
fn test_root_folder_falls_back_to_platform_default() {
    env::remove_var(ROOT_FOLDER_ENV_VAR);
    let root = resolve_root_folder(None, &TomlConfig::default());
    assert!(!root.as_os_str().is_empty());
    assert_ne!(root, Path::new("/from/toml"));
}
