//! Configuration loading and scan root resolution
//!
//! Configuration file resolution priority:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`DMK_CONFIG`)
//! 3. Platform config directory (`<config_dir>/dmk/config.toml`)
//! 4. Compiled defaults (fallback)
//!
//! A missing or unreadable TOML file never aborts startup: a warning is logged and compiled
//! defaults are used. Every section carries serde defaults so partial files load.

use crate::resilience::{CircuitConfig, RetryPolicy};
use crate::time::millis_to_duration;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "DMK_CONFIG";

/// Environment variable naming the scan root folder
pub const ROOT_FOLDER_ENV_VAR: &str = "DMK_ROOT_FOLDER";

/// Complete TOML configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub logging: LoggingConfig,
    pub analysis: AnalysisSettings,
    pub retry: RetrySettings,
    pub circuit_breaker: CircuitBreakerSettings,
    pub scan: ScanSettings,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is unset (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Density analysis parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    pub window_size_secs: f64,
    pub step_size_secs: f64,
    pub threshold_floor: usize,
    pub threshold_multiplier: f64,
    pub max_peaks: usize,
    pub max_window_samples: usize,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            window_size_secs: 30.0,
            step_size_secs: 5.0,
            threshold_floor: 3,
            threshold_multiplier: 1.5,
            max_peaks: 10,
            max_window_samples: 100_000,
        }
    }
}

/// Retry pacing for file-source I/O
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            backoff_multiplier: policy.backoff_multiplier,
        }
    }
}

impl RetrySettings {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: millis_to_duration(self.base_delay_ms),
            max_delay: millis_to_duration(self.max_delay_ms),
            backoff_multiplier: self.backoff_multiplier,
        }
    }
}

/// Circuit breaker tuning for file-source I/O
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub reset_timeout_secs: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        let config = CircuitConfig::default();
        Self {
            failure_threshold: config.failure_threshold,
            reset_timeout_secs: config.reset_timeout.as_secs(),
        }
    }
}

impl CircuitBreakerSettings {
    pub fn to_config(&self) -> CircuitConfig {
        CircuitConfig {
            failure_threshold: self.failure_threshold,
            reset_timeout: Duration::from_secs(self.reset_timeout_secs),
        }
    }
}

/// Batch scan settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// Folder scanned when no root is given on the command line
    pub root_folder: Option<PathBuf>,
    /// Documents parsed and analyzed concurrently
    pub max_concurrent_files: usize,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            root_folder: None,
            max_concurrent_files: 4,
        }
    }
}

impl TomlConfig {
    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let a = &self.analysis;
        if !(a.window_size_secs.is_finite() && a.window_size_secs > 0.0) {
            return Err(Error::Config(format!(
                "analysis.window_size_secs must be > 0 (got {})",
                a.window_size_secs
            )));
        }
        if !(a.step_size_secs.is_finite() && a.step_size_secs > 0.0) {
            return Err(Error::Config(format!(
                "analysis.step_size_secs must be > 0 (got {})",
                a.step_size_secs
            )));
        }
        if !(a.threshold_multiplier.is_finite() && a.threshold_multiplier >= 0.0) {
            return Err(Error::Config(format!(
                "analysis.threshold_multiplier must be >= 0 (got {})",
                a.threshold_multiplier
            )));
        }
        if a.max_peaks == 0 {
            return Err(Error::Config("analysis.max_peaks must be >= 1".to_string()));
        }
        if a.max_window_samples < 3 {
            return Err(Error::Config(format!(
                "analysis.max_window_samples must be >= 3 (got {})",
                a.max_window_samples
            )));
        }
        if !(self.retry.backoff_multiplier.is_finite() && self.retry.backoff_multiplier >= 1.0) {
            return Err(Error::Config(format!(
                "retry.backoff_multiplier must be >= 1.0 (got {})",
                self.retry.backoff_multiplier
            )));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(Error::Config(
                "retry.base_delay_ms must not exceed retry.max_delay_ms".to_string(),
            ));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(Error::Config(
                "circuit_breaker.failure_threshold must be >= 1".to_string(),
            ));
        }
        if self.scan.max_concurrent_files == 0 {
            return Err(Error::Config("scan.max_concurrent_files must be >= 1".to_string()));
        }
        Ok(())
    }
}

/// Default config file location for the platform
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("dmk").join("config.toml"))
}

/// Load and validate a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
    config.validate()?;
    Ok(config)
}

/// Write a TOML config file atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Resolves which config file to load and loads it with graceful fallback
#[derive(Debug, Clone, Default)]
pub struct ConfigResolver {
    cli_path: Option<PathBuf>,
}

impl ConfigResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Config path given on the command line (priority 1)
    pub fn with_cli_path(mut self, path: Option<PathBuf>) -> Self {
        self.cli_path = path;
        self
    }

    /// Path of the config file that would be loaded, if any
    pub fn config_path(&self) -> Option<PathBuf> {
        // Priority 1: Command-line argument
        if let Some(path) = &self.cli_path {
            return Some(path.clone());
        }

        // Priority 2: Environment variable
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            if !path.trim().is_empty() {
                return Some(PathBuf::from(path));
            }
        }

        // Priority 3: Platform config directory (only if present)
        default_config_path().filter(|p| p.exists())
    }

    /// Load configuration, falling back to compiled defaults on any problem
    pub fn resolve(&self) -> TomlConfig {
        let Some(path) = self.config_path() else {
            info!("No config file found, using compiled defaults");
            return TomlConfig::default();
        };

        match load_toml_config(&path) {
            Ok(config) => {
                info!("Loaded configuration from {}", path.display());
                config
            }
            Err(e) => {
                warn!("{} - using compiled defaults", e);
                TomlConfig::default()
            }
        }
    }
}

/// Scan root resolution:
/// 1. Command-line argument
/// 2. `DMK_ROOT_FOLDER` environment variable
/// 3. `scan.root_folder` from TOML
/// 4. Platform video directory, else the current directory
pub fn resolve_root_folder(cli_arg: Option<&Path>, config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV_VAR) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &config.scan.root_folder {
        return path.clone();
    }

    dirs::video_dir().unwrap_or_else(|| PathBuf::from("."))
}
