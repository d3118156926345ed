//! Configuration module for filegate.

use serde::Deserialize;
use std::path::Path;

use crate::{FilegateError, Result};

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "data/filegate.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// File storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the upload storage directory.
    #[serde(default = "default_upload_dir")]
    pub upload_dir: String,
    /// Maximum file size in megabytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size_mb: u64,
    /// Extensions rejected regardless of the allowlist (with leading dot).
    #[serde(default = "default_blocked_extensions")]
    pub blocked_extensions: Vec<String>,
    /// Extensions accepted for registration. Empty means all (minus blocked).
    #[serde(default)]
    pub allowed_extensions: Vec<String>,
}

fn default_upload_dir() -> String {
    "data/uploads".to_string()
}

fn default_max_file_size() -> u64 {
    50
}

fn default_blocked_extensions() -> Vec<String> {
    [".exe", ".bat", ".cmd", ".sh", ".msi", ".dll", ".scr", ".ps1"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl StorageConfig {
    /// Maximum file size in bytes.
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            max_file_size_mb: default_max_file_size(),
            blocked_extensions: default_blocked_extensions(),
            allowed_extensions: Vec::new(),
        }
    }
}

/// A single rate-limit rule: at most `max_actions` per `window_secs`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RateRule {
    /// Maximum actions allowed in the window.
    pub max_actions: u32,
    /// Window length in seconds.
    pub window_secs: u64,
}

/// Rate-limit configuration, one rule per action class.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Chat messages / commands.
    #[serde(default = "default_message_rule")]
    pub message: RateRule,
    /// File registrations (upload or URL fetch).
    #[serde(default = "default_upload_rule")]
    pub upload: RateRule,
    /// Download-link resolutions.
    #[serde(default = "default_download_rule")]
    pub download: RateRule,
    /// Broadcast deliveries, applied per recipient.
    #[serde(default = "default_broadcast_rule")]
    pub broadcast: RateRule,
}

fn default_message_rule() -> RateRule {
    RateRule {
        max_actions: 20,
        window_secs: 60,
    }
}

fn default_upload_rule() -> RateRule {
    RateRule {
        max_actions: 10,
        window_secs: 60,
    }
}

fn default_download_rule() -> RateRule {
    RateRule {
        max_actions: 30,
        window_secs: 60,
    }
}

fn default_broadcast_rule() -> RateRule {
    RateRule {
        max_actions: 25,
        window_secs: 1,
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            message: default_message_rule(),
            upload: default_upload_rule(),
            download: default_download_rule(),
            broadcast: default_broadcast_rule(),
        }
    }
}

/// Per-tier quota.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TierQuota {
    /// Maximum number of live (non-deleted) files.
    pub max_files: i64,
    /// Maximum total storage in megabytes.
    pub max_storage_mb: i64,
}

impl TierQuota {
    /// Storage cap in bytes.
    pub fn max_storage_bytes(&self) -> i64 {
        self.max_storage_mb * 1024 * 1024
    }
}

/// Subscription configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionConfig {
    /// Trial length in days, counted from first interaction.
    #[serde(default = "default_trial_days")]
    pub trial_days: i64,
    /// Default file expiry in days for new registrations.
    #[serde(default = "default_file_expiry_days")]
    pub file_expiry_days: i64,
    /// Quota for trial users.
    #[serde(default = "default_trial_quota")]
    pub trial: TierQuota,
    /// Quota for the standard paid tier.
    #[serde(default = "default_standard_quota")]
    pub standard: TierQuota,
    /// Quota for the premium paid tier.
    #[serde(default = "default_premium_quota")]
    pub premium: TierQuota,
}

fn default_trial_days() -> i64 {
    3
}

fn default_file_expiry_days() -> i64 {
    30
}

fn default_trial_quota() -> TierQuota {
    TierQuota {
        max_files: 10,
        max_storage_mb: 100,
    }
}

fn default_standard_quota() -> TierQuota {
    TierQuota {
        max_files: 100,
        max_storage_mb: 2048,
    }
}

fn default_premium_quota() -> TierQuota {
    TierQuota {
        max_files: 1000,
        max_storage_mb: 20480,
    }
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            trial_days: default_trial_days(),
            file_expiry_days: default_file_expiry_days(),
            trial: default_trial_quota(),
            standard: default_standard_quota(),
            premium: default_premium_quota(),
        }
    }
}

/// Expiry sweeper configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SweeperConfig {
    /// Seconds between sweep passes.
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,
    /// Maximum candidates handled per pass.
    #[serde(default = "default_sweep_batch")]
    pub batch_size: i64,
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_sweep_batch() -> i64 {
    100
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sweep_interval(),
            batch_size: default_sweep_batch(),
        }
    }
}

/// URL fetch configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// Hard wall-clock cap on a single fetch, in seconds.
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
    /// Connect timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_fetch_timeout() -> u64 {
    300
}

fn default_connect_timeout() -> u64 {
    30
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Optional log file path (console-only when absent).
    #[serde(default)]
    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Storage settings.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Rate-limit rules.
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
    /// Subscription tiers and trial handling.
    #[serde(default)]
    pub subscription: SubscriptionConfig,
    /// Expiry sweeper.
    #[serde(default)]
    pub sweeper: SweeperConfig,
    /// URL fetch bounds.
    #[serde(default)]
    pub fetch: FetchConfig,
    /// Logging.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| FilegateError::Config(e.to_string()))
    }
}
