//! Application configuration loaded from YAML.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::input_validation::validate_exclude_patterns;
use crate::logging::DEFAULT_MAX_LOG_LINES;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Upload/download caps in Mbit/s. `0` means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandwidthLimits {
    pub upload_mbps: f64,
    pub download_mbps: f64,
}

impl BandwidthLimits {
    pub fn is_unlimited(&self) -> bool {
        self.upload_mbps <= 0.0 && self.download_mbps <= 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub rclone_path: PathBuf,
    pub rclone_config: Option<PathBuf>,
    pub data_dir: PathBuf,
    pub max_concurrent_transfers: usize,
    pub transfers: u32,
    pub checkers: u32,
    pub stats_interval: String,
    pub run_timeout_secs: Option<u64>,
    pub log_capacity: usize,
    pub bandwidth: BandwidthLimits,
    pub exclude_patterns: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            rclone_path: PathBuf::from("rclone"),
            rclone_config: None,
            data_dir: default_data_dir(),
            max_concurrent_transfers: 2,
            transfers: 4,
            checkers: 8,
            stats_interval: "1s".to_string(),
            run_timeout_secs: None,
            log_capacity: DEFAULT_MAX_LOG_LINES,
            bandwidth: BandwidthLimits::default(),
            exclude_patterns: Vec::new(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share")))
        .unwrap_or_else(std::env::temp_dir)
        .join("cloudsync")
}

impl AppConfig {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&raw).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_transfers == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_transfers must be at least 1".into(),
            ));
        }
        if self.transfers == 0 || self.checkers == 0 {
            return Err(ConfigError::Invalid(
                "transfers and checkers must be at least 1".into(),
            ));
        }
        if self.bandwidth.upload_mbps < 0.0 || self.bandwidth.download_mbps < 0.0 {
            return Err(ConfigError::Invalid(
                "bandwidth limits cannot be negative".into(),
            ));
        }
        validate_exclude_patterns(&self.exclude_patterns)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }

    pub fn transfer_settings(&self) -> TransferSettings {
        TransferSettings {
            rclone_path: self.rclone_path.clone(),
            rclone_config: self.rclone_config.clone(),
            transfers: self.transfers,
            checkers: self.checkers,
            stats_interval: self.stats_interval.clone(),
            run_timeout_secs: self.run_timeout_secs,
            bandwidth: self.bandwidth,
            exclude_patterns: self.exclude_patterns.clone(),
        }
    }

    pub fn tasks_path(&self) -> PathBuf {
        self.data_dir.join("tasks.json")
    }

    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join("history.json")
    }

    pub fn remotes_path(&self) -> PathBuf {
        self.data_dir.join("remotes.json")
    }
}

/// Read-only snapshot of the settings a spawn needs.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferSettings {
    pub rclone_path: PathBuf,
    pub rclone_config: Option<PathBuf>,
    pub transfers: u32,
    pub checkers: u32,
    pub stats_interval: String,
    pub run_timeout_secs: Option<u64>,
    pub bandwidth: BandwidthLimits,
    pub exclude_patterns: Vec<String>,
}

impl Default for TransferSettings {
    fn default() -> Self {
        AppConfig::default().transfer_settings()
    }
}
