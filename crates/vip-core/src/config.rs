//! Client configuration model.
//!
//! Loaded once per process (see `vip_infrastructure::ConfigService`) and
//! passed explicitly to every session.

use crate::workflow::WorkflowStatus;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct VipConfig {
    /// Remote home directory under which session folders are derived.
    pub remote_home: String,
    /// Prefix identifying a path as remote inside input settings.
    pub remote_prefix: String,
    /// Local directory under which session output folders are derived.
    pub local_output_root: PathBuf,
    pub transfer: TransferConfig,
    pub monitor: MonitorConfig,
    pub download: DownloadConfig,
}

impl Default for VipConfig {
    fn default() -> Self {
        Self {
            remote_home: "/vip/Home/API".to_string(),
            remote_prefix: "/vip".to_string(),
            local_output_root: PathBuf::from("vip_outputs"),
            transfer: TransferConfig::default(),
            monitor: MonitorConfig::default(),
            download: DownloadConfig::default(),
        }
    }
}

/// How long to wait between two attempts of the same operation.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Fixed,
    Linear,
    #[default]
    Exponential,
}

/// How an already-transferred file is recognized.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IdentityCheck {
    /// Same file name and same size.
    #[default]
    NameAndSize,
    /// Same SHA-256 digest. Falls back to name and size when the remote side
    /// does not report a hash.
    ContentHash,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TransferConfig {
    /// Maximum number of files moved at the same time.
    pub concurrency: usize,
    /// Retries per file after the first failed attempt.
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub backoff: BackoffStrategy,
    pub identity: IdentityCheck,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_retries: 3,
            retry_delay_ms: 500,
            backoff: BackoffStrategy::Exponential,
            identity: IdentityCheck::NameAndSize,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    pub poll_interval_secs: u64,
    /// Retries of a single status query within one tick.
    pub status_retries: u32,
    pub status_retry_delay_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            status_retries: 2,
            status_retry_delay_ms: 1000,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct DownloadConfig {
    /// Replace downloaded tar archives by their extracted content.
    pub extract_archives: bool,
    /// Workflow statuses whose outputs are downloaded.
    pub statuses: Vec<WorkflowStatus>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            extract_archives: true,
            statuses: vec![WorkflowStatus::Finished],
        }
    }
}
