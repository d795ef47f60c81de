//! Remote gateway trait.
//!
//! The gateway is the only path to the remote platform. It is a black box
//! that returns workflow identifiers and status values; the transport behind
//! it is not part of this crate.

use crate::error::Result;
use crate::input::JobParameters;
use crate::remote_path::RemotePath;
use crate::workflow::{OutputDescriptor, WorkflowStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One workflow submission: a pipeline applied to N parallel jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSubmission {
    pub pipeline_id: String,
    /// Execution name shown by the platform (the session name).
    pub name: String,
    /// Where the platform writes the results.
    pub results_location: RemotePath,
    /// One parameter map per job.
    pub jobs: Vec<JobParameters>,
}

/// Status of a workflow as reported by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusReport {
    pub status: WorkflowStatus,
    pub start_time: Option<DateTime<Utc>>,
    /// Present once the workflow is terminal.
    pub outputs: Option<Vec<OutputDescriptor>>,
}

/// One entry of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub path: RemotePath,
    pub is_directory: bool,
    pub size: Option<u64>,
    /// Hex-encoded SHA-256 digest, when the platform computes one.
    pub hash: Option<String>,
}

impl RemoteEntry {
    pub fn file(path: impl Into<RemotePath>, size: u64) -> Self {
        Self {
            path: path.into(),
            is_directory: false,
            size: Some(size),
            hash: None,
        }
    }

    pub fn directory(path: impl Into<RemotePath>) -> Self {
        Self {
            path: path.into(),
            is_directory: true,
            size: None,
            hash: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    File,
    String,
    Number,
    Boolean,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineParameter {
    pub name: String,
    pub kind: ParameterKind,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub default_value: Option<String>,
}

impl PipelineParameter {
    /// A parameter the caller must provide.
    pub fn is_required(&self) -> bool {
        !self.optional && self.default_value.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub identifier: String,
    pub parameters: Vec<PipelineParameter>,
}

impl PipelineDefinition {
    pub fn parameter(&self, name: &str) -> Option<&PipelineParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

/// Access to the remote computation platform.
///
/// Implementations report a transient failure as `VipError::Transport` and
/// an unknown workflow or path as `VipError::NotFound`.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Submits one workflow and returns its identifier.
    async fn submit_job(&self, submission: &WorkflowSubmission) -> Result<String>;

    async fn get_job_status(&self, workflow_id: &str) -> Result<JobStatusReport>;

    async fn kill_workflow(&self, workflow_id: &str) -> Result<()>;

    /// Lists the direct children of a remote directory.
    async fn list_directory(&self, path: &RemotePath) -> Result<Vec<RemoteEntry>>;

    async fn exists(&self, path: &RemotePath) -> Result<bool>;

    /// Creates a directory and its missing parents.
    async fn create_dir(&self, path: &RemotePath) -> Result<()>;

    async fn upload_file(&self, local: &Path, remote: &RemotePath) -> Result<()>;

    async fn download_file(&self, remote: &RemotePath, local: &Path) -> Result<()>;

    /// Deletes a file or a directory tree.
    async fn delete(&self, path: &RemotePath) -> Result<()>;

    /// Identifiers of the pipelines available to the caller.
    async fn list_pipelines(&self) -> Result<Vec<String>>;

    async fn pipeline_definition(&self, pipeline_id: &str) -> Result<PipelineDefinition>;
}
