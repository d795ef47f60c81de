//! Workflow domain model.

use crate::remote_path::RemotePath;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Represents the status of one remote workflow.
///
/// `Unknown` is the value before the first successful refresh, and the value
/// used when the platform no longer recognizes the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WorkflowStatus {
    /// No status has been observed yet.
    Unknown,
    /// The platform accepted the submission.
    Submitted,
    /// At least one job is executing.
    Running,
    /// Every job completed successfully.
    Finished,
    /// The workflow ended in error.
    Failed,
    /// The workflow was killed before completion.
    Killed,
    /// The workflow's outputs were deleted from the platform.
    Removed,
}

impl WorkflowStatus {
    /// Whether no further remote state change is expected.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Finished | Self::Failed | Self::Killed | Self::Removed
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Finished)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Submitted => "Submitted",
            Self::Running => "Running",
            Self::Finished => "Finished",
            Self::Failed => "Failed",
            Self::Killed => "Killed",
            Self::Removed => "Removed",
        }
    }

    /// Maps the platform's status notation onto the client's statuses.
    ///
    /// Unrecognized values map to `Unknown`.
    pub fn from_remote(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "submitted" | "initializing" | "queued" => Self::Submitted,
            "running" => Self::Running,
            "finished" | "completed" => Self::Finished,
            "failed" | "error" => Self::Failed,
            "killed" | "cancelled" => Self::Killed,
            "removed" | "deleted" => Self::Removed,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One output file reported by the platform for a terminal workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDescriptor {
    /// Remote path of the output.
    pub path: RemotePath,
    /// Size in bytes, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Content hash, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// `Some(false)` when the platform reports the file as gone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exists: Option<bool>,
}

impl OutputDescriptor {
    pub fn new(path: impl Into<RemotePath>) -> Self {
        Self {
            path: path.into(),
            size: None,
            hash: None,
            exists: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn is_missing(&self) -> bool {
        self.exists == Some(false)
    }
}

/// The session's record of one remote workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    /// Identifier assigned by the platform at submission time.
    pub workflow_id: String,
    /// Last accepted status.
    pub status: WorkflowStatus,
    /// Start time reported by the platform.
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    /// Number of parallel jobs in the submission.
    #[serde(default = "default_jobs")]
    pub jobs: usize,
    /// Output files; populated once the workflow is terminal.
    #[serde(default)]
    pub outputs: Vec<OutputDescriptor>,
    /// Output paths already retrieved locally.
    #[serde(default)]
    pub downloaded: BTreeSet<String>,
}

fn default_jobs() -> usize {
    1
}

impl WorkflowRecord {
    /// Creates the record of a freshly accepted submission.
    pub fn submitted(workflow_id: impl Into<String>, jobs: usize) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            status: WorkflowStatus::Submitted,
            start_time: None,
            jobs,
            outputs: Vec::new(),
            downloaded: BTreeSet::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Outputs not yet recorded as downloaded.
    pub fn pending_outputs(&self) -> impl Iterator<Item = &OutputDescriptor> {
        self.outputs
            .iter()
            .filter(|o| !self.downloaded.contains(o.path.as_str()))
    }
}

/// A status delta computed from one refresh of one workflow.
///
/// Produced by the reconciler and applied by the session, which owns the
/// records.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowUpdate {
    pub workflow_id: String,
    pub status: WorkflowStatus,
    pub start_time: Option<DateTime<Utc>>,
    /// Only carried when `status` is terminal.
    pub outputs: Option<Vec<OutputDescriptor>>,
    /// The platform no longer knows this workflow.
    pub remote_missing: bool,
}

impl WorkflowUpdate {
    pub fn status(workflow_id: impl Into<String>, status: WorkflowStatus) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            status,
            start_time: None,
            outputs: None,
            remote_missing: false,
        }
    }

    /// The delta recorded when the platform does not recognize the workflow.
    pub fn missing(workflow_id: impl Into<String>) -> Self {
        Self {
            remote_missing: true,
            ..Self::status(workflow_id, WorkflowStatus::Unknown)
        }
    }

    pub fn with_outputs(mut self, outputs: Vec<OutputDescriptor>) -> Self {
        self.outputs = Some(outputs);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_classification() {
        assert!(WorkflowStatus::Finished.is_terminal());
        assert!(WorkflowStatus::Failed.is_terminal());
        assert!(WorkflowStatus::Killed.is_terminal());
        assert!(WorkflowStatus::Removed.is_terminal());
        assert!(!WorkflowStatus::Running.is_terminal());
        assert!(!WorkflowStatus::Submitted.is_terminal());
        assert!(!WorkflowStatus::Unknown.is_terminal());
        assert!(WorkflowStatus::Finished.is_success());
        assert!(!WorkflowStatus::Killed.is_success());
    }

    #[test]
    fn test_from_remote_notation() {
        assert_eq!(WorkflowStatus::from_remote("Running"), WorkflowStatus::Running);
        assert_eq!(WorkflowStatus::from_remote("Finished"), WorkflowStatus::Finished);
        assert_eq!(WorkflowStatus::from_remote("Killed"), WorkflowStatus::Killed);
        assert_eq!(WorkflowStatus::from_remote("???"), WorkflowStatus::Unknown);
    }

    #[test]
    fn test_pending_outputs_skip_downloaded() {
        let mut record = WorkflowRecord::submitted("workflow-1", 2);
        record.outputs = vec![
            OutputDescriptor::new("/vip/out/a.tgz"),
            OutputDescriptor::new("/vip/out/b.tgz"),
        ];
        record.downloaded.insert("/vip/out/a.tgz".to_string());

        let pending: Vec<_> = record.pending_outputs().map(|o| o.path.as_str()).collect();
        assert_eq!(pending, vec!["/vip/out/b.tgz"]);
    }
}
