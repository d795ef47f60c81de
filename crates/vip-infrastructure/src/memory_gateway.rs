//! In-memory `RemoteGateway`.
//!
//! Holds a remote file tree, a pipeline catalog and a set of workflows whose
//! status sequence is scripted by the caller. Failures can be injected per
//! file or per workflow. Used by the test suite and for offline runs.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use vip_core::error::{Result, VipError};
use vip_core::gateway::{
    JobStatusReport, PipelineDefinition, RemoteEntry, RemoteGateway, WorkflowSubmission,
};
use vip_core::remote_path::RemotePath;
use vip_core::workflow::{OutputDescriptor, WorkflowStatus};

/// Number of calls received per operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayCounters {
    pub submissions: usize,
    pub status_queries: usize,
    pub kills: usize,
    pub uploads: usize,
    pub downloads: usize,
    pub deletes: usize,
    pub directories_created: usize,
}

struct ScriptedWorkflow {
    submission: WorkflowSubmission,
    /// Reports still to be returned; the last one repeats.
    script: VecDeque<JobStatusReport>,
    current: JobStatusReport,
}

#[derive(Default)]
struct GatewayState {
    files: BTreeMap<RemotePath, Vec<u8>>,
    directories: BTreeSet<RemotePath>,
    pipelines: BTreeMap<String, PipelineDefinition>,
    workflows: BTreeMap<String, ScriptedWorkflow>,
    submission_order: Vec<String>,
    next_workflow: u64,
    accepted_submissions: Option<usize>,
    upload_failures: BTreeMap<RemotePath, u32>,
    download_failures: BTreeMap<RemotePath, u32>,
    truncated_downloads: BTreeMap<RemotePath, u32>,
    status_failures: BTreeMap<String, u32>,
    report_hashes: bool,
    counters: GatewayCounters,
}

impl GatewayState {
    fn add_directory(&mut self, path: &RemotePath) -> bool {
        let mut created = false;
        let mut current = Some(path.clone());
        while let Some(dir) = current {
            if dir.as_str().is_empty() || !self.directories.insert(dir.clone()) {
                break;
            }
            created = true;
            current = dir.parent();
        }
        created
    }

    fn parent_exists(&self, path: &RemotePath) -> bool {
        match path.parent() {
            Some(parent) => parent.as_str() == "/" || self.directories.contains(&parent),
            None => true,
        }
    }

    fn take_failure(failures: &mut BTreeMap<RemotePath, u32>, path: &RemotePath) -> bool {
        match failures.get_mut(path) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn workflow(&mut self, workflow_id: &str) -> Result<&mut ScriptedWorkflow> {
        self.workflows
            .get_mut(workflow_id)
            .ok_or_else(|| VipError::not_found("workflow", workflow_id))
    }
}

fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn report(status: WorkflowStatus, outputs: Option<Vec<OutputDescriptor>>) -> JobStatusReport {
    JobStatusReport {
        status,
        start_time: None,
        outputs,
    }
}

/// A scriptable in-process gateway.
pub struct InMemoryGateway {
    state: Mutex<GatewayState>,
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryGateway {
    pub fn new() -> Self {
        let state = GatewayState {
            report_hashes: true,
            ..GatewayState::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    fn state(&self) -> MutexGuard<'_, GatewayState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ------------------------------------------------------------------
    // Fixture setup
    // ------------------------------------------------------------------

    pub fn add_pipeline(&self, definition: PipelineDefinition) {
        self.state()
            .pipelines
            .insert(definition.identifier.clone(), definition);
    }

    /// Stores a remote file, creating its parent directories.
    pub fn put_file(&self, path: impl Into<RemotePath>, content: impl Into<Vec<u8>>) {
        let path = path.into();
        let mut state = self.state();
        if let Some(parent) = path.parent() {
            state.add_directory(&parent);
        }
        state.files.insert(path, content.into());
    }

    /// Whether directory listings carry a SHA-256 digest of each file.
    pub fn set_report_hashes(&self, enabled: bool) {
        self.state().report_hashes = enabled;
    }

    /// Accepts `count` more submissions, then rejects the following ones.
    pub fn accept_submissions(&self, count: usize) {
        self.state().accepted_submissions = Some(count);
    }

    /// The next `times` uploads to `path` fail with a transport error.
    pub fn fail_uploads(&self, path: impl Into<RemotePath>, times: u32) {
        self.state().upload_failures.insert(path.into(), times);
    }

    /// The next `times` downloads of `path` fail with a transport error.
    pub fn fail_downloads(&self, path: impl Into<RemotePath>, times: u32) {
        self.state().download_failures.insert(path.into(), times);
    }

    /// The next `times` downloads of `path` write the first half of the
    /// content locally, then fail with a transport error.
    pub fn truncate_downloads(&self, path: impl Into<RemotePath>, times: u32) {
        self.state().truncated_downloads.insert(path.into(), times);
    }

    /// The next `times` status queries for `workflow_id` fail with a
    /// transport error.
    pub fn fail_status(&self, workflow_id: &str, times: u32) {
        self.state()
            .status_failures
            .insert(workflow_id.to_string(), times);
    }

    /// Replaces the status sequence of a workflow. Each query consumes one
    /// report; the last report repeats.
    pub fn script_status(&self, workflow_id: &str, statuses: Vec<JobStatusReport>) -> Result<()> {
        let mut state = self.state();
        let workflow = state.workflow(workflow_id)?;
        workflow.script = statuses.into();
        Ok(())
    }

    /// Shorthand for a script made of bare statuses without outputs.
    pub fn script_statuses(&self, workflow_id: &str, statuses: &[WorkflowStatus]) -> Result<()> {
        self.script_status(
            workflow_id,
            statuses.iter().map(|s| report(*s, None)).collect(),
        )
    }

    /// Ends a workflow with `status`, storing `outputs` as remote files.
    pub fn complete_workflow(
        &self,
        workflow_id: &str,
        status: WorkflowStatus,
        outputs: Vec<(RemotePath, Vec<u8>)>,
    ) -> Result<()> {
        let descriptors = outputs
            .iter()
            .map(|(path, content)| {
                OutputDescriptor::new(path.clone()).with_size(content.len() as u64)
            })
            .collect();
        for (path, content) in outputs {
            self.put_file(path, content);
        }
        self.script_status(workflow_id, vec![report(status, Some(descriptors))])
    }

    /// Drops a workflow; later queries report it as not found.
    pub fn forget_workflow(&self, workflow_id: &str) {
        self.state().workflows.remove(workflow_id);
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub fn counters(&self) -> GatewayCounters {
        self.state().counters.clone()
    }

    /// Submissions in the order they were accepted.
    pub fn submissions(&self) -> Vec<WorkflowSubmission> {
        let state = self.state();
        state
            .submission_order
            .iter()
            .filter_map(|id| state.workflows.get(id))
            .map(|w| w.submission.clone())
            .collect()
    }

    pub fn file(&self, path: impl Into<RemotePath>) -> Option<Vec<u8>> {
        self.state().files.get(&path.into()).cloned()
    }

    pub fn has_directory(&self, path: impl Into<RemotePath>) -> bool {
        self.state().directories.contains(&path.into())
    }

    pub fn file_paths(&self) -> Vec<RemotePath> {
        self.state().files.keys().cloned().collect()
    }
}

#[async_trait]
impl RemoteGateway for InMemoryGateway {
    async fn submit_job(&self, submission: &WorkflowSubmission) -> Result<String> {
        let mut state = self.state();
        state.counters.submissions += 1;

        if let Some(remaining) = state.accepted_submissions.as_mut() {
            if *remaining == 0 {
                return Err(VipError::Submission("submission quota exhausted".to_string()));
            }
            *remaining -= 1;
        }
        if !state.pipelines.contains_key(&submission.pipeline_id) {
            return Err(VipError::Submission(format!(
                "pipeline '{}' does not exist",
                submission.pipeline_id
            )));
        }

        state.next_workflow += 1;
        let workflow_id = format!("workflow-{:04}", state.next_workflow);
        state.workflows.insert(
            workflow_id.clone(),
            ScriptedWorkflow {
                submission: submission.clone(),
                script: VecDeque::new(),
                current: report(WorkflowStatus::Submitted, None),
            },
        );
        state.submission_order.push(workflow_id.clone());
        Ok(workflow_id)
    }

    async fn get_job_status(&self, workflow_id: &str) -> Result<JobStatusReport> {
        let mut state = self.state();
        state.counters.status_queries += 1;

        if let Some(remaining) = state.status_failures.get_mut(workflow_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(VipError::transport(format!(
                    "status query for '{}' timed out",
                    workflow_id
                )));
            }
        }

        let workflow = state.workflow(workflow_id)?;
        if let Some(next) = workflow.script.pop_front() {
            workflow.current = next;
        }
        Ok(workflow.current.clone())
    }

    async fn kill_workflow(&self, workflow_id: &str) -> Result<()> {
        let mut state = self.state();
        state.counters.kills += 1;
        let workflow = state.workflow(workflow_id)?;
        if !workflow.current.status.is_terminal() {
            workflow.script = VecDeque::from(vec![report(WorkflowStatus::Killed, Some(Vec::new()))]);
        }
        Ok(())
    }

    async fn list_directory(&self, path: &RemotePath) -> Result<Vec<RemoteEntry>> {
        let state = self.state();
        if !state.directories.contains(path) {
            return Err(VipError::not_found("remote directory", path.as_str()));
        }

        let is_child = |candidate: &RemotePath| candidate.parent().as_ref() == Some(path);
        let mut entries: Vec<RemoteEntry> = state
            .directories
            .iter()
            .filter(|dir| is_child(*dir))
            .map(|dir| RemoteEntry::directory(dir.clone()))
            .collect();
        entries.extend(
            state
                .files
                .iter()
                .filter(|(file, _)| is_child(*file))
                .map(|(file, content)| RemoteEntry {
                    path: file.clone(),
                    is_directory: false,
                    size: Some(content.len() as u64),
                    hash: state.report_hashes.then(|| digest(content)),
                }),
        );
        Ok(entries)
    }

    async fn exists(&self, path: &RemotePath) -> Result<bool> {
        let state = self.state();
        Ok(state.files.contains_key(path) || state.directories.contains(path))
    }

    async fn create_dir(&self, path: &RemotePath) -> Result<()> {
        let mut state = self.state();
        if state.files.contains_key(path) {
            return Err(VipError::transport(format!("'{}' is a file", path)));
        }
        if state.add_directory(path) {
            state.counters.directories_created += 1;
        }
        Ok(())
    }

    async fn upload_file(&self, local: &Path, remote: &RemotePath) -> Result<()> {
        {
            let mut state = self.state();
            state.counters.uploads += 1;
            if GatewayState::take_failure(&mut state.upload_failures, remote) {
                return Err(VipError::transport(format!("upload of '{}' interrupted", remote)));
            }
            if !state.parent_exists(remote) {
                return Err(VipError::not_found(
                    "remote directory",
                    remote.parent().map(String::from).unwrap_or_default(),
                ));
            }
        }

        let content = tokio::fs::read(local).await?;
        self.state().files.insert(remote.clone(), content);
        Ok(())
    }

    async fn download_file(&self, remote: &RemotePath, local: &Path) -> Result<()> {
        let (content, truncated) = {
            let mut state = self.state();
            state.counters.downloads += 1;
            if GatewayState::take_failure(&mut state.download_failures, remote) {
                return Err(VipError::transport(format!(
                    "download of '{}' interrupted",
                    remote
                )));
            }
            let truncated = GatewayState::take_failure(&mut state.truncated_downloads, remote);
            let content = state
                .files
                .get(remote)
                .cloned()
                .ok_or_else(|| VipError::not_found("remote file", remote.as_str()))?;
            (content, truncated)
        };

        if truncated {
            tokio::fs::write(local, &content[..content.len() / 2]).await?;
            return Err(VipError::transport(format!(
                "download of '{}' interrupted",
                remote
            )));
        }
        tokio::fs::write(local, content).await?;
        Ok(())
    }

    async fn delete(&self, path: &RemotePath) -> Result<()> {
        let mut state = self.state();
        state.counters.deletes += 1;
        if !state.files.contains_key(path) && !state.directories.contains(path) {
            return Err(VipError::not_found("remote path", path.as_str()));
        }
        state.files.retain(|file, _| !file.starts_with(path));
        state.directories.retain(|dir| !dir.starts_with(path));
        Ok(())
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        Ok(self.state().pipelines.keys().cloned().collect())
    }

    async fn pipeline_definition(&self, pipeline_id: &str) -> Result<PipelineDefinition> {
        self.state()
            .pipelines
            .get(pipeline_id)
            .cloned()
            .ok_or_else(|| VipError::not_found("pipeline", pipeline_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vip_core::gateway::{ParameterKind, PipelineParameter};

    fn pipeline() -> PipelineDefinition {
        PipelineDefinition {
            identifier: "CQUEST/0.3".to_string(),
            parameters: vec![PipelineParameter {
                name: "image".to_string(),
                kind: ParameterKind::File,
                optional: false,
                default_value: None,
            }],
        }
    }

    fn submission() -> WorkflowSubmission {
        WorkflowSubmission {
            pipeline_id: "CQUEST/0.3".to_string(),
            name: "s".to_string(),
            results_location: RemotePath::new("/vip/Home/API/s/OUTPUTS"),
            jobs: vec![Default::default()],
        }
    }

    #[tokio::test]
    async fn test_scripted_status_sequence_repeats_last() {
        let gateway = InMemoryGateway::new();
        gateway.add_pipeline(pipeline());
        let id = gateway.submit_job(&submission()).await.unwrap();
        gateway
            .script_statuses(&id, &[WorkflowStatus::Running, WorkflowStatus::Finished])
            .unwrap();

        assert_eq!(
            gateway.get_job_status(&id).await.unwrap().status,
            WorkflowStatus::Running
        );
        assert_eq!(
            gateway.get_job_status(&id).await.unwrap().status,
            WorkflowStatus::Finished
        );
        assert_eq!(
            gateway.get_job_status(&id).await.unwrap().status,
            WorkflowStatus::Finished
        );
    }

    #[tokio::test]
    async fn test_unknown_workflow_is_not_found() {
        let gateway = InMemoryGateway::new();
        let err = gateway.get_job_status("workflow-9999").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_listing_reports_children_with_hash() {
        let gateway = InMemoryGateway::new();
        gateway.put_file("/vip/Home/API/s/INPUTS/a.nii", b"abc".to_vec());
        gateway.put_file("/vip/Home/API/s/INPUTS/sub/b.nii", b"de".to_vec());

        let entries = gateway
            .list_directory(&RemotePath::new("/vip/Home/API/s/INPUTS"))
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
        let file = entries.iter().find(|e| !e.is_directory).unwrap();
        assert_eq!(file.size, Some(3));
        assert_eq!(file.hash.as_deref(), Some(digest(b"abc").as_str()));
        assert!(entries.iter().any(|e| e.is_directory));
    }

    #[tokio::test]
    async fn test_upload_requires_parent_and_honours_failures() {
        let temp_dir = TempDir::new().unwrap();
        let local = temp_dir.path().join("a.nii");
        std::fs::write(&local, b"data").unwrap();
        let gateway = InMemoryGateway::new();
        let remote = RemotePath::new("/vip/Home/API/s/INPUTS/a.nii");

        assert!(gateway.upload_file(&local, &remote).await.unwrap_err().is_not_found());

        gateway.create_dir(&remote.parent().unwrap()).await.unwrap();
        gateway.fail_uploads(remote.clone(), 1);
        assert!(gateway.upload_file(&local, &remote).await.unwrap_err().is_transient());
        gateway.upload_file(&local, &remote).await.unwrap();
        assert_eq!(gateway.file(remote), Some(b"data".to_vec()));
    }

    #[tokio::test]
    async fn test_delete_removes_the_tree() {
        let gateway = InMemoryGateway::new();
        gateway.put_file("/vip/Home/API/s/OUTPUTS/w/r.tgz", b"x".to_vec());
        gateway.put_file("/vip/Home/API/other/keep", b"y".to_vec());

        gateway
            .delete(&RemotePath::new("/vip/Home/API/s"))
            .await
            .unwrap();
        assert!(!gateway
            .exists(&RemotePath::new("/vip/Home/API/s/OUTPUTS"))
            .await
            .unwrap());
        assert!(gateway
            .exists(&RemotePath::new("/vip/Home/API/other/keep"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_submission_quota() {
        let gateway = InMemoryGateway::new();
        gateway.add_pipeline(pipeline());
        gateway.accept_submissions(1);
        gateway.submit_job(&submission()).await.unwrap();
        let err = gateway.submit_job(&submission()).await.unwrap_err();
        assert!(matches!(err, VipError::Submission(_)));
        assert_eq!(gateway.submissions().len(), 1);
    }
}
