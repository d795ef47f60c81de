//! Lifecycle façade of one session.
//!
//! `VipSession` runs the five lifecycle steps (upload, launch, monitor,
//! download, finish) against the collaborators of a [`SessionContext`] and
//! checkpoints the session through the repository after each of them.
//! Every step is safe to repeat: a step whose work is already done performs
//! no remote mutation.

use crate::context::SessionContext;
use crate::settings::SessionSettings;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use vip_core::config::{DownloadConfig, VipConfig};
use vip_core::error::{Result, VipError};
use vip_core::remote_path::RemotePath;
use vip_core::session::{Session, SessionProperty, SessionValue};
use vip_core::workflow::{WorkflowRecord, WorkflowStatus};
use vip_execution::reconciler::{MonitorOptions, MonitorOutcome, WorkflowReconciler};
use vip_execution::transfer::{DownloadRequest, TransferManager, TransferReport};
use vip_execution::validation::{InputResolver, check_local_files};

/// Which outputs `download_outputs` retrieves and how.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadOptions {
    /// Workflows in one of these statuses have their outputs downloaded.
    pub statuses: Vec<WorkflowStatus>,
    pub extract_archives: bool,
}

impl From<&DownloadConfig> for DownloadOptions {
    fn from(config: &DownloadConfig) -> Self {
        Self {
            statuses: config.statuses.clone(),
            extract_archives: config.extract_archives,
        }
    }
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self::from(&DownloadConfig::default())
    }
}

pub struct VipSession {
    session: Session,
    context: SessionContext,
    last_transfer_report: Option<TransferReport>,
}

impl VipSession {
    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// Opens the session `name`, resuming its record when one exists at the
    /// default output location.
    pub async fn open(name: impl Into<String>, context: SessionContext) -> Result<Self> {
        Self::create(SessionSettings::named(name), context).await
    }

    /// Creates a session from `settings`.
    ///
    /// The record stored at the session's local output location is loaded
    /// when present; explicit settings must then agree with it.
    pub async fn create(settings: SessionSettings, context: SessionContext) -> Result<Self> {
        let name = settings
            .name
            .clone()
            .unwrap_or_else(Session::generate_name);
        let values = settings.values();

        let mut fresh = Session::new(name)?;
        for value in values.iter().cloned() {
            fresh.set(value)?;
        }
        fresh.apply_default_locations(&context.config);
        let identity = fresh.identity()?;

        let session = match context.repository.load(&identity).await? {
            Some(mut persisted) => {
                for value in values {
                    persisted.set(value)?;
                }
                persisted.apply_default_locations(&context.config);
                tracing::info!(
                    "Resumed session '{}' from {} ({} workflow(s))",
                    persisted.name(),
                    identity.location().display(),
                    persisted.workflows().len()
                );
                persisted
            }
            None => {
                tracing::info!("Created session '{}'", fresh.name());
                fresh
            }
        };

        Ok(Self {
            session,
            context,
            last_transfer_report: None,
        })
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn name(&self) -> &str {
        self.session.name()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn config(&self) -> &VipConfig {
        &self.context.config
    }

    pub fn pipeline_id(&self) -> Option<&str> {
        self.session.pipeline_id()
    }

    pub fn workflows(&self) -> &[WorkflowRecord] {
        self.session.workflows()
    }

    pub fn local_output_location(&self) -> Option<&Path> {
        self.session.local_output_location()
    }

    pub fn remote_input_location(&self) -> Option<&RemotePath> {
        self.session.remote_input_location()
    }

    /// Report of the most recent upload or download.
    pub fn last_transfer_report(&self) -> Option<&TransferReport> {
        self.last_transfer_report.as_ref()
    }

    /// Workflow identifiers grouped by status.
    pub fn execution_report(&self) -> BTreeMap<WorkflowStatus, Vec<String>> {
        self.session.execution_report()
    }

    /// Sets one property after construction, with the set-once rule.
    pub fn set(&mut self, value: SessionValue) -> Result<&mut Self> {
        self.session.set(value)?;
        Ok(self)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn transfers(&self) -> TransferManager {
        TransferManager::new(
            self.context.gateway.clone(),
            self.context.config.transfer.clone(),
        )
    }

    fn reconciler(&self) -> WorkflowReconciler {
        WorkflowReconciler::new(self.context.gateway.clone(), &self.context.config)
    }

    fn required_path(&self, property: SessionProperty) -> Result<PathBuf> {
        let value = match property {
            SessionProperty::LocalInputLocation => self.session.local_input_location(),
            SessionProperty::LocalOutputLocation => self.session.local_output_location(),
            _ => None,
        };
        value
            .map(Path::to_path_buf)
            .ok_or_else(|| self.session.missing(property))
    }

    fn required_remote(&self, property: SessionProperty) -> Result<RemotePath> {
        let value = match property {
            SessionProperty::RemoteInputLocation => self.session.remote_input_location(),
            SessionProperty::RemoteOutputLocation => self.session.remote_output_location(),
            _ => None,
        };
        value.cloned().ok_or_else(|| self.session.missing(property))
    }

    /// Saves the session when it changed since the last checkpoint.
    async fn checkpoint(&mut self) -> Result<()> {
        if !self.session.is_dirty() {
            return Ok(());
        }
        self.context.repository.save(&self.session).await?;
        self.session.mark_clean();
        tracing::debug!("Checkpointed session '{}'", self.session.name());
        Ok(())
    }

    /// One reconciliation pass over the non-terminal workflows.
    ///
    /// Returns the workflows the platform no longer knows. A workflow whose
    /// status stays unavailable after its retries keeps its recorded status.
    async fn refresh_workflows(&mut self) -> Result<BTreeSet<String>> {
        let reconciler = self.reconciler();
        let mut missing = BTreeSet::new();
        for workflow_id in self.session.non_terminal_ids() {
            let Some(record) = self.session.workflow(&workflow_id) else {
                continue;
            };
            match reconciler.refresh(record).await {
                Ok(update) => {
                    if update.remote_missing {
                        missing.insert(workflow_id);
                    }
                    self.session.apply_update(update)?;
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!("Status of '{}' unavailable: {}", workflow_id, e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(missing)
    }

    fn record_transfer(&mut self, report: TransferReport) -> Result<()> {
        let failures: Vec<VipError> = report
            .failed
            .iter()
            .map(|f| VipError::transport(format!("{}: {}", f.path, f.error)))
            .collect();
        self.last_transfer_report = Some(report);
        if failures.is_empty() {
            Ok(())
        } else {
            Err(VipError::Multiple(failures))
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Uploads the local dataset to the remote input location.
    ///
    /// Files already present remotely with the same identity are skipped.
    /// Files that still fail after their retries are listed in the returned
    /// [`VipError::Multiple`] and in [`last_transfer_report`](Self::last_transfer_report).
    pub async fn upload_inputs(&mut self) -> Result<&mut Self> {
        let local_input = self.required_path(SessionProperty::LocalInputLocation)?;
        let remote_input = self.required_remote(SessionProperty::RemoteInputLocation)?;

        if let Some(settings) = self.session.input_settings() {
            let definition = match self.session.pipeline_id() {
                Some(pipeline_id) => {
                    match self.context.gateway.pipeline_definition(pipeline_id).await {
                        Ok(definition) => Some(definition),
                        // Reported when launching.
                        Err(e) if e.is_not_found() => None,
                        Err(e) => return Err(e),
                    }
                }
                None => None,
            };
            let resolver = InputResolver {
                remote_prefix: &self.context.config.remote_prefix,
                remote_input: &remote_input,
                local_input: Some(&local_input),
            };
            check_local_files(settings, definition.as_ref(), &resolver)?;
        }

        let report = self.transfers().upload(&local_input, &remote_input).await?;
        let outcome = self.record_transfer(report);
        self.checkpoint().await?;
        outcome?;
        Ok(self)
    }

    /// Launches `runs` workflows with the session's pipeline and settings.
    ///
    /// Workflows accepted before a submission failure are registered and
    /// checkpointed before the failure is returned.
    pub async fn launch_pipeline(&mut self, runs: usize) -> Result<&mut Self> {
        let outcome = self.reconciler().submit(&self.session, runs).await?;
        let launched = outcome.records.len();
        for record in outcome.records {
            self.session.register_workflow(record)?;
        }
        self.checkpoint().await?;
        if let Some(e) = outcome.error {
            return Err(e);
        }
        tracing::info!(
            "Session '{}': {} workflow(s) launched",
            self.session.name(),
            launched
        );
        Ok(self)
    }

    /// Polls the workflows until all are terminal.
    ///
    /// Progress is checkpointed whatever the outcome. A timeout is reported
    /// as [`VipError::MonitorTimeout`] and a cancellation as
    /// [`VipError::Cancelled`].
    pub async fn monitor_workflows(
        &mut self,
        options: MonitorOptions,
        cancel: &CancellationToken,
    ) -> Result<&mut Self> {
        let reconciler = self.reconciler();
        let outcome = reconciler.monitor(&mut self.session, options, cancel).await;
        let saved = self.checkpoint().await;
        let outcome = outcome?;
        saved?;

        for (status, ids) in self.session.execution_report() {
            tracing::info!("{}: {}", status, ids.join(", "));
        }
        match outcome {
            MonitorOutcome::Completed => Ok(self),
            MonitorOutcome::TimedOut { elapsed, pending } => Err(VipError::MonitorTimeout {
                elapsed_secs: elapsed.as_secs_f64(),
                pending,
            }),
            MonitorOutcome::Cancelled { .. } => Err(VipError::Cancelled),
        }
    }

    /// Downloads the outputs of workflows in the selected statuses into the
    /// local output location, mirroring the remote layout.
    pub async fn download_outputs(&mut self, options: DownloadOptions) -> Result<&mut Self> {
        if options.statuses.contains(&WorkflowStatus::Removed) {
            return Err(VipError::invalid_input(
                "outputs of removed workflows cannot be downloaded",
            ));
        }
        let local_output = self.required_path(SessionProperty::LocalOutputLocation)?;
        let remote_output = self.required_remote(SessionProperty::RemoteOutputLocation)?;

        self.refresh_workflows().await?;

        let selected: Vec<WorkflowRecord> = self
            .session
            .workflows()
            .iter()
            .filter(|w| options.statuses.contains(&w.status))
            .cloned()
            .collect();
        if selected.is_empty() {
            tracing::info!("Session '{}': nothing to download", self.session.name());
        }

        let transfers = self.transfers();
        let mut combined = TransferReport::default();
        let mut failure = None;
        for record in &selected {
            let request = DownloadRequest {
                outputs: &record.outputs,
                remote_root: &remote_output,
                local_root: &local_output,
                already_downloaded: &record.downloaded,
                extract: options.extract_archives,
            };
            match transfers.download(request).await {
                Ok(report) => {
                    self.session
                        .record_downloads(&record.workflow_id, report.present().cloned())?;
                    combined.merge(report);
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        let outcome = self.record_transfer(combined);
        self.checkpoint().await?;
        if let Some(e) = failure {
            return Err(e);
        }
        outcome?;
        Ok(self)
    }

    /// Asks the platform to stop every non-terminal workflow.
    pub async fn kill_workflows(&mut self) -> Result<&mut Self> {
        let reconciler = self.reconciler();
        for workflow_id in self.session.non_terminal_ids() {
            match reconciler.kill(&workflow_id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    tracing::warn!("Workflow '{}' is unknown to the platform", workflow_id);
                }
                Err(e) => return Err(e),
            }
        }
        self.refresh_workflows().await?;
        self.checkpoint().await?;
        Ok(self)
    }

    /// Removes the session's data from the remote platform.
    ///
    /// Refuses while a workflow is still running. Workflows the platform no
    /// longer knows do not count as running. Local outputs and the dataset
    /// are kept. Workflows whose remote outputs are gone become `Removed`.
    pub async fn finish(&mut self) -> Result<&mut Self> {
        let missing = self.refresh_workflows().await?;
        let running: Vec<String> = self
            .session
            .non_terminal_ids()
            .into_iter()
            .filter(|id| !missing.contains(id))
            .collect();
        if !running.is_empty() {
            self.checkpoint().await?;
            return Err(VipError::WorkflowsRunning(running));
        }

        let gateway = self.context.gateway.clone();
        let session_dir = RemotePath::new(&self.context.config.remote_home).join(self.session.name());
        let mut targets = vec![session_dir.clone()];
        if let Some(output) = self.session.remote_output_location() {
            if !output.starts_with(&session_dir) {
                targets.push(output.clone());
            }
        }
        if let Some(input) = self.session.remote_input_location() {
            if !input.starts_with(&session_dir) && gateway.exists(input).await? {
                tracing::warn!(
                    "Input data at {} belong to another session and are kept",
                    input
                );
            }
        }

        let mut errors = Vec::new();
        for target in &targets {
            if !gateway.exists(target).await? {
                tracing::debug!("{} already removed", target);
                continue;
            }
            match gateway.delete(target).await {
                Ok(()) => tracing::info!("Removed {}", target),
                Err(e) => {
                    tracing::error!("Cannot remove {}: {}", target, e);
                    errors.push(e);
                }
            }
        }

        let mut removed = Vec::new();
        for record in self.session.workflows() {
            let gone = match record.outputs.first().and_then(|o| o.path.parent()) {
                Some(dir) => !gateway.exists(&dir).await?,
                None => true,
            };
            if gone {
                removed.push(record.workflow_id.clone());
            } else {
                tracing::warn!("Outputs of '{}' are still on the platform", record.workflow_id);
            }
        }
        for workflow_id in &removed {
            self.session.mark_removed(workflow_id)?;
        }

        self.checkpoint().await?;
        match errors.len() {
            0 => {
                tracing::info!("Session '{}' is finished", self.session.name());
                Ok(self)
            }
            1 => Err(errors.remove(0)),
            _ => Err(VipError::Multiple(errors)),
        }
    }

    /// Runs upload, launch, monitor and download in sequence, stopping at the
    /// first step that fails.
    ///
    /// Each step skips the work already done, so calling this again after a
    /// failure resumes where the previous call stopped. Workflows are only
    /// launched when the session has none yet.
    pub async fn run_session(
        &mut self,
        runs: usize,
        monitor: MonitorOptions,
        cancel: &CancellationToken,
        download: DownloadOptions,
    ) -> Result<&mut Self> {
        self.upload_inputs().await?;
        if self.session.workflows().is_empty() {
            self.launch_pipeline(runs).await?;
        } else {
            tracing::info!(
                "Session '{}' already has {} workflow(s)",
                self.session.name(),
                self.session.workflows().len()
            );
        }
        self.monitor_workflows(monitor, cancel).await?;
        self.download_outputs(download).await?;
        Ok(self)
    }

    /// Points this session at the dataset already uploaded by `other`.
    ///
    /// With `with_pipeline` the pipeline identifier and input settings of
    /// `other` are adopted too, where this session has none. Fails when this
    /// session already holds data on the platform.
    pub async fn use_inputs_from(&mut self, other: &VipSession, with_pipeline: bool) -> Result<&mut Self> {
        let other_input = other.required_remote(SessionProperty::RemoteInputLocation)?;
        if self.session.remote_input_location() == Some(&other_input) {
            tracing::info!(
                "Sessions '{}' and '{}' already share their inputs",
                self.session.name(),
                other.name()
            );
            return Ok(self);
        }

        let gateway = self.context.gateway.clone();
        let session_dir = RemotePath::new(&self.context.config.remote_home).join(self.session.name());
        if gateway.exists(&session_dir).await? {
            return Err(VipError::invalid_input(format!(
                "session '{}' already has data at {}; finish it first",
                self.session.name(),
                session_dir
            )));
        }
        if !gateway.exists(&other_input).await? {
            return Err(VipError::not_found("remote input location", other_input.as_str()));
        }

        self.session.clear(SessionProperty::RemoteInputLocation);
        self.session.set(SessionValue::RemoteInputLocation(other_input))?;
        self.session.clear(SessionProperty::LocalInputLocation);
        if let Some(local) = other.session.local_input_location() {
            self.session
                .set(SessionValue::LocalInputLocation(local.to_path_buf()))?;
        }
        if with_pipeline {
            if self.session.pipeline_id().is_none() {
                if let Some(id) = other.pipeline_id() {
                    self.session.set(SessionValue::PipelineId(id.to_string()))?;
                }
            }
            if self.session.input_settings().is_none() {
                if let Some(settings) = other.session.input_settings() {
                    self.session
                        .set(SessionValue::InputSettings(settings.clone()))?;
                }
            }
        }

        tracing::info!(
            "Session '{}' now uses the inputs of '{}'",
            self.session.name(),
            other.name()
        );
        self.checkpoint().await?;
        Ok(self)
    }
}
