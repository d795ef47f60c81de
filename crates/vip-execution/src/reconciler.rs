//! Workflow Registry & Reconciler.
//!
//! Submits workflows, refreshes their status from the gateway and turns
//! each observation into a [`WorkflowUpdate`] that the session applies.
//! The reconciler never mutates workflow records directly.

use crate::retry::RetryPolicy;
use crate::validation::{InputResolver, prepare_submission};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use vip_core::config::{MonitorConfig, VipConfig};
use vip_core::error::{Result, VipError};
use vip_core::gateway::{RemoteGateway, WorkflowSubmission};
use vip_core::session::{Session, SessionProperty};
use vip_core::workflow::{WorkflowRecord, WorkflowUpdate};

/// Parameters of one `monitor` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorOptions {
    pub poll_interval: Duration,
    /// Give up after this long; `None` waits until every workflow is terminal.
    pub timeout: Option<Duration>,
}

impl MonitorOptions {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl From<&MonitorConfig> for MonitorOptions {
    fn from(config: &MonitorConfig) -> Self {
        Self::new(Duration::from_secs(config.poll_interval_secs))
    }
}

/// How a `monitor` call ended. Pending lists name workflows still non-terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorOutcome {
    Completed,
    TimedOut { elapsed: Duration, pending: Vec<String> },
    Cancelled { pending: Vec<String> },
}

/// Result of a `submit` call.
///
/// Submissions are independent: when one fails, the workflows accepted
/// before it are still returned so the caller can record them.
#[derive(Debug)]
pub struct SubmissionOutcome {
    pub records: Vec<WorkflowRecord>,
    pub error: Option<VipError>,
}

impl SubmissionOutcome {
    pub fn into_result(self) -> Result<Vec<WorkflowRecord>> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.records),
        }
    }
}

pub struct WorkflowReconciler {
    gateway: Arc<dyn RemoteGateway>,
    remote_prefix: String,
    status_policy: RetryPolicy,
}

impl WorkflowReconciler {
    pub fn new(gateway: Arc<dyn RemoteGateway>, config: &VipConfig) -> Self {
        Self {
            gateway,
            remote_prefix: config.remote_prefix.clone(),
            status_policy: RetryPolicy::for_status(&config.monitor),
        }
    }

    pub fn with_status_policy(mut self, policy: RetryPolicy) -> Self {
        self.status_policy = policy;
        self
    }

    // ------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------

    /// Submits `runs` identical workflows for the session's settings.
    ///
    /// Each workflow carries one job per fan-out element. Configuration
    /// errors are reported before anything is submitted.
    pub async fn submit(&self, session: &Session, runs: usize) -> Result<SubmissionOutcome> {
        if runs == 0 {
            return Err(VipError::invalid_input("the number of runs must be at least 1"));
        }
        let pipeline_id = session
            .pipeline_id()
            .ok_or_else(|| session.missing(SessionProperty::PipelineId))?;
        let settings = session
            .input_settings()
            .ok_or_else(|| session.missing(SessionProperty::InputSettings))?;
        let remote_input = session
            .remote_input_location()
            .ok_or_else(|| session.missing(SessionProperty::RemoteInputLocation))?;
        let remote_output = session
            .remote_output_location()
            .ok_or_else(|| session.missing(SessionProperty::RemoteOutputLocation))?;

        let resolver = InputResolver {
            remote_prefix: &self.remote_prefix,
            remote_input,
            local_input: session.local_input_location(),
        };
        let prepared =
            prepare_submission(self.gateway.as_ref(), pipeline_id, settings, &resolver).await?;

        if !self.gateway.exists(remote_output).await? {
            self.gateway.create_dir(remote_output).await?;
        }

        let submission = WorkflowSubmission {
            pipeline_id: pipeline_id.to_string(),
            name: session.name().to_string(),
            results_location: remote_output.clone(),
            jobs: prepared.jobs,
        };
        let jobs = submission.jobs.len();

        let mut records = Vec::with_capacity(runs);
        for run in 0..runs {
            // Not retried: a lost acknowledgement would duplicate the workflow.
            match self.gateway.submit_job(&submission).await {
                Ok(workflow_id) => {
                    tracing::info!(
                        "Launched workflow '{}' ({} job(s), run {}/{})",
                        workflow_id,
                        jobs,
                        run + 1,
                        runs
                    );
                    records.push(WorkflowRecord::submitted(workflow_id, jobs));
                }
                Err(e) => {
                    tracing::error!("Submission {}/{} failed: {}", run + 1, runs, e);
                    return Ok(SubmissionOutcome {
                        records,
                        error: Some(e),
                    });
                }
            }
        }
        Ok(SubmissionOutcome {
            records,
            error: None,
        })
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    /// Queries one workflow's status.
    ///
    /// A workflow unknown to the platform yields an `Unknown` delta flagged
    /// as missing rather than an error.
    pub async fn refresh(&self, record: &WorkflowRecord) -> Result<WorkflowUpdate> {
        let gateway = self.gateway.as_ref();
        let workflow_id = record.workflow_id.as_str();
        let label = format!("status of {}", workflow_id);

        let report = match self
            .status_policy
            .run(&label, move || gateway.get_job_status(workflow_id))
            .await
        {
            Ok(report) => report,
            Err(e) if e.is_not_found() => {
                tracing::warn!("Workflow '{}' is unknown to the platform", workflow_id);
                return Ok(WorkflowUpdate::missing(workflow_id));
            }
            Err(e) => return Err(e),
        };

        let mut update = WorkflowUpdate::status(workflow_id, report.status);
        update.start_time = report.start_time;
        if report.status.is_terminal() {
            update.outputs = Some(report.outputs.unwrap_or_default());
        }
        Ok(update)
    }

    /// Refreshes every non-terminal workflow of the session until all are
    /// terminal, the timeout expires, or `cancel` fires.
    ///
    /// Updates of one tick are applied to the session at the end of the
    /// tick. Cancellation is only observed while sleeping between ticks.
    pub async fn monitor(
        &self,
        session: &mut Session,
        options: MonitorOptions,
        cancel: &CancellationToken,
    ) -> Result<MonitorOutcome> {
        let started = Instant::now();
        let mut missing: BTreeSet<String> = BTreeSet::new();

        loop {
            let tick_started = Instant::now();
            let pending = pending_ids(session, &missing);
            if pending.is_empty() {
                return Ok(MonitorOutcome::Completed);
            }

            let mut updates = Vec::with_capacity(pending.len());
            let mut failure = None;
            for workflow_id in &pending {
                let Some(record) = session.workflow(workflow_id) else {
                    continue;
                };
                match self.refresh(record).await {
                    Ok(update) => {
                        if update.remote_missing {
                            missing.insert(workflow_id.clone());
                        }
                        updates.push(update);
                    }
                    Err(e) if e.is_transient() => {
                        tracing::warn!(
                            "Status of '{}' unavailable this tick: {}",
                            workflow_id,
                            e
                        );
                    }
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
            for update in updates {
                session.apply_update(update)?;
            }
            if let Some(e) = failure {
                return Err(e);
            }

            let pending = pending_ids(session, &missing);
            if pending.is_empty() {
                tracing::info!("All workflows of '{}' are terminal", session.name());
                return Ok(MonitorOutcome::Completed);
            }

            let mut pause = options.poll_interval.saturating_sub(tick_started.elapsed());
            if let Some(timeout) = options.timeout {
                let elapsed = started.elapsed();
                if elapsed >= timeout {
                    tracing::warn!(
                        "Monitoring of '{}' timed out with {} workflow(s) pending",
                        session.name(),
                        pending.len()
                    );
                    return Ok(MonitorOutcome::TimedOut { elapsed, pending });
                }
                pause = pause.min(timeout - elapsed);
            }

            tracing::info!(
                "{} workflow(s) still running; next check in {:.1}s",
                pending.len(),
                pause.as_secs_f64()
            );
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Monitoring of '{}' cancelled", session.name());
                    return Ok(MonitorOutcome::Cancelled { pending });
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }

    /// Asks the platform to stop a workflow. The `Killed` status is observed
    /// by the next refresh.
    pub async fn kill(&self, workflow_id: &str) -> Result<()> {
        let gateway = self.gateway.as_ref();
        let label = format!("kill of {}", workflow_id);
        self.status_policy
            .run(&label, move || gateway.kill_workflow(workflow_id))
            .await?;
        tracing::info!("Kill requested for workflow '{}'", workflow_id);
        Ok(())
    }
}

fn pending_ids(session: &Session, missing: &BTreeSet<String>) -> Vec<String> {
    session
        .non_terminal_ids()
        .into_iter()
        .filter(|id| !missing.contains(id))
        .collect()
}
