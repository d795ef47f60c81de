//! Session domain model.
//!
//! A `Session` binds one pipeline, one dataset and one parameter set, and
//! owns the records of every workflow launched from that binding.

use super::repository::SessionIdentity;
use crate::config::VipConfig;
use crate::error::{Result, VipError};
use crate::input::InputSettings;
use crate::remote_path::RemotePath;
use crate::workflow::{WorkflowRecord, WorkflowStatus, WorkflowUpdate};
use chrono::Local;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Names a set-once property of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionProperty {
    PipelineId,
    InputSettings,
    LocalInputLocation,
    RemoteInputLocation,
    RemoteOutputLocation,
    LocalOutputLocation,
}

impl SessionProperty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PipelineId => "pipeline_id",
            Self::InputSettings => "input_settings",
            Self::LocalInputLocation => "local_input_location",
            Self::RemoteInputLocation => "remote_input_location",
            Self::RemoteOutputLocation => "remote_output_location",
            Self::LocalOutputLocation => "local_output_location",
        }
    }
}

impl fmt::Display for SessionProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value for one set-once property; the variant names the property.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionValue {
    PipelineId(String),
    InputSettings(InputSettings),
    LocalInputLocation(PathBuf),
    RemoteInputLocation(RemotePath),
    RemoteOutputLocation(RemotePath),
    LocalOutputLocation(PathBuf),
}

impl SessionValue {
    pub fn property(&self) -> SessionProperty {
        match self {
            Self::PipelineId(_) => SessionProperty::PipelineId,
            Self::InputSettings(_) => SessionProperty::InputSettings,
            Self::LocalInputLocation(_) => SessionProperty::LocalInputLocation,
            Self::RemoteInputLocation(_) => SessionProperty::RemoteInputLocation,
            Self::RemoteOutputLocation(_) => SessionProperty::RemoteOutputLocation,
            Self::LocalOutputLocation(_) => SessionProperty::LocalOutputLocation,
        }
    }
}

/// One (pipeline, dataset, parameter-set) binding and its workflows.
///
/// Identity properties are set-once: [`Session::set`] succeeds when the
/// property is unset or already holds an equal value, and fails with
/// [`VipError::AlreadySet`] otherwise. [`Session::clear`] is the only way to
/// replace a value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    name: String,
    #[serde(default)]
    pipeline_id: Option<String>,
    #[serde(default)]
    input_settings: Option<InputSettings>,
    #[serde(default)]
    local_input_location: Option<PathBuf>,
    #[serde(default)]
    remote_input_location: Option<RemotePath>,
    #[serde(default)]
    remote_output_location: Option<RemotePath>,
    #[serde(default)]
    local_output_location: Option<PathBuf>,
    /// Launch order.
    #[serde(default)]
    workflows: Vec<WorkflowRecord>,
    #[serde(skip)]
    dirty: bool,
}

// `dirty` is bookkeeping for the checkpoint cycle, not session state.
impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.pipeline_id == other.pipeline_id
            && self.input_settings == other.input_settings
            && self.local_input_location == other.local_input_location
            && self.remote_input_location == other.remote_input_location
            && self.remote_output_location == other.remote_output_location
            && self.local_output_location == other.local_output_location
            && self.workflows == other.workflows
    }
}

fn assign<T>(slot: &mut Option<T>, property: SessionProperty, value: T) -> Result<bool>
where
    T: PartialEq + fmt::Debug,
{
    if let Some(current) = slot.as_ref() {
        if *current == value {
            return Ok(false);
        }
        return Err(VipError::already_set(property.as_str(), current, &value));
    }
    *slot = Some(value);
    Ok(true)
}

impl Session {
    /// Creates an empty session. Fails when `name` cannot be embedded in a
    /// remote path.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        Self::validate_name(&name)?;
        Ok(Self {
            name,
            pipeline_id: None,
            input_settings: None,
            local_input_location: None,
            remote_input_location: None,
            remote_output_location: None,
            local_output_location: None,
            workflows: Vec::new(),
            dirty: true,
        })
    }

    /// Generates a name of the form `VipSession-yymmdd-hhmmss-xxx`.
    pub fn generate_name() -> String {
        let suffix: u16 = rand::thread_rng().gen_range(0..0x1000);
        format!(
            "VipSession-{}-{:03x}",
            Local::now().format("%y%m%d-%H%M%S"),
            suffix
        )
    }

    pub fn validate_name(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(VipError::invalid_input("session name is empty"));
        }
        if let Some(c) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
        {
            return Err(VipError::invalid_input(format!(
                "session name '{}' contains '{}'; only letters, digits, '_' and '-' are allowed",
                name, c
            )));
        }
        Ok(())
    }

    /// Fills every unset location with the value derived from the name.
    pub fn apply_default_locations(&mut self, config: &VipConfig) {
        let home = RemotePath::new(&config.remote_home).join(&self.name);
        if self.remote_input_location.is_none() {
            self.remote_input_location = Some(home.join("INPUTS"));
            self.dirty = true;
        }
        if self.remote_output_location.is_none() {
            self.remote_output_location = Some(home.join("OUTPUTS"));
            self.dirty = true;
        }
        if self.local_output_location.is_none() {
            self.local_output_location = Some(config.local_output_root.join(&self.name));
            self.dirty = true;
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pipeline_id(&self) -> Option<&str> {
        self.pipeline_id.as_deref()
    }

    pub fn input_settings(&self) -> Option<&InputSettings> {
        self.input_settings.as_ref()
    }

    pub fn local_input_location(&self) -> Option<&Path> {
        self.local_input_location.as_deref()
    }

    pub fn remote_input_location(&self) -> Option<&RemotePath> {
        self.remote_input_location.as_ref()
    }

    pub fn remote_output_location(&self) -> Option<&RemotePath> {
        self.remote_output_location.as_ref()
    }

    pub fn local_output_location(&self) -> Option<&Path> {
        self.local_output_location.as_deref()
    }

    pub fn workflows(&self) -> &[WorkflowRecord] {
        &self.workflows
    }

    pub fn workflow(&self, workflow_id: &str) -> Option<&WorkflowRecord> {
        self.workflows.iter().find(|w| w.workflow_id == workflow_id)
    }

    /// The error reported when a lifecycle step needs `property` and it is unset.
    pub fn missing(&self, property: SessionProperty) -> VipError {
        VipError::missing_property(&self.name, property.as_str())
    }

    /// The key under which this session is persisted.
    pub fn identity(&self) -> Result<SessionIdentity> {
        let location = self
            .local_output_location
            .clone()
            .ok_or_else(|| self.missing(SessionProperty::LocalOutputLocation))?;
        Ok(SessionIdentity::new(&self.name, location))
    }

    // ------------------------------------------------------------------
    // Set-once properties
    // ------------------------------------------------------------------

    /// Sets one identity property.
    ///
    /// Idempotent when the stored value is equal to `value`.
    pub fn set(&mut self, value: SessionValue) -> Result<()> {
        let property = value.property();
        let changed = match value {
            SessionValue::PipelineId(v) => assign(&mut self.pipeline_id, property, v)?,
            SessionValue::InputSettings(v) => assign(&mut self.input_settings, property, v)?,
            SessionValue::LocalInputLocation(v) => {
                assign(&mut self.local_input_location, property, v)?
            }
            SessionValue::RemoteInputLocation(v) => {
                assign(&mut self.remote_input_location, property, v)?
            }
            SessionValue::RemoteOutputLocation(v) => {
                assign(&mut self.remote_output_location, property, v)?
            }
            SessionValue::LocalOutputLocation(v) => {
                assign(&mut self.local_output_location, property, v)?
            }
        };
        if changed {
            tracing::debug!("Session '{}': {} set", self.name, property);
            self.dirty = true;
        }
        Ok(())
    }

    /// Clears one identity property so it can be set again.
    pub fn clear(&mut self, property: SessionProperty) {
        let was_set = match property {
            SessionProperty::PipelineId => self.pipeline_id.take().is_some(),
            SessionProperty::InputSettings => self.input_settings.take().is_some(),
            SessionProperty::LocalInputLocation => self.local_input_location.take().is_some(),
            SessionProperty::RemoteInputLocation => self.remote_input_location.take().is_some(),
            SessionProperty::RemoteOutputLocation => self.remote_output_location.take().is_some(),
            SessionProperty::LocalOutputLocation => self.local_output_location.take().is_some(),
        };
        if was_set {
            tracing::debug!("Session '{}': {} cleared", self.name, property);
            self.dirty = true;
        }
    }

    // ------------------------------------------------------------------
    // Workflow registry
    // ------------------------------------------------------------------

    pub fn register_workflow(&mut self, record: WorkflowRecord) -> Result<()> {
        if self.workflow(&record.workflow_id).is_some() {
            return Err(VipError::DuplicateWorkflow {
                workflow_id: record.workflow_id,
            });
        }
        self.workflows.push(record);
        self.dirty = true;
        Ok(())
    }

    fn workflow_mut(&mut self, workflow_id: &str) -> Result<&mut WorkflowRecord> {
        self.workflows
            .iter_mut()
            .find(|w| w.workflow_id == workflow_id)
            .ok_or_else(|| VipError::not_found("workflow", workflow_id))
    }

    /// Applies one reconciler delta.
    ///
    /// Once a workflow is terminal its status is frozen: a different status
    /// is logged and ignored. A repeated terminal status may still refresh
    /// the outputs. Returns whether the record changed.
    pub fn apply_update(&mut self, update: WorkflowUpdate) -> Result<bool> {
        let session = self.name.clone();
        let record = self.workflow_mut(&update.workflow_id)?;

        if record.status.is_terminal() {
            if update.status != record.status {
                tracing::warn!(
                    "Session '{}': workflow '{}' reported {} after {}; keeping {}",
                    session,
                    update.workflow_id,
                    update.status,
                    record.status,
                    record.status
                );
                return Ok(false);
            }
            return match update.outputs {
                Some(outputs) if outputs != record.outputs && record.status != WorkflowStatus::Removed => {
                    record.outputs = outputs;
                    self.dirty = true;
                    Ok(true)
                }
                _ => Ok(false),
            };
        }

        let mut changed = false;
        if record.status != update.status {
            tracing::info!(
                "Workflow '{}': {} -> {}",
                update.workflow_id,
                record.status,
                update.status
            );
            record.status = update.status;
            changed = true;
        }
        if update.start_time.is_some() && record.start_time != update.start_time {
            record.start_time = update.start_time;
            changed = true;
        }
        if update.status.is_terminal() {
            if let Some(outputs) = update.outputs {
                if outputs != record.outputs {
                    record.outputs = outputs;
                    changed = true;
                }
            }
        }
        if changed {
            self.dirty = true;
        }
        Ok(changed)
    }

    /// Records output paths retrieved locally for one workflow.
    pub fn record_downloads<I>(&mut self, workflow_id: &str, paths: I) -> Result<()>
    where
        I: IntoIterator<Item = String>,
    {
        let record = self.workflow_mut(workflow_id)?;
        let before = record.downloaded.len();
        record.downloaded.extend(paths);
        if record.downloaded.len() != before {
            self.dirty = true;
        }
        Ok(())
    }

    /// Marks a workflow whose remote outputs were deleted.
    pub fn mark_removed(&mut self, workflow_id: &str) -> Result<()> {
        let record = self.workflow_mut(workflow_id)?;
        if record.status != WorkflowStatus::Removed {
            record.status = WorkflowStatus::Removed;
            self.dirty = true;
        }
        Ok(())
    }

    /// Identifiers of workflows that may still change remotely, in launch order.
    pub fn non_terminal_ids(&self) -> Vec<String> {
        self.workflows
            .iter()
            .filter(|w| !w.is_terminal())
            .map(|w| w.workflow_id.clone())
            .collect()
    }

    /// Workflow identifiers grouped by status.
    pub fn execution_report(&self) -> BTreeMap<WorkflowStatus, Vec<String>> {
        let mut report: BTreeMap<WorkflowStatus, Vec<String>> = BTreeMap::new();
        for record in &self.workflows {
            report
                .entry(record.status)
                .or_default()
                .push(record.workflow_id.clone());
        }
        report
    }

    /// Whether something changed since the last checkpoint.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}
