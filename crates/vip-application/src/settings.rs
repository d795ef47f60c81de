use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use vip_core::input::InputSettings;
use vip_core::remote_path::RemotePath;
use vip_core::session::SessionValue;

/// Values given when a session is created.
///
/// Every field is optional. Unset locations are derived from the session
/// name; a missing name is generated. When a record already exists for the
/// session, each value given here must agree with it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub name: Option<String>,
    pub pipeline_id: Option<String>,
    pub input_settings: Option<InputSettings>,
    pub local_input_location: Option<PathBuf>,
    pub remote_input_location: Option<RemotePath>,
    pub remote_output_location: Option<RemotePath>,
    pub local_output_location: Option<PathBuf>,
}

impl SessionSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn pipeline(mut self, pipeline_id: impl Into<String>) -> Self {
        self.pipeline_id = Some(pipeline_id.into());
        self
    }

    pub fn inputs(mut self, settings: InputSettings) -> Self {
        self.input_settings = Some(settings);
        self
    }

    pub fn local_input(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_input_location = Some(path.into());
        self
    }

    pub fn remote_input(mut self, path: impl Into<RemotePath>) -> Self {
        self.remote_input_location = Some(path.into());
        self
    }

    pub fn remote_output(mut self, path: impl Into<RemotePath>) -> Self {
        self.remote_output_location = Some(path.into());
        self
    }

    pub fn local_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_output_location = Some(path.into());
        self
    }

    /// The explicit values, in the order they are applied.
    pub(crate) fn values(&self) -> Vec<SessionValue> {
        let mut values = Vec::new();
        if let Some(v) = &self.pipeline_id {
            values.push(SessionValue::PipelineId(v.clone()));
        }
        if let Some(v) = &self.input_settings {
            values.push(SessionValue::InputSettings(v.clone()));
        }
        if let Some(v) = &self.local_input_location {
            values.push(SessionValue::LocalInputLocation(v.clone()));
        }
        if let Some(v) = &self.remote_input_location {
            values.push(SessionValue::RemoteInputLocation(v.clone()));
        }
        if let Some(v) = &self.remote_output_location {
            values.push(SessionValue::RemoteOutputLocation(v.clone()));
        }
        if let Some(v) = &self.local_output_location {
            values.push(SessionValue::LocalOutputLocation(v.clone()));
        }
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vip_core::input::InputValue;

    #[test]
    fn test_settings_from_toml() {
        let settings: SessionSettings = toml::from_str(
            r#"
            name = "brain-study"
            pipeline_id = "CQUEST/0.3"
            local_input_location = "/data/brain"

            [input_settings.zipped_folder]
            kind = "file"
            value = "scan.zip"
            "#,
        )
        .unwrap();

        assert_eq!(settings.name.as_deref(), Some("brain-study"));
        assert_eq!(
            settings.input_settings.unwrap().get("zipped_folder"),
            Some(&InputValue::file("scan.zip"))
        );
        assert!(settings.remote_output_location.is_none());
    }

    #[test]
    fn test_values_only_carry_explicit_fields() {
        let settings = SessionSettings::named("s")
            .pipeline("CQUEST/0.3")
            .remote_output("/vip/Home/out");
        let values = settings.values();
        assert_eq!(values.len(), 2);
        assert_eq!(
            values[1],
            SessionValue::RemoteOutputLocation(RemotePath::new("/vip/Home/out"))
        );
    }
}
