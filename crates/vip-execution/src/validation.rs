//! Input validation and resolution of file references.
//!
//! File references in input settings may be remote paths (below the remote
//! prefix), paths inside the local dataset, or paths relative to it. Before
//! submission every reference is rebased onto the session's remote input
//! location.

use std::path::{Path, PathBuf};
use vip_core::error::{Result, VipError};
use vip_core::gateway::{ParameterKind, PipelineDefinition, RemoteGateway};
use vip_core::input::{InputSettings, JobParameters};
use vip_core::remote_path::RemotePath;

/// Resolves file references of one session.
#[derive(Debug, Clone)]
pub struct InputResolver<'a> {
    pub remote_prefix: &'a str,
    pub remote_input: &'a RemotePath,
    pub local_input: Option<&'a Path>,
}

impl InputResolver<'_> {
    fn is_remote(&self, path: &Path) -> bool {
        let text = path.to_string_lossy();
        let prefix = self.remote_prefix.trim_end_matches('/');
        text == prefix || text.starts_with(&format!("{}/", prefix))
    }

    /// The remote path a file reference designates.
    pub fn remote_path(&self, path: &Path) -> Result<RemotePath> {
        if self.is_remote(path) {
            return Ok(RemotePath::new(path.to_string_lossy()));
        }
        if path.is_absolute() {
            let relative = self
                .local_input
                .and_then(|root| path.strip_prefix(root).ok())
                .ok_or_else(|| {
                    VipError::invalid_input(format!(
                        "file '{}' is neither remote nor inside the local input location",
                        path.display()
                    ))
                })?;
            return Ok(self.remote_input.join_local(relative));
        }
        Ok(self.remote_input.join_local(path))
    }

    /// The local file a reference designates, or `None` for remote references.
    pub fn local_path(&self, path: &Path) -> Option<PathBuf> {
        if self.is_remote(path) {
            return None;
        }
        if path.is_absolute() {
            return Some(path.to_path_buf());
        }
        self.local_input.map(|root| root.join(path))
    }
}

/// Settings checked against a pipeline and expanded into jobs.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedInputs {
    pub settings: InputSettings,
    pub jobs: Vec<JobParameters>,
}

/// Literal values of file-typed parameters become file references.
fn promote_file_parameters(settings: &InputSettings, definition: &PipelineDefinition) -> InputSettings {
    settings.map_values(|name, value| match definition.parameter(name) {
        Some(p) if p.kind == ParameterKind::File => value.as_file_references(),
        _ => value.clone(),
    })
}

/// Checks that the pipeline exists and that the settings match it.
pub async fn check_pipeline(
    gateway: &dyn RemoteGateway,
    pipeline_id: &str,
    settings: &InputSettings,
) -> Result<PipelineDefinition> {
    let available = gateway.list_pipelines().await?;
    if !available.iter().any(|p| p == pipeline_id) {
        return Err(VipError::UnknownPipeline(pipeline_id.to_string()));
    }
    let definition = gateway.pipeline_definition(pipeline_id).await?;

    let missing: Vec<&str> = definition
        .parameters
        .iter()
        .filter(|p| p.is_required() && !settings.contains(&p.name))
        .map(|p| p.name.as_str())
        .collect();
    if !missing.is_empty() {
        return Err(VipError::invalid_input(format!(
            "missing required parameter(s) for {}: {}",
            pipeline_id,
            missing.join(", ")
        )));
    }

    for name in settings.names() {
        if definition.parameter(name).is_none() {
            tracing::warn!("Parameter '{}' is not declared by {}", name, pipeline_id);
        }
    }
    Ok(definition)
}

/// Validates settings for submission and expands them into jobs.
///
/// Every check that needs no remote call runs first, so malformed settings
/// fail before the gateway is contacted.
pub async fn prepare_submission(
    gateway: &dyn RemoteGateway,
    pipeline_id: &str,
    settings: &InputSettings,
    resolver: &InputResolver<'_>,
) -> Result<PreparedInputs> {
    settings.validate()?;
    for (_, value) in settings.iter() {
        for file in value.files() {
            resolver.remote_path(file)?;
        }
    }

    let definition = check_pipeline(gateway, pipeline_id, settings).await?;
    let settings = promote_file_parameters(settings, &definition);

    for (name, value) in settings.iter() {
        for file in value.files() {
            let remote = resolver.remote_path(file)?;
            if !gateway.exists(&remote).await? {
                return Err(VipError::MissingInputFile {
                    parameter: name.clone(),
                    path: remote.to_string(),
                    location: "remote".to_string(),
                });
            }
        }
    }

    let jobs = settings.fan_out(|path| resolver.remote_path(path).map(String::from))?;
    Ok(PreparedInputs { settings, jobs })
}

/// Checks that every local file reference exists in the dataset.
///
/// With the pipeline's `definition`, literal values of its file parameters
/// are checked too.
pub fn check_local_files(
    settings: &InputSettings,
    definition: Option<&PipelineDefinition>,
    resolver: &InputResolver<'_>,
) -> Result<()> {
    let promoted;
    let settings = match definition {
        Some(definition) => {
            promoted = promote_file_parameters(settings, definition);
            &promoted
        }
        None => settings,
    };
    for (name, value) in settings.iter() {
        for file in value.files() {
            let Some(local) = resolver.local_path(file) else {
                continue;
            };
            if !local.exists() {
                return Err(VipError::MissingInputFile {
                    parameter: name.clone(),
                    path: local.display().to_string(),
                    location: "local".to_string(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vip_core::gateway::PipelineParameter;
    use vip_core::input::InputValue;
    use vip_infrastructure::InMemoryGateway;

    fn param(name: &str, kind: ParameterKind, optional: bool) -> PipelineParameter {
        PipelineParameter {
            name: name.to_string(),
            kind,
            optional,
            default_value: None,
        }
    }

    fn gateway() -> InMemoryGateway {
        let gateway = InMemoryGateway::new();
        gateway.add_pipeline(PipelineDefinition {
            identifier: "CQUEST/0.3".to_string(),
            parameters: vec![
                param("image", ParameterKind::File, false),
                param("threshold", ParameterKind::Number, true),
            ],
        });
        gateway.put_file("/vip/Home/API/s/INPUTS/a.nii", b"a".to_vec());
        gateway.put_file("/vip/Home/API/s/INPUTS/b.nii", b"b".to_vec());
        gateway
    }

    fn remote_input() -> RemotePath {
        RemotePath::new("/vip/Home/API/s/INPUTS")
    }

    #[test]
    fn test_resolution_rules() {
        let remote_input = remote_input();
        let resolver = InputResolver {
            remote_prefix: "/vip",
            remote_input: &remote_input,
            local_input: Some(Path::new("/data/study")),
        };
        assert_eq!(
            resolver.remote_path(Path::new("scan.nii")).unwrap().as_str(),
            "/vip/Home/API/s/INPUTS/scan.nii"
        );
        assert_eq!(
            resolver
                .remote_path(Path::new("/data/study/sub/scan.nii"))
                .unwrap()
                .as_str(),
            "/vip/Home/API/s/INPUTS/sub/scan.nii"
        );
        assert_eq!(
            resolver
                .remote_path(Path::new("/vip/Home/shared/atlas.nii"))
                .unwrap()
                .as_str(),
            "/vip/Home/shared/atlas.nii"
        );
        assert!(resolver.remote_path(Path::new("/elsewhere/x.nii")).is_err());
        assert!(resolver.local_path(Path::new("/vip/Home/shared/atlas.nii")).is_none());
        assert!(!resolver.is_remote(Path::new("/vipx/file")));
    }

    #[tokio::test]
    async fn test_prepare_promotes_file_literals_and_fans_out() {
        let gateway = gateway();
        let remote_input = remote_input();
        let resolver = InputResolver {
            remote_prefix: "/vip",
            remote_input: &remote_input,
            local_input: None,
        };
        let settings = InputSettings::new()
            .with("image", vec!["a.nii", "b.nii"])
            .with("threshold", "0.5");

        let prepared = prepare_submission(&gateway, "CQUEST/0.3", &settings, &resolver)
            .await
            .unwrap();
        assert_eq!(prepared.jobs.len(), 2);
        assert_eq!(prepared.jobs[0]["image"], "/vip/Home/API/s/INPUTS/a.nii");
        assert_eq!(prepared.jobs[1]["image"], "/vip/Home/API/s/INPUTS/b.nii");
        assert_eq!(prepared.jobs[1]["threshold"], "0.5");
    }

    #[tokio::test]
    async fn test_prepare_reports_configuration_errors() {
        let gateway = gateway();
        let remote_input = remote_input();
        let resolver = InputResolver {
            remote_prefix: "/vip",
            remote_input: &remote_input,
            local_input: None,
        };

        let settings = InputSettings::new().with("image", InputValue::file("a.nii"));
        let err = prepare_submission(&gateway, "Nope/1.0", &settings, &resolver)
            .await
            .unwrap_err();
        assert!(matches!(err, VipError::UnknownPipeline(_)));

        let settings = InputSettings::new().with("threshold", "0.5");
        let err = prepare_submission(&gateway, "CQUEST/0.3", &settings, &resolver)
            .await
            .unwrap_err();
        assert!(err.is_invalid_input());
        assert!(err.to_string().contains("image"));

        let settings = InputSettings::new().with("image", InputValue::file("missing.nii"));
        let err = prepare_submission(&gateway, "CQUEST/0.3", &settings, &resolver)
            .await
            .unwrap_err();
        assert!(matches!(err, VipError::MissingInputFile { .. }));
    }

    #[tokio::test]
    async fn test_malformed_settings_fail_before_any_remote_call() {
        let gateway = gateway();
        let remote_input = remote_input();
        let resolver = InputResolver {
            remote_prefix: "/vip",
            remote_input: &remote_input,
            local_input: None,
        };
        let settings = InputSettings::new()
            .with("image", vec!["a.nii", "b.nii"])
            .with("threshold", vec!["1", "2", "3"]);

        let err = prepare_submission(&gateway, "Nope/1.0", &settings, &resolver)
            .await
            .unwrap_err();
        assert!(err.is_invalid_input());
    }

    #[test]
    fn test_local_files_must_exist() {
        let dataset = TempDir::new().unwrap();
        std::fs::write(dataset.path().join("a.nii"), b"a").unwrap();
        let remote_input = remote_input();
        let resolver = InputResolver {
            remote_prefix: "/vip",
            remote_input: &remote_input,
            local_input: Some(dataset.path()),
        };

        let ok = InputSettings::new()
            .with("image", InputValue::file("a.nii"))
            .with("atlas", InputValue::file("/vip/Home/shared/atlas.nii"));
        check_local_files(&ok, None, &resolver).unwrap();

        let missing = InputSettings::new().with("image", InputValue::file("b.nii"));
        let err = check_local_files(&missing, None, &resolver).unwrap_err();
        assert!(matches!(err, VipError::MissingInputFile { .. }));
    }

    #[tokio::test]
    async fn test_literals_of_file_parameters_are_checked_locally() {
        let dataset = TempDir::new().unwrap();
        std::fs::write(dataset.path().join("a.nii"), b"a").unwrap();
        let remote_input = remote_input();
        let resolver = InputResolver {
            remote_prefix: "/vip",
            remote_input: &remote_input,
            local_input: Some(dataset.path()),
        };
        let definition = gateway().pipeline_definition("CQUEST/0.3").await.unwrap();

        let settings = InputSettings::new()
            .with("image", vec!["a.nii", "b.nii"])
            .with("threshold", "0.5");
        // Plain strings are not file references on their own.
        check_local_files(&settings, None, &resolver).unwrap();

        let err = check_local_files(&settings, Some(&definition), &resolver).unwrap_err();
        match err {
            VipError::MissingInputFile { parameter, path, .. } => {
                assert_eq!(parameter, "image");
                assert!(path.ends_with("b.nii"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
