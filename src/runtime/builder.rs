//! Builds runtime descriptors at creation time and patches them at save time.

use std::path::Path;

use tracing::warn;

use crate::common::config::{ArtifactOptions, SessionCfg};
use crate::common::error::{ArtifactError, ArtifactResult};
use crate::common::progress::Progress;
use crate::provenance::{InferenceCondaEnv, PackType, ProvenanceResolver, TrainingCodeInfo};

use super::domain::{ModelDeployment, RuntimeDescriptor, MODEL_ARTIFACT_VERSION};

/// Creates descriptors from provenance or from the empty template.
pub struct RuntimeBuilder<'a> {
    cfg: &'a SessionCfg,
    resolver: &'a ProvenanceResolver<'a>,
}

impl<'a> RuntimeBuilder<'a> {
    pub fn new(cfg: &'a SessionCfg, resolver: &'a ProvenanceResolver<'a>) -> Self {
        Self { cfg, resolver }
    }

    /// Descriptor for a newly created artifact. Inside a training session it is
    /// resolved from provenance, otherwise the template is used.
    pub fn create(
        &self,
        artifact_dir: &Path,
        opts: &ArtifactOptions,
        progress: &mut dyn Progress,
    ) -> ArtifactResult<RuntimeDescriptor> {
        progress.update("Creating runtime.yaml configuration");
        if self.cfg.in_training_session() {
            self.generate(artifact_dir, opts)
        } else {
            Ok(empty_template(opts))
        }
    }

    /// Descriptor resolved from the training session.
    pub fn generate(
        &self,
        artifact_dir: &Path,
        opts: &ArtifactOptions,
    ) -> ArtifactResult<RuntimeDescriptor> {
        let training = self.resolver.resolve_training_env(opts)?;
        let mut provenance = self.resolver.environment_details();
        let (_, code) = self.resolver.training_code(artifact_dir)?;
        provenance.training_code = Some(code);

        if training.training_env_path.is_none() {
            warn!(
                "the training conda environment is not published; publishing it is optional but \
                 lets the exact training environment be reused later"
            );
        }
        let inference = self.resolver.resolve_deployment_env(&training, opts)?;
        provenance.training_conda_env = Some(training);

        let model_deployment = inference
            .inference_env_path
            .is_some()
            .then(|| ModelDeployment {
                inference_conda_env: Some(inference),
            });
        Ok(RuntimeDescriptor {
            model_artifact_version: MODEL_ARTIFACT_VERSION.to_string(),
            model_provenance: Some(provenance),
            model_deployment,
        })
    }
}

/// Template descriptor carrying only the explicit conda overrides.
pub fn empty_template(opts: &ArtifactOptions) -> RuntimeDescriptor {
    warn!(
        "generating a runtime.yaml template; fill in MODEL_DEPLOYMENT.INFERENCE_CONDA_ENV with \
         valid values, or pass `inference_conda_env`, before saving to the model catalog"
    );
    let inference = InferenceCondaEnv {
        inference_env_slug: opts
            .inference_conda_env
            .as_deref()
            .and_then(|uri| uri.trim_end_matches('/').rsplit('/').next())
            .map(str::to_string),
        inference_env_type: Some(PackType::from_data_science_flag(opts.data_science_env)),
        inference_env_path: opts.inference_conda_env.clone(),
        inference_python_version: opts.inference_python_version.clone(),
    };
    RuntimeDescriptor {
        model_artifact_version: MODEL_ARTIFACT_VERSION.to_string(),
        model_provenance: None,
        model_deployment: Some(ModelDeployment {
            inference_conda_env: Some(inference),
        }),
    }
}

/// Merge freshly resolved training code into the loaded descriptor.
pub fn merge_training_code(
    descriptor: Option<RuntimeDescriptor>,
    code: TrainingCodeInfo,
) -> RuntimeDescriptor {
    let mut descriptor = descriptor.unwrap_or_default();
    descriptor
        .model_provenance
        .get_or_insert_with(Default::default)
        .training_code = Some(code);
    descriptor
}

/// A descriptor without an inference path cannot be deployed unless an
/// override was given at construction.
pub fn check_deployment(descriptor: &RuntimeDescriptor, opts: &ArtifactOptions) -> ArtifactResult<()> {
    if descriptor.is_deployment_complete() || opts.inference_conda_env.is_some() {
        return Ok(());
    }
    ArtifactError::DeploymentIncomplete.tolerate(opts.ignore_deployment_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::progress::StepCounter;
    use crate::provenance::{RepoState, VcsProbe};
    use std::fs;

    struct NoRepo;

    impl VcsProbe for NoRepo {
        fn inspect(&self, start: &Path) -> ArtifactResult<RepoState> {
            Err(ArtifactError::NoRepository(start.to_path_buf()))
        }
    }

    #[test]
    fn outside_a_session_the_template_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = SessionCfg::default();
        let resolver = ProvenanceResolver::new(&cfg, &NoRepo);
        let mut progress = StepCounter::default();
        let descriptor = RuntimeBuilder::new(&cfg, &resolver)
            .create(dir.path(), &ArtifactOptions::default(), &mut progress)
            .unwrap();
        assert_eq!(progress.steps, 1);
        assert_eq!(descriptor.inference_env_path(), None);
        assert_eq!(
            descriptor.inference_env().and_then(|e| e.inference_env_type),
            Some(PackType::Published)
        );
        assert!(check_deployment(&descriptor, &ArtifactOptions::default()).is_err());
    }

    #[test]
    fn template_keeps_explicit_overrides() {
        let opts = ArtifactOptions {
            inference_conda_env: Some("oci://b@ns/envs/myenv_v1".into()),
            inference_python_version: Some("3.8".into()),
            data_science_env: true,
            ..Default::default()
        };
        let descriptor = empty_template(&opts);
        let env = descriptor.inference_env().unwrap();
        assert_eq!(env.inference_env_slug.as_deref(), Some("myenv_v1"));
        assert_eq!(env.inference_env_type, Some(PackType::Service));
        assert_eq!(env.inference_python_version.as_deref(), Some("3.8"));
        assert!(descriptor.is_deployment_complete());
    }

    #[test]
    fn session_descriptor_is_built_from_the_manifest() {
        let prefix = tempfile::tempdir().unwrap();
        fs::write(
            prefix.path().join("myenv_manifest.yaml"),
            "manifest:\n  slug: myenv_v1_0\n  type: published\n  pack_path: oci://b@ns/p/myenv_v1_0\n  python: '3.8'\n",
        )
        .unwrap();
        let artifact = tempfile::tempdir().unwrap();
        let cfg = SessionCfg {
            conda_prefix: Some(prefix.path().to_path_buf()),
            nb_session_ocid: Some("ocid1.nb".into()),
            ..Default::default()
        };
        let resolver = ProvenanceResolver::new(&cfg, &NoRepo);
        let descriptor = RuntimeBuilder::new(&cfg, &resolver)
            .create(artifact.path(), &ArtifactOptions::default(), &mut StepCounter::default())
            .unwrap();

        let provenance = descriptor.model_provenance.as_ref().unwrap();
        assert_eq!(provenance.training_resource_ocid.as_deref(), Some("ocid1.nb"));
        assert!(provenance.training_code.is_some());
        assert_eq!(descriptor.training_env_slug(), Some("myenv_v1_0"));
        assert_eq!(descriptor.inference_env_path(), Some("oci://b@ns/p/myenv_v1_0"));
    }

    #[test]
    fn merge_adds_training_code_to_a_template() {
        let code = TrainingCodeInfo {
            artifact_directory: Some("/work/artifact".into()),
            ..Default::default()
        };
        let merged = merge_training_code(Some(empty_template(&ArtifactOptions::default())), code);
        let provenance = merged.model_provenance.unwrap();
        assert_eq!(
            provenance.training_code.unwrap().artifact_directory.as_deref(),
            Some("/work/artifact")
        );
        assert!(merged.model_deployment.is_some());
    }
}
