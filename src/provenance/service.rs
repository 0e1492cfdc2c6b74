//! Provenance resolution: repository state, training environment and the
//! environment the model is deployed with.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::common::config::{ArtifactOptions, SessionCfg};
use crate::common::error::{ArtifactError, ArtifactResult};
use crate::common::fs;
use crate::common::storage::ObjectStorage;

use super::conda::{self, CondaUri};
use super::domain::{
    InferenceCondaEnv, ModelProvenance, PackType, TrainingCodeInfo, TrainingCondaEnv, NOT_FOUND,
    VM_ID_NOT_SET,
};
use super::git::{RepoState, VcsProbe};

/// Object metadata header holding the JSON manifest of a published pack.
pub const PACK_MANIFEST_HEADER: &str = "opc-meta-manifest";

/// Gathers provenance from the session configuration and collaborators.
pub struct ProvenanceResolver<'a> {
    cfg: &'a SessionCfg,
    vcs: &'a dyn VcsProbe,
    storage: Option<&'a dyn ObjectStorage>,
}

impl<'a> ProvenanceResolver<'a> {
    pub fn new(cfg: &'a SessionCfg, vcs: &'a dyn VcsProbe) -> Self {
        Self {
            cfg,
            vcs,
            storage: None,
        }
    }

    /// Object storage used to look up published pack metadata.
    pub fn with_storage(mut self, storage: &'a dyn ObjectStorage) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Snapshot of the repository enclosing `path`.
    pub fn resolve_repo(&self, path: &Path) -> ArtifactResult<RepoState> {
        self.vcs.inspect(path)
    }

    /// Training code section for `artifact_dir`. Without a repository the
    /// directory itself is recorded as a `file://` remote.
    pub fn training_code(
        &self,
        artifact_dir: &Path,
    ) -> ArtifactResult<(Option<RepoState>, TrainingCodeInfo)> {
        let artifact_dir = fs::absolute(artifact_dir)?;
        let repo = match self.resolve_repo(&artifact_dir) {
            Ok(repo) => Some(repo),
            Err(ArtifactError::NoRepository(path)) => {
                debug!(path = %path.display(), "no repository encloses the artifact");
                None
            }
            Err(err) => {
                warn!(error = %err, "could not inspect the repository; git details are not recorded");
                None
            }
        };
        let mut code = match &repo {
            Some(repo) => repo.training_code(),
            None => TrainingCodeInfo {
                git_remote: Some(format!("file://{}", artifact_dir.display())),
                ..Default::default()
            },
        };
        code.artifact_directory = Some(artifact_dir.display().to_string());
        Ok((repo, code))
    }

    /// Training code section checked for pending changes. The artifact
    /// directory and the training script must both be clean unless
    /// `ignore_pending_changes` is set.
    pub fn training_code_info(
        &self,
        artifact_dir: &Path,
        training_script: Option<&Path>,
        ignore_pending_changes: bool,
    ) -> ArtifactResult<TrainingCodeInfo> {
        let (repo, mut code) = self.training_code(artifact_dir)?;
        if let Some(script) = training_script {
            if script.exists() {
                let script = fs::absolute(script)?;
                assert_path_clean(repo.as_ref(), &script, ignore_pending_changes)?;
                code.training_script = Some(script.display().to_string());
            } else {
                warn!(path = %script.display(), "training script does not exist");
            }
        }
        let artifact_dir = fs::absolute(artifact_dir)?;
        assert_path_clean(repo.as_ref(), &artifact_dir, ignore_pending_changes)?;
        Ok(code)
    }

    /// Training environment from the manifest of the active conda prefix.
    pub fn resolve_training_env(&self, opts: &ArtifactOptions) -> ArtifactResult<TrainingCondaEnv> {
        let prefix = self.cfg.conda_prefix.as_deref().ok_or_else(|| {
            ArtifactError::ManifestNotFound {
                prefix: Default::default(),
            }
        })?;
        let manifest = conda::read_manifest(prefix)?;

        let pack_type = match PackType::classify(manifest.kind.as_deref()) {
            Ok(kind) => Some(kind),
            Err(err) => {
                err.tolerate(opts.ignore_deployment_error)?;
                None
            }
        };

        if pack_type == Some(PackType::Published)
            && self
                .cfg
                .home_dir
                .as_deref()
                .and_then(conda::publish_bucket)
                .is_none()
        {
            warn!(
                prefix = %prefix.display(),
                "cannot resolve the bucket name and namespace of the conda environment; set them \
                 while saving the model or run `odsc init -b <bucket> -n <namespace>` and prepare again"
            );
        }

        let pack_path = manifest.pack_path.filter(|p| !p.trim().is_empty());
        if pack_path.is_none() {
            if pack_type == Some(PackType::Published) {
                if opts.data_science_env {
                    return Err(ArtifactError::InvalidArgument(
                        "for published environments pass the object storage path of the \
                         environment in `inference_conda_env` and set `data_science_env = false`"
                            .to_string(),
                    ));
                }
                let err = ArtifactError::PublishDestinationUnknown {
                    prefix: prefix.to_path_buf(),
                    slug: prefix
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                };
                if opts.inference_conda_env.is_some() && !opts.ignore_deployment_error {
                    info!("{err}; the provided inference environment is used for deployment");
                } else {
                    err.tolerate(opts.ignore_deployment_error)?;
                }
            } else {
                warn!(
                    prefix = %prefix.display(),
                    "could not resolve the object storage destination of the environment; \
                     provide the pack details when saving the model"
                );
            }
        }

        Ok(TrainingCondaEnv {
            training_env_slug: Some(manifest.slug.unwrap_or_default()),
            training_env_type: pack_type,
            training_env_path: pack_path,
            training_python_version: manifest
                .python
                .or_else(|| self.cfg.python_version.clone()),
        })
    }

    /// Session identifiers of the provenance section. Unset markers are
    /// recorded with placeholders.
    pub fn environment_details(&self) -> ModelProvenance {
        let or_placeholder = |value: Option<&str>, placeholder: &str| {
            Some(value.unwrap_or(placeholder).to_string())
        };
        ModelProvenance {
            training_region: or_placeholder(self.cfg.region.as_deref(), NOT_FOUND),
            training_compartment_ocid: or_placeholder(self.cfg.default_compartment(), NOT_FOUND),
            training_resource_ocid: or_placeholder(self.cfg.training_resource_id(), NOT_FOUND),
            project_ocid: or_placeholder(self.cfg.default_project(), NOT_FOUND),
            tenancy_ocid: or_placeholder(self.cfg.tenancy_ocid.as_deref(), NOT_FOUND),
            user_ocid: or_placeholder(self.cfg.user_ocid.as_deref(), NOT_FOUND),
            vm_image_internal_id: or_placeholder(self.cfg.vm_image_id.as_deref(), VM_ID_NOT_SET),
            training_conda_env: None,
            training_code: None,
        }
    }

    /// Environment the model is served from.
    ///
    /// Without an override this is the published training environment. An
    /// `oci://` override is looked up in object storage for its python
    /// version, falling back to the requested version and then to the
    /// training version.
    pub fn resolve_deployment_env(
        &self,
        training: &TrainingCondaEnv,
        opts: &ArtifactOptions,
    ) -> ArtifactResult<InferenceCondaEnv> {
        let mut inference = InferenceCondaEnv::default();
        match opts.inference_conda_env.as_deref() {
            None => {
                if training.training_env_type.is_some() && training.training_env_path.is_some() {
                    info!(
                        "the inference environment defaults to the training environment; pass \
                         `inference_conda_env` to serve the model from another published or \
                         data science pack"
                    );
                    inference = InferenceCondaEnv {
                        inference_env_slug: training.training_env_slug.clone(),
                        inference_env_type: training.training_env_type,
                        inference_env_path: training.training_env_path.clone(),
                        inference_python_version: training.training_python_version.clone(),
                    };
                }
            }
            Some(uri) => {
                let slug = uri.trim_end_matches('/').rsplit('/').next().unwrap_or(uri);
                inference.inference_env_slug = Some(slug.to_string());
                inference.inference_env_type =
                    Some(PackType::from_data_science_flag(opts.data_science_env));
                if uri.starts_with("oci://") {
                    inference.inference_env_path = Some(uri.to_string());
                    inference.inference_python_version =
                        Some(self.inference_python_version(uri, training, opts)?);
                }
            }
        }

        if opts.inference_conda_env.is_none()
            && !opts.data_science_env
            && inference.inference_env_type == Some(PackType::Service)
            && training.training_env_path == inference.inference_env_path
        {
            ArtifactError::StaleInferenceEnv {
                slug: training.training_env_slug.clone().unwrap_or_default(),
            }
            .tolerate(opts.ignore_deployment_error)?;
        }

        if inference.inference_env_path.is_none() && opts.inference_conda_env.is_none() {
            ArtifactError::DeploymentIncomplete.tolerate(opts.ignore_deployment_error)?;
        }
        Ok(inference)
    }

    fn inference_python_version(
        &self,
        uri: &str,
        training: &TrainingCondaEnv,
        opts: &ArtifactOptions,
    ) -> ArtifactResult<String> {
        match self.pack_python_version(uri) {
            Ok(version) => Ok(version),
            Err(err) => {
                debug!(error = %err, uri, "pack metadata lookup failed");
                if let Some(version) = &opts.inference_python_version {
                    return Ok(version.clone());
                }
                if let Some(version) = &training.training_python_version {
                    warn!(
                        "could not read the python version from the conda pack; defaulting to \
                         the training python version {version}"
                    );
                    return Ok(version.clone());
                }
                Err(ArtifactError::PythonVersionUnknown)
            }
        }
    }

    fn pack_python_version(&self, uri: &str) -> ArtifactResult<String> {
        let storage = self
            .storage
            .ok_or_else(|| ArtifactError::remote("object storage", "no client configured"))?;
        let pack = CondaUri::parse(uri)?;
        let headers = storage.object_metadata(&pack.storage_uri())?;
        headers
            .get(PACK_MANIFEST_HEADER)
            .and_then(|h| conda::python_from_manifest_header(h))
            .ok_or_else(|| {
                ArtifactError::remote("object storage", "pack metadata has no python version")
            })
    }
}

fn assert_path_clean(repo: Option<&RepoState>, path: &Path, ignore: bool) -> ArtifactResult<()> {
    match repo {
        Some(repo) if !ignore && repo.is_path_dirty(path) => {
            Err(ArtifactError::UncommittedChanges {
                path: path.to_path_buf(),
            })
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::storage::StorageUri;
    use std::cell::Cell;
    use std::collections::{BTreeMap, HashMap};
    use std::path::PathBuf;

    struct NoRepo;

    impl VcsProbe for NoRepo {
        fn inspect(&self, start: &Path) -> ArtifactResult<RepoState> {
            Err(ArtifactError::NoRepository(start.to_path_buf()))
        }
    }

    struct FixedRepo(RepoState);

    impl VcsProbe for FixedRepo {
        fn inspect(&self, _start: &Path) -> ArtifactResult<RepoState> {
            Ok(self.0.clone())
        }
    }

    struct PackStore {
        headers: HashMap<String, String>,
        lookups: Cell<usize>,
    }

    impl ObjectStorage for PackStore {
        fn put(&self, _uri: &StorageUri, _body: &[u8]) -> ArtifactResult<()> {
            Ok(())
        }

        fn object_metadata(&self, _uri: &StorageUri) -> ArtifactResult<BTreeMap<String, String>> {
            self.lookups.set(self.lookups.get() + 1);
            if self.headers.is_empty() {
                return Err(ArtifactError::remote("object storage", "404"));
            }
            Ok(self.headers.clone().into_iter().collect())
        }
    }

    fn session(prefix: &Path) -> SessionCfg {
        SessionCfg {
            conda_prefix: Some(prefix.to_path_buf()),
            nb_session_ocid: Some("ocid1.nb".into()),
            python_version: Some("3.8.13".into()),
            ..Default::default()
        }
    }

    fn write_manifest(prefix: &Path, kind: &str, pack_path: Option<&str>) {
        let mut body = format!("manifest:\n  slug: myenv_v1_0\n  type: {kind}\n");
        if let Some(p) = pack_path {
            body.push_str(&format!("  pack_path: {p}\n"));
        }
        std::fs::write(prefix.join("myenv_v1_0_manifest.yaml"), body).unwrap();
    }

    #[test]
    fn artifact_outside_a_repository_gets_a_file_remote() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = SessionCfg::default();
        let resolver = ProvenanceResolver::new(&cfg, &NoRepo);
        let (repo, code) = resolver.training_code(dir.path()).unwrap();
        assert!(repo.is_none());
        let abs = fs::absolute(dir.path()).unwrap();
        assert_eq!(code.git_remote, Some(format!("file://{}", abs.display())));
        assert_eq!(code.artifact_directory, Some(abs.display().to_string()));
        assert_eq!(code.git_branch, None);
    }

    #[test]
    fn dirty_artifact_blocks_unless_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let root = fs::absolute(dir.path()).unwrap();
        let artifact = root.join("artifact");
        std::fs::create_dir(&artifact).unwrap();
        let probe = FixedRepo(RepoState {
            working_dir: root.clone(),
            untracked: vec![PathBuf::from("artifact/score.py")],
            ..Default::default()
        });
        let cfg = SessionCfg::default();
        let resolver = ProvenanceResolver::new(&cfg, &probe);
        match resolver.training_code_info(&artifact, None, false) {
            Err(ArtifactError::UncommittedChanges { path }) => assert_eq!(path, artifact),
            other => panic!("expected UncommittedChanges, got {other:?}"),
        }
        let code = resolver.training_code_info(&artifact, None, true).unwrap();
        assert_eq!(code.git_remote, Some(format!("file://{}", root.display())));
    }

    #[test]
    fn unknown_pack_type_is_fatal_unless_ignored() {
        let prefix = tempfile::tempdir().unwrap();
        write_manifest(prefix.path(), "custom", Some("oci://b@ns/p/myenv_v1_0"));
        let cfg = session(prefix.path());
        let resolver = ProvenanceResolver::new(&cfg, &NoRepo);

        let err = resolver
            .resolve_training_env(&ArtifactOptions::default())
            .unwrap_err();
        assert!(matches!(err, ArtifactError::UnknownPackType(kind) if kind == "custom"));

        let opts = ArtifactOptions {
            ignore_deployment_error: true,
            ..Default::default()
        };
        let env = resolver.resolve_training_env(&opts).unwrap();
        assert_eq!(env.training_env_type, None);
        assert_eq!(env.training_python_version.as_deref(), Some("3.8.13"));
    }

    #[test]
    fn unpublished_custom_pack_needs_an_inference_override() {
        let prefix = tempfile::tempdir().unwrap();
        write_manifest(prefix.path(), "published", None);
        let cfg = session(prefix.path());
        let resolver = ProvenanceResolver::new(&cfg, &NoRepo);

        let err = resolver
            .resolve_training_env(&ArtifactOptions::default())
            .unwrap_err();
        assert!(matches!(err, ArtifactError::PublishDestinationUnknown { .. }));

        let opts = ArtifactOptions {
            inference_conda_env: Some("oci://b@ns/p/other".into()),
            ..Default::default()
        };
        let env = resolver.resolve_training_env(&opts).unwrap();
        assert_eq!(env.training_env_type, Some(PackType::Published));
        assert_eq!(env.training_env_path, None);
    }

    #[test]
    fn deployment_defaults_to_the_published_training_env() {
        let cfg = SessionCfg::default();
        let resolver = ProvenanceResolver::new(&cfg, &NoRepo);
        let training = TrainingCondaEnv {
            training_env_slug: Some("myenv_v1_0".into()),
            training_env_type: Some(PackType::Published),
            training_env_path: Some("oci://b@ns/p/myenv_v1_0".into()),
            training_python_version: Some("3.8".into()),
        };
        let inference = resolver
            .resolve_deployment_env(&training, &ArtifactOptions::default())
            .unwrap();
        assert_eq!(inference.inference_env_path, training.training_env_path);
        assert_eq!(inference.inference_python_version.as_deref(), Some("3.8"));
    }

    #[test]
    fn implicit_service_pack_is_flagged_as_stale() {
        let cfg = SessionCfg::default();
        let resolver = ProvenanceResolver::new(&cfg, &NoRepo);
        let training = TrainingCondaEnv {
            training_env_slug: Some("gml_p38_cpu_v1".into()),
            training_env_type: Some(PackType::Service),
            training_env_path: Some("oci://service@ns/gml_p38_cpu_v1".into()),
            training_python_version: Some("3.8".into()),
        };
        let err = resolver
            .resolve_deployment_env(&training, &ArtifactOptions::default())
            .unwrap_err();
        assert!(matches!(err, ArtifactError::StaleInferenceEnv { .. }));

        let opts = ArtifactOptions {
            data_science_env: true,
            ..Default::default()
        };
        assert!(resolver.resolve_deployment_env(&training, &opts).is_ok());
    }

    #[test]
    fn override_python_version_comes_from_pack_metadata() {
        let store = PackStore {
            headers: HashMap::from([(
                PACK_MANIFEST_HEADER.to_string(),
                r#"{"python": "3.9"}"#.to_string(),
            )]),
            lookups: Cell::new(0),
        };
        let cfg = SessionCfg::default();
        let resolver = ProvenanceResolver::new(&cfg, &NoRepo).with_storage(&store);
        let opts = ArtifactOptions {
            inference_conda_env: Some("oci://packs@ns/envs/myenv_v2".into()),
            inference_python_version: Some("3.7".into()),
            ..Default::default()
        };
        let inference = resolver
            .resolve_deployment_env(&TrainingCondaEnv::default(), &opts)
            .unwrap();
        assert_eq!(store.lookups.get(), 1);
        assert_eq!(inference.inference_python_version.as_deref(), Some("3.9"));
        assert_eq!(inference.inference_env_slug.as_deref(), Some("myenv_v2"));
    }

    #[test]
    fn failed_lookup_falls_back_then_fails() {
        let store = PackStore {
            headers: HashMap::new(),
            lookups: Cell::new(0),
        };
        let cfg = SessionCfg::default();
        let resolver = ProvenanceResolver::new(&cfg, &NoRepo).with_storage(&store);
        let mut opts = ArtifactOptions {
            inference_conda_env: Some("oci://packs@ns/envs/myenv_v2".into()),
            inference_python_version: Some("3.7".into()),
            ..Default::default()
        };
        let training = TrainingCondaEnv {
            training_python_version: Some("3.8".into()),
            ..Default::default()
        };

        let inference = resolver.resolve_deployment_env(&training, &opts).unwrap();
        assert_eq!(inference.inference_python_version.as_deref(), Some("3.7"));

        opts.inference_python_version = None;
        let inference = resolver.resolve_deployment_env(&training, &opts).unwrap();
        assert_eq!(inference.inference_python_version.as_deref(), Some("3.8"));

        let err = resolver
            .resolve_deployment_env(&TrainingCondaEnv::default(), &opts)
            .unwrap_err();
        assert!(matches!(err, ArtifactError::PythonVersionUnknown));
    }

    #[test]
    fn missing_inference_path_is_incomplete() {
        let cfg = SessionCfg::default();
        let resolver = ProvenanceResolver::new(&cfg, &NoRepo);
        let err = resolver
            .resolve_deployment_env(&TrainingCondaEnv::default(), &ArtifactOptions::default())
            .unwrap_err();
        assert!(matches!(err, ArtifactError::DeploymentIncomplete));
        let opts = ArtifactOptions {
            ignore_deployment_error: true,
            ..Default::default()
        };
        let inference = resolver
            .resolve_deployment_env(&TrainingCondaEnv::default(), &opts)
            .unwrap();
        assert_eq!(inference.inference_env_path, None);
    }

    #[test]
    fn unset_session_markers_use_placeholders() {
        let cfg = SessionCfg {
            region: Some("us-ashburn-1".into()),
            job_run_ocid: Some("ocid1.jobrun".into()),
            ..Default::default()
        };
        let details = ProvenanceResolver::new(&cfg, &NoRepo).environment_details();
        assert_eq!(details.training_region.as_deref(), Some("us-ashburn-1"));
        assert_eq!(details.training_resource_ocid.as_deref(), Some("ocid1.jobrun"));
        assert_eq!(details.project_ocid.as_deref(), Some(NOT_FOUND));
        assert_eq!(details.vm_image_internal_id.as_deref(), Some(VM_ID_NOT_SET));
    }
}
