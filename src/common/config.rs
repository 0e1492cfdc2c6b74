//! Session configuration and per-bundle options.
//!
//! The training session is described by a handful of environment markers. They
//! are read once into [`SessionCfg`]; everything downstream consumes the struct
//! so defaulting stays a pure function of its fields.

use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;

/// Snapshot of the training session the artifact is prepared in.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionCfg {
    pub conda_prefix: Option<PathBuf>,
    pub nb_session_ocid: Option<String>,
    pub job_run_ocid: Option<String>,
    pub region: Option<String>,
    pub compartment_ocid: Option<String>,
    pub project_ocid: Option<String>,
    pub tenancy_ocid: Option<String>,
    pub user_ocid: Option<String>,
    pub vm_image_id: Option<String>,
    pub home_dir: Option<PathBuf>,
    pub python_version: Option<String>,
}

impl SessionCfg {
    /// Create a configuration snapshot from the process environment.
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a snapshot from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            conda_prefix: get("CONDA_PREFIX").map(PathBuf::from),
            nb_session_ocid: get("NB_SESSION_OCID"),
            job_run_ocid: get("JOB_RUN_OCID"),
            region: get("NB_REGION"),
            compartment_ocid: get("NB_SESSION_COMPARTMENT_OCID"),
            project_ocid: get("PROJECT_OCID"),
            tenancy_ocid: get("TENANCY_OCID"),
            user_ocid: get("USER_OCID"),
            vm_image_id: get("VM_ID"),
            home_dir: get("HOME").map(PathBuf::from),
            python_version: get("PYTHON_VERSION"),
        }
    }

    /// True when both the conda prefix and the session id markers are set.
    pub fn in_training_session(&self) -> bool {
        self.conda_prefix.is_some() && self.nb_session_ocid.is_some()
    }

    /// Job run id takes precedence over the notebook session id.
    pub fn training_resource_id(&self) -> Option<&str> {
        self.job_run_ocid
            .as_deref()
            .or(self.nb_session_ocid.as_deref())
    }

    pub fn default_project(&self) -> Option<&str> {
        self.project_ocid.as_deref()
    }

    pub fn default_compartment(&self) -> Option<&str> {
        self.compartment_ocid.as_deref()
    }
}

/// How `install_requirements` treats installed versions that conflict with the artifact.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum ConflictStrategy {
    /// Keep the installed version and report the conflict.
    #[default]
    Ignore,
    /// Upgrade to the version the artifact requires.
    Update,
}

/// Construction switches for a model artifact bundle.
#[derive(Clone, Debug)]
pub struct ArtifactOptions {
    pub create: bool,
    pub reload: bool,
    pub install_libs: bool,
    pub conflict_strategy: ConflictStrategy,
    pub model_file_name: String,
    pub inference_conda_env: Option<String>,
    pub inference_python_version: Option<String>,
    pub data_science_env: bool,
    pub ignore_deployment_error: bool,
}

impl Default for ArtifactOptions {
    fn default() -> Self {
        Self {
            create: false,
            reload: true,
            install_libs: false,
            conflict_strategy: ConflictStrategy::Ignore,
            model_file_name: "model.onnx".to_string(),
            inference_conda_env: None,
            inference_python_version: None,
            data_science_env: false,
            ignore_deployment_error: false,
        }
    }
}

/// Per-save switches for publishing a bundle to the catalog.
#[derive(Clone, Debug)]
pub struct SaveOptions {
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub project_id: Option<String>,
    pub compartment_id: Option<String>,
    pub training_script_path: Option<PathBuf>,
    pub ignore_pending_changes: bool,
    pub training_id: Option<String>,
    /// Connection timeout in seconds handed to the catalog collaborator.
    pub timeout: Option<u64>,
    pub ignore_introspection: bool,
    pub freeform_tags: BTreeMap<String, String>,
    pub defined_tags: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            display_name: None,
            description: None,
            project_id: None,
            compartment_id: None,
            training_script_path: None,
            ignore_pending_changes: false,
            training_id: None,
            timeout: None,
            ignore_introspection: true,
            freeform_tags: BTreeMap::new(),
            defined_tags: BTreeMap::new(),
        }
    }
}
