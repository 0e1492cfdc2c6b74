//! Provenance sections of the runtime descriptor and the catalog provenance record.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::common::error::{ArtifactError, ArtifactResult};

/// Placeholder recorded for session markers that are not set.
pub const NOT_FOUND: &str = "NOT_FOUND";
/// Placeholder recorded when the VM image id is not set.
pub const VM_ID_NOT_SET: &str = "VMIDNOTSET";

/// Kind of conda pack an environment was created from.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum PackType {
    /// Pack curated by the platform.
    #[serde(rename = "data_science")]
    Service,
    /// Pack published by the user to their own bucket.
    #[serde(rename = "published")]
    Published,
}

impl PackType {
    pub fn as_str(self) -> &'static str {
        match self {
            PackType::Service => "data_science",
            PackType::Published => "published",
        }
    }

    /// Classify a manifest `type` value. Matching ignores case.
    pub fn classify(raw: Option<&str>) -> ArtifactResult<Self> {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("data_science") => Ok(PackType::Service),
            Some("published") => Ok(PackType::Published),
            other => Err(ArtifactError::UnknownPackType(
                other.unwrap_or("None").to_string(),
            )),
        }
    }

    /// Pack type implied by the `data_science_env` switch.
    pub fn from_data_science_flag(data_science_env: bool) -> Self {
        if data_science_env {
            PackType::Service
        } else {
            PackType::Published
        }
    }
}

impl fmt::Display for PackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Version control state of the training code.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct TrainingCodeInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_remote: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub training_script: Option<String>,
}

/// Conda environment the model was trained in.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct TrainingCondaEnv {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub training_env_slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub training_env_type: Option<PackType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub training_env_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub training_python_version: Option<String>,
}

/// Conda environment the model is served from.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct InferenceCondaEnv {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inference_env_slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inference_env_type: Option<PackType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inference_env_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inference_python_version: Option<String>,
}

/// `MODEL_PROVENANCE` section of the runtime descriptor.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ModelProvenance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub training_region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub training_compartment_ocid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub training_resource_ocid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_ocid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenancy_ocid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_ocid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_image_internal_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub training_conda_env: Option<TrainingCondaEnv>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub training_code: Option<TrainingCodeInfo>,
}

/// Provenance attached to the catalog entry when a bundle is published.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub repository_url: Option<String>,
    pub git_branch: Option<String>,
    pub git_commit: Option<String>,
    pub script_dir: Option<String>,
    pub training_script: Option<String>,
    pub training_id: Option<String>,
}

impl ProvenanceRecord {
    pub fn new(code: &TrainingCodeInfo, training_id: Option<String>) -> Self {
        Self {
            repository_url: code.git_remote.clone(),
            git_branch: code.git_branch.clone(),
            git_commit: code.git_commit.clone(),
            script_dir: code.artifact_directory.clone(),
            training_script: code.training_script.clone(),
            training_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_types_classify_case_insensitively() {
        assert_eq!(PackType::classify(Some("Published")).unwrap(), PackType::Published);
        assert_eq!(PackType::classify(Some("data_science")).unwrap(), PackType::Service);
        match PackType::classify(Some("custom")) {
            Err(ArtifactError::UnknownPackType(kind)) => assert_eq!(kind, "custom"),
            other => panic!("expected UnknownPackType, got {other:?}"),
        }
        assert!(PackType::classify(None).unwrap_err().is_recoverable());
    }

    #[test]
    fn unset_fields_are_omitted_from_yaml() {
        let env = TrainingCondaEnv {
            training_env_slug: Some("gml_p38_cpu_v1".into()),
            training_env_type: Some(PackType::Service),
            ..Default::default()
        };
        let yaml = serde_yaml::to_string(&env).unwrap();
        assert!(yaml.contains("TRAINING_ENV_SLUG: gml_p38_cpu_v1"));
        assert!(yaml.contains("TRAINING_ENV_TYPE: data_science"));
        assert!(!yaml.contains("TRAINING_ENV_PATH"));
    }

    #[test]
    fn record_mirrors_training_code() {
        let code = TrainingCodeInfo {
            git_remote: Some("git@example.com:team/model.git".into()),
            git_branch: Some("main".into()),
            artifact_directory: Some("/work/artifact".into()),
            ..Default::default()
        };
        let record = ProvenanceRecord::new(&code, Some("ocid1.job".into()));
        assert_eq!(record.repository_url.as_deref(), Some("git@example.com:team/model.git"));
        assert_eq!(record.script_dir.as_deref(), Some("/work/artifact"));
        assert_eq!(record.git_commit, None);
        assert_eq!(record.training_id.as_deref(), Some("ocid1.job"));
    }
}
