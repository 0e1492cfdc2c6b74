//! Runtime descriptor document and its persistence contract.

use serde::{Deserialize, Deserializer, Serialize};

use crate::common::error::ArtifactResult;
use crate::provenance::{InferenceCondaEnv, ModelProvenance};

/// Format revision written by this crate.
pub const MODEL_ARTIFACT_VERSION: &str = "3.0";
/// Descriptor file of the current format.
pub const RUNTIME_FILE_NAME: &str = "runtime.yaml";
/// Descriptor file of the legacy 1.0 format.
pub const LEGACY_RUNTIME_FILE_NAME: &str = "ds-runtime.yaml";
/// First line of every descriptor written.
pub const RUNTIME_HEADER: &str = "# Model runtime environment\n";

/// `MODEL_DEPLOYMENT` section.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ModelDeployment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inference_conda_env: Option<InferenceCondaEnv>,
}

/// The versioned runtime descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RuntimeDescriptor {
    #[serde(deserialize_with = "version_string")]
    pub model_artifact_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_provenance: Option<ModelProvenance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_deployment: Option<ModelDeployment>,
}

impl Default for RuntimeDescriptor {
    fn default() -> Self {
        Self {
            model_artifact_version: MODEL_ARTIFACT_VERSION.to_string(),
            model_provenance: None,
            model_deployment: None,
        }
    }
}

impl RuntimeDescriptor {
    pub fn inference_env(&self) -> Option<&InferenceCondaEnv> {
        self.model_deployment
            .as_ref()
            .and_then(|d| d.inference_conda_env.as_ref())
    }

    pub fn inference_env_path(&self) -> Option<&str> {
        self.inference_env()
            .and_then(|env| env.inference_env_path.as_deref())
            .filter(|p| !p.trim().is_empty())
    }

    /// A descriptor is deployable once it names an inference environment path.
    pub fn is_deployment_complete(&self) -> bool {
        self.inference_env_path().is_some()
    }

    pub fn training_env_slug(&self) -> Option<&str> {
        self.model_provenance
            .as_ref()
            .and_then(|p| p.training_conda_env.as_ref())
            .and_then(|env| env.training_env_slug.as_deref())
    }

    pub fn vm_image_id(&self) -> Option<&str> {
        self.model_provenance
            .as_ref()
            .and_then(|p| p.vm_image_internal_id.as_deref())
    }

    /// Serialize with the header comment.
    pub fn to_yaml(&self) -> ArtifactResult<String> {
        let body = serde_yaml::to_string(self)?;
        Ok(format!("{RUNTIME_HEADER}{body}"))
    }

    pub fn from_yaml(raw: &str) -> ArtifactResult<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }
}

/// Hand edited descriptors often carry an unquoted `3.0`.
fn version_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_yaml::Value::deserialize(deserializer)? {
        serde_yaml::Value::String(s) => Ok(s),
        serde_yaml::Value::Number(n) => {
            let text = n.to_string();
            Ok(if text.contains('.') { text } else { format!("{text}.0") })
        }
        other => Err(serde::de::Error::custom(format!(
            "MODEL_ARTIFACT_VERSION must be a string, got {other:?}"
        ))),
    }
}

/// Descriptor generations a directory can hold.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FormatGeneration {
    /// `runtime.yaml`, version 3.0 and later.
    Current,
    /// `ds-runtime.yaml` with a flat `conda-env` key.
    LegacyV1,
    /// No descriptor at all.
    Absent,
}

/// What a reload learns from the descriptor on disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadedRuntime {
    pub generation: FormatGeneration,
    pub version: String,
    pub vm_id: Option<String>,
    pub conda_env: Option<String>,
    /// Parsed document for the current generation.
    pub descriptor: Option<RuntimeDescriptor>,
}

impl LoadedRuntime {
    pub fn is_legacy(&self) -> bool {
        is_legacy_version(&self.version)
    }
}

/// Major version is 0 or 1.
pub fn is_legacy_version(version: &str) -> bool {
    matches!(version.split('.').next(), Some("0") | Some("1"))
}

/// Persistence of the runtime descriptor of one artifact directory.
pub trait RuntimeStore {
    fn generation(&self) -> FormatGeneration;
    fn load(&self) -> ArtifactResult<LoadedRuntime>;
    fn save(&self, descriptor: &RuntimeDescriptor) -> ArtifactResult<()>;
}
