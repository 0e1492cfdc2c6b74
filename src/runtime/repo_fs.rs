//! Filesystem store for runtime descriptors.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::common::error::{ArtifactError, ArtifactResult};
use crate::common::fs as artifact_fs;

use super::domain::{
    FormatGeneration, LoadedRuntime, RuntimeDescriptor, RuntimeStore, LEGACY_RUNTIME_FILE_NAME,
    RUNTIME_FILE_NAME,
};

#[derive(Deserialize)]
struct LegacyRuntime {
    #[serde(rename = "conda-env", default)]
    conda_env: Option<String>,
}

/// Reads and writes the descriptor files of one artifact directory.
pub struct FsRuntimeStore {
    dir: PathBuf,
}

impl FsRuntimeStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(RUNTIME_FILE_NAME)
    }

    fn legacy_path(&self) -> PathBuf {
        self.dir.join(LEGACY_RUNTIME_FILE_NAME)
    }

    /// Parsed current descriptor, if the directory holds one.
    pub fn read_current(&self) -> ArtifactResult<Option<RuntimeDescriptor>> {
        let path = self.path();
        if !path.is_file() {
            return Ok(None);
        }
        read_to_string(&path)
            .and_then(|raw| RuntimeDescriptor::from_yaml(&raw))
            .map(Some)
    }
}

fn read_to_string(path: &Path) -> ArtifactResult<String> {
    fs::read_to_string(path).map_err(|e| ArtifactError::io(path, e))
}

impl RuntimeStore for FsRuntimeStore {
    fn generation(&self) -> FormatGeneration {
        if self.path().is_file() {
            FormatGeneration::Current
        } else if self.legacy_path().is_file() {
            FormatGeneration::LegacyV1
        } else {
            FormatGeneration::Absent
        }
    }

    fn load(&self) -> ArtifactResult<LoadedRuntime> {
        let generation = self.generation();
        let loaded = match generation {
            FormatGeneration::Current => {
                let descriptor = self.read_current()?.unwrap_or_default();
                LoadedRuntime {
                    generation,
                    version: descriptor.model_artifact_version.clone(),
                    vm_id: descriptor.vm_image_id().map(str::to_string),
                    conda_env: descriptor.training_env_slug().map(str::to_string),
                    descriptor: Some(descriptor),
                }
            }
            FormatGeneration::LegacyV1 => {
                let raw = read_to_string(&self.legacy_path())?;
                let legacy: LegacyRuntime = serde_yaml::from_str(&raw)?;
                LoadedRuntime {
                    generation,
                    version: "1.0".to_string(),
                    vm_id: None,
                    conda_env: legacy.conda_env,
                    descriptor: None,
                }
            }
            FormatGeneration::Absent => LoadedRuntime {
                generation,
                version: "0.0".to_string(),
                vm_id: Some("UNKNOWN".to_string()),
                conda_env: Some("base".to_string()),
                descriptor: None,
            },
        };
        debug!(dir = %self.dir.display(), version = %loaded.version, "runtime descriptor loaded");
        Ok(loaded)
    }

    fn save(&self, descriptor: &RuntimeDescriptor) -> ArtifactResult<()> {
        let body = descriptor.to_yaml()?;
        artifact_fs::atomic_write(&self.path(), body.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provenance::{InferenceCondaEnv, PackType};
    use crate::runtime::domain::{ModelDeployment, RUNTIME_HEADER};

    #[test]
    fn empty_directory_loads_the_synthetic_v0_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = FsRuntimeStore::new(dir.path()).load().unwrap();
        assert_eq!(loaded.generation, FormatGeneration::Absent);
        assert_eq!(loaded.version, "0.0");
        assert_eq!(loaded.vm_id.as_deref(), Some("UNKNOWN"));
        assert_eq!(loaded.conda_env.as_deref(), Some("base"));
        assert!(loaded.is_legacy());
    }

    #[test]
    fn legacy_file_reads_the_flat_conda_env() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(LEGACY_RUNTIME_FILE_NAME), "conda-env: mlcpuv1\n").unwrap();
        let loaded = FsRuntimeStore::new(dir.path()).load().unwrap();
        assert_eq!(loaded.generation, FormatGeneration::LegacyV1);
        assert_eq!(loaded.version, "1.0");
        assert_eq!(loaded.vm_id, None);
        assert_eq!(loaded.conda_env.as_deref(), Some("mlcpuv1"));
    }

    #[test]
    fn current_file_wins_over_legacy_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(LEGACY_RUNTIME_FILE_NAME), "conda-env: old\n").unwrap();
        let store = FsRuntimeStore::new(dir.path());
        let descriptor = RuntimeDescriptor {
            model_deployment: Some(ModelDeployment {
                inference_conda_env: Some(InferenceCondaEnv {
                    inference_env_type: Some(PackType::Published),
                    inference_env_path: Some("oci://b@ns/p/env".into()),
                    ..Default::default()
                }),
            }),
            ..Default::default()
        };
        store.save(&descriptor).unwrap();

        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(raw.starts_with(RUNTIME_HEADER));
        let loaded = store.load().unwrap();
        assert_eq!(loaded.generation, FormatGeneration::Current);
        assert_eq!(loaded.version, "3.0");
        assert!(!loaded.is_legacy());
        assert_eq!(loaded.descriptor, Some(descriptor));
    }
}
