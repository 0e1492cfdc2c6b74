//! Runtime descriptor pinning the training and inference environments.

pub mod builder;
pub mod domain;
pub mod repo_fs;

pub use builder::{check_deployment, empty_template, merge_training_code, RuntimeBuilder};
pub use domain::{
    is_legacy_version, FormatGeneration, LoadedRuntime, ModelDeployment, RuntimeDescriptor,
    RuntimeStore, LEGACY_RUNTIME_FILE_NAME, MODEL_ARTIFACT_VERSION, RUNTIME_FILE_NAME,
};
pub use repo_fs::FsRuntimeStore;
