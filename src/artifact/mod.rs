//! Artifact directory management: files, data snapshots, libraries, the
//! score entry point and the bundle that ties them together.

pub mod files;
pub mod requirements;
pub mod score;
pub mod service;
pub mod snapshot;

pub use files::{list_files, purge_cache, IgnorePattern, MODEL_IGNORE_FILE_NAME};
pub use requirements::{
    install_requirements, InstallReport, PackageIndex, RequirementStatus, VersionConflicts,
};
pub use score::{ModelHandle, ScoreLoader, ScoreModule, VerifyInput, VerifyOutput};
pub use service::{detect_serialization_format, Collaborators, ModelArtifact, CLIENT_LIBRARY};
pub use snapshot::{DataKind, SnapshotSource};
