//! Lifecycle of model artifacts: prepare a bundle directory, describe it with
//! metadata, schemas and a runtime descriptor, and publish it to a catalog.
pub mod artifact;
pub mod common;
pub mod metadata;
pub mod provenance;
pub mod publish;
pub mod runtime;
pub mod schema;

pub use artifact::{Collaborators, ModelArtifact};
pub use common::{ArtifactError, ArtifactOptions, ArtifactResult, ErrorCode, SaveOptions, SessionCfg};
pub use publish::{PublishGate, SaveOutcome};
