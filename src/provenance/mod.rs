//! Provenance of a model: training code, training environment and the
//! environment it is deployed with.

pub mod conda;
pub mod domain;
pub mod git;
pub mod service;

pub use conda::{CondaUri, Manifest};
pub use domain::{
    InferenceCondaEnv, ModelProvenance, PackType, ProvenanceRecord, TrainingCodeInfo,
    TrainingCondaEnv,
};
pub use git::{GitCli, RepoState, VcsProbe};
pub use service::ProvenanceResolver;
