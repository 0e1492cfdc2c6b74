//! Validation and publishing of artifact bundles to the model catalog.

pub mod domain;
pub mod gate;

pub use domain::{
    IntrospectionReport, IntrospectionStatus, Introspector, ModelCatalog, RuleResult, SaveOutcome,
    UploadRequest,
};
pub use gate::{introspect, validate_metadata, validate_schemas, BundleParts, PublishGate};
