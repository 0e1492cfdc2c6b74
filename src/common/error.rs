//! Error handling primitives shared across the core.
//!
//! Every fallible operation returns [`ArtifactResult`]. Each variant maps to a
//! stable [`ErrorCode`] so embedders can classify failures without matching on
//! message text.

use std::io;
use std::path::PathBuf;

use thiserror::Error;
use tracing::warn;

/// Stable error codes exposed to embedding applications.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorCode {
    /// Success code used as a sentinel.
    Ok = 0,
    /// Artifact or training script has uncommitted changes.
    UncommittedChanges = 1,
    /// Metadata or schema exceeds the catalog size budget.
    SizeLimit = 2,
    /// Tabular sample has more columns than allowed.
    DataTooWide = 3,
    /// A required identifier could not be resolved.
    MissingIdentifier = 4,
    /// Introspection rules failed.
    IntrospectionNotPassed = 5,
    /// Input failed validation (paths, keys, values, input kinds).
    InvalidInput = 6,
    /// Training or inference environment could not be resolved.
    Environment = 7,
    /// Remote collaborator failed.
    Remote = 8,
    /// Catch-all for IO and encoding failures.
    Internal = 9,
}

/// Canonical error type for the core.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error(
        "file(s) at {path} are either dirty or untracked; commit the changes and save again, \
         or pass `ignore_pending_changes = true`"
    )]
    UncommittedChanges { path: PathBuf },

    #[error(
        "the model metadata is {size} bytes which exceeds the {limit} byte limit; \
         shorten or remove large custom entries"
    )]
    MetadataTooLarge { size: usize, limit: usize },

    #[error(
        "the data has {columns} columns and the maximum allowed is {max}; \
         raise `max_columns` to generate the schema"
    )]
    DataTooWide { columns: usize, max: usize },

    #[error("the schema is {size} bytes which exceeds the {limit} byte limit")]
    SchemaTooLarge { size: usize, limit: usize },

    #[error("the `{0}` must be provided, either explicitly or through the session configuration")]
    MissingIdentifier(&'static str),

    #[error(
        "model introspection not passed ({failed} rule(s) failed); fix the reported problems \
         or save with `ignore_introspection = true`"
    )]
    IntrospectionNotPassed { failed: usize },

    #[error("`{0}` is not valid; it must have the pattern 'oci://bucket_name@namespace/key'")]
    InvalidStoragePath(String),

    #[error("could not locate a `*_manifest.yaml` file in the environment {prefix}")]
    ManifestNotFound { prefix: PathBuf },

    #[error("manifest type unknown: {0}")]
    UnknownPackType(String),

    #[error(
        "could not resolve the object storage path of the environment {prefix}; publish it with \
         `odsc conda publish -s {slug}` or pass `inference_conda_env`"
    )]
    PublishDestinationUnknown { prefix: PathBuf, slug: String },

    #[error("the python version is not specified; pass `inference_python_version` when preparing the model")]
    PythonVersionUnknown,

    #[error("no version control repository encloses {0}")]
    NoRepository(PathBuf),

    #[error("unsupported verify input: {0}; expected JSON text, a JSON object or a byte stream")]
    InvalidInputType(String),

    #[error("metadata key `{0}` already exists; pass `replace = true` to overwrite it")]
    DuplicateKey(String),

    #[error("`{0}` is not a supported metadata key")]
    InvalidMetadataKey(String),

    #[error("invalid value for metadata `{key}`: {reason}")]
    InvalidMetadataValue { key: String, reason: String },

    #[error("score module: {0}")]
    ScoreModule(String),

    #[error(
        "could not find a requirements file in {0}; install the libraries manually and \
         construct the artifact with `install_libs = false`"
    )]
    RequirementsNotFound(PathBuf),

    #[error(
        "missing the conda environment to use for inference; pass the oci uri of a pack in \
         `inference_conda_env` or publish the training environment and prepare again"
    )]
    DeploymentIncomplete,

    #[error(
        "the inference environment {slug} may have changed during development; publish the \
         current environment or set `data_science_env = true`"
    )]
    StaleInferenceEnv { slug: String },

    #[error("{service} call failed: {message}")]
    Remote {
        service: &'static str,
        message: String,
        timed_out: bool,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias used throughout the crate.
pub type ArtifactResult<T> = Result<T, ArtifactError>;

impl ArtifactError {
    /// Attach the offending path to an IO error.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Remote failure helper.
    pub fn remote(service: &'static str, message: impl Into<String>) -> Self {
        Self::Remote {
            service,
            message: message.into(),
            timed_out: false,
        }
    }

    /// Remote timeout helper.
    pub fn timeout(service: &'static str, message: impl Into<String>) -> Self {
        Self::Remote {
            service,
            message: message.into(),
            timed_out: true,
        }
    }

    /// Machine parsable code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UncommittedChanges { .. } => ErrorCode::UncommittedChanges,
            Self::MetadataTooLarge { .. } | Self::SchemaTooLarge { .. } => ErrorCode::SizeLimit,
            Self::DataTooWide { .. } => ErrorCode::DataTooWide,
            Self::MissingIdentifier(_) => ErrorCode::MissingIdentifier,
            Self::IntrospectionNotPassed { .. } => ErrorCode::IntrospectionNotPassed,
            Self::InvalidStoragePath(_)
            | Self::InvalidInputType(_)
            | Self::DuplicateKey(_)
            | Self::InvalidMetadataKey(_)
            | Self::InvalidMetadataValue { .. }
            | Self::InvalidArgument(_) => ErrorCode::InvalidInput,
            Self::ManifestNotFound { .. }
            | Self::UnknownPackType(_)
            | Self::PublishDestinationUnknown { .. }
            | Self::PythonVersionUnknown
            | Self::NoRepository(_)
            | Self::DeploymentIncomplete
            | Self::StaleInferenceEnv { .. } => ErrorCode::Environment,
            Self::Remote { .. } => ErrorCode::Remote,
            Self::ScoreModule(_)
            | Self::RequirementsNotFound(_)
            | Self::Io { .. }
            | Self::Yaml(_)
            | Self::Json(_) => ErrorCode::Internal,
        }
    }

    /// Environment-resolution ambiguities that an `ignore_deployment_error`
    /// bundle reports as warnings instead of failing.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::UnknownPackType(_)
                | Self::PublishDestinationUnknown { .. }
                | Self::DeploymentIncomplete
                | Self::StaleInferenceEnv { .. }
        )
    }

    /// Log recoverable errors as warnings when `ignore` is set; return every
    /// other error unchanged.
    pub fn tolerate(self, ignore: bool) -> ArtifactResult<()> {
        if ignore && self.is_recoverable() {
            warn!(code = ?self.code(), "{self}");
            Ok(())
        } else {
            Err(self)
        }
    }

    /// Whether a remote call gave up because of a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Remote { timed_out: true, .. })
    }
}
