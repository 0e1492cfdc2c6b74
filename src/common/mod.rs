//! Shared utilities that glue the different areas together.
pub mod config;
pub mod error;
pub mod fs;
pub mod log;
pub mod progress;
pub mod storage;

pub use config::{ArtifactOptions, ConflictStrategy, SaveOptions, SessionCfg};
pub use error::{ArtifactError, ArtifactResult, ErrorCode};
pub use progress::Progress;
pub use storage::{ObjectStorage, StorageUri};
