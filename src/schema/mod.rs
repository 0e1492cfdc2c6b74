//! Input and output schemas derived from data samples.

pub mod domain;
pub mod infer;
pub mod sample;

pub use domain::{Attribute, Domain, Schema, INPUT_SCHEMA_FILE_NAME, OUTPUT_SCHEMA_FILE_NAME};
pub use infer::{infer, DEFAULT_MAX_COLUMNS};
pub use sample::{SampleColumn, TabularSample};
