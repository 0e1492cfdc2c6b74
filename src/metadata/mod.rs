//! Custom and taxonomy metadata attached to a model artifact.

pub mod domain;
pub mod extract;
pub mod store;

pub use domain::{
    Category, CustomItem, CustomKey, Framework, TaxonomyItem, TaxonomyKey, UseCaseType,
    METADATA_SIZE_LIMIT,
};
pub use extract::{ExtractedInfo, ModelInfoExtractor};
pub use store::{CustomMetadata, TaxonomyMetadata, HYPERPARAMETERS_FILE_NAME};
