//! Closed key sets and entry types for custom and taxonomy metadata.
//!
//! Keys are enumerations rather than free-form strings: an unknown key is
//! rejected when it is parsed, never accepted silently and caught at save time.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::common::error::ArtifactError;

/// Combined byte budget shared by custom and taxonomy metadata, and the
/// per-document budget for schemas and the hyperparameters entry.
pub const METADATA_SIZE_LIMIT: usize = 32_000;

/// Maximum length of a metadata description.
pub const METADATA_DESCRIPTION_LIMIT: usize = 255;

/// Declares a closed string enumeration with parsing, display and serde support.
macro_rules! closed_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $err:expr, { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ArtifactError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $name::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str() == s)
                    .ok_or_else(|| $err(s))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

fn invalid_key(s: &str) -> ArtifactError {
    ArtifactError::InvalidMetadataKey(s.to_string())
}

fn invalid_value(key: &'static str) -> impl Fn(&str) -> ArtifactError {
    move |s: &str| ArtifactError::InvalidMetadataValue {
        key: key.to_string(),
        reason: format!("`{s}` is not one of the supported values"),
    }
}

closed_enum!(
    /// Keys accepted in custom metadata.
    CustomKey, invalid_key, {
        SlugName => "SlugName",
        CondaEnvironment => "CondaEnvironment",
        CondaEnvironmentPath => "CondaEnvironmentPath",
        EnvironmentType => "EnvironmentType",
        ModelArtifacts => "ModelArtifacts",
        TrainingDataset => "TrainingDataset",
        ValidationDataset => "ValidationDataset",
        ModelSerializationFormat => "ModelSerializationFormat",
        TrainingDatasetSize => "TrainingDatasetSize",
        ValidationDatasetSize => "ValidationDatasetSize",
        TrainingDatasetNumberOfRows => "TrainingDatasetNumberOfRows",
        TrainingDatasetNumberOfCols => "TrainingDatasetNumberOfCols",
        ValidationDatasetNumberOfRows => "ValidationDatasetNumberOfRows",
        ValidationDatasetNumberOfCols => "ValidationDatasetNumberOfCols",
        ClientLibrary => "ClientLibrary",
        ModelFileName => "ModelFileName",
    }
);

closed_enum!(
    /// Grouping shown next to each custom metadata entry.
    Category, |s: &str| ArtifactError::InvalidMetadataValue {
        key: "category".to_string(),
        reason: format!("`{s}` is not a supported category"),
    }, {
        Performance => "Performance",
        TrainingProfile => "Training Profile",
        TrainingAndValidationDatasets => "Training and Validation Datasets",
        TrainingEnvironment => "Training Environment",
        Other => "Other",
    }
);

closed_enum!(
    /// Keys of the standardized taxonomy metadata.
    TaxonomyKey, invalid_key, {
        UseCaseType => "UseCaseType",
        Framework => "Framework",
        FrameworkVersion => "FrameworkVersion",
        Algorithm => "Algorithm",
        Hyperparameters => "Hyperparameters",
        ArtifactTestResults => "ArtifactTestResults",
    }
);

closed_enum!(
    /// Supported values of the `UseCaseType` taxonomy entry.
    UseCaseType, invalid_value("UseCaseType"), {
        BinaryClassification => "binary_classification",
        Regression => "regression",
        MultinomialClassification => "multinomial_classification",
        Clustering => "clustering",
        Recommender => "recommender",
        DimensionalityReduction => "dimensionality_reduction/representation",
        TimeSeriesForecasting => "time_series_forecasting",
        AnomalyDetection => "anomaly_detection",
        TopicModeling => "topic_modeling",
        Ner => "ner",
        SentimentAnalysis => "sentiment_analysis",
        ImageClassification => "image_classification",
        ObjectLocalization => "object_localization",
        Other => "other",
    }
);

closed_enum!(
    /// Supported values of the `Framework` taxonomy entry.
    Framework, invalid_value("Framework"), {
        ScikitLearn => "scikit-learn",
        Xgboost => "xgboost",
        Tensorflow => "tensorflow",
        Pytorch => "pytorch",
        Mxnet => "mxnet",
        Keras => "keras",
        Lightgbm => "lightgbm",
        Pymc3 => "pymc3",
        PyOd => "pyod",
        Spacy => "spacy",
        Prophet => "prophet",
        Sktime => "sktime",
        Statsmodels => "statsmodels",
        Cuml => "cuml",
        OracleAutoMl => "oracle_automl",
        H2o => "h2o",
        Transformers => "transformers",
        Nltk => "nltk",
        Emcee => "emcee",
        Pystan => "pystan",
        Bert => "bert",
        Gensim => "gensim",
        Flair => "flair",
        Word2vec => "word2vec",
        Ensemble => "ensemble",
        Spark => "spark",
        Other => "other",
    }
);

/// One custom metadata entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CustomItem {
    pub key: CustomKey,
    pub value: Option<String>,
    pub description: String,
    pub category: Category,
}

impl CustomItem {
    pub fn new(
        key: CustomKey,
        value: Option<String>,
        description: impl Into<String>,
        category: Category,
    ) -> Self {
        Self {
            key,
            value,
            description: description.into(),
            category,
        }
    }

    /// UTF-8 byte length of the compact JSON encoding of the entry.
    pub fn size(&self) -> usize {
        serde_json::to_string(self).map(|s| s.len()).unwrap_or(0)
    }
}

/// One taxonomy metadata entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaxonomyItem {
    pub key: TaxonomyKey,
    pub value: Option<serde_json::Value>,
}

impl TaxonomyItem {
    pub fn empty(key: TaxonomyKey) -> Self {
        Self { key, value: None }
    }

    pub fn size(&self) -> usize {
        serde_json::to_string(self).map(|s| s.len()).unwrap_or(0)
    }
}
