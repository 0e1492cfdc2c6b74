//! Structural schema of model inputs and outputs.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::common::error::{ArtifactError, ArtifactResult};
use crate::common::fs;
use crate::metadata::METADATA_SIZE_LIMIT;

/// Side file holding the input schema when it is too large for the catalog.
pub const INPUT_SCHEMA_FILE_NAME: &str = "input_schema.json";
/// Side file holding the output schema when it is too large for the catalog.
pub const OUTPUT_SCHEMA_FILE_NAME: &str = "output_schema.json";

/// Value domain of a column: a textual summary, summary statistics and constraints.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub values: String,
    pub stats: Map<String, Value>,
    pub constraints: Vec<Value>,
}

/// One column descriptor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub dtype: String,
    pub feature_type: String,
    pub name: String,
    pub domain: Domain,
    pub required: bool,
    pub description: String,
    pub order: usize,
}

/// Ordered column descriptors.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(rename = "schema")]
    pub attributes: Vec<Attribute>,
}

impl Schema {
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Byte length of the compact JSON encoding.
    pub fn size(&self) -> usize {
        serde_json::to_string(self).map(|s| s.len()).unwrap_or(0)
    }

    /// Fails with `SchemaTooLarge` when the schema cannot be stored as catalog metadata.
    pub fn validate_size(&self) -> ArtifactResult<()> {
        let size = self.size();
        if size > METADATA_SIZE_LIMIT {
            return Err(ArtifactError::SchemaTooLarge {
                size,
                limit: METADATA_SIZE_LIMIT,
            });
        }
        Ok(())
    }

    /// Column names must be unique and `order` must match the position.
    pub fn validate_schema(&self) -> ArtifactResult<()> {
        let mut seen = HashSet::new();
        for (idx, attr) in self.attributes.iter().enumerate() {
            if !seen.insert(attr.name.as_str()) {
                return Err(ArtifactError::InvalidArgument(format!(
                    "duplicate column `{}` in schema",
                    attr.name
                )));
            }
            if attr.order != idx {
                return Err(ArtifactError::InvalidArgument(format!(
                    "column `{}` has order {} at position {idx}",
                    attr.name, attr.order
                )));
            }
        }
        Ok(())
    }

    pub fn to_json_file(&self, path: &Path) -> ArtifactResult<()> {
        fs::write_json(path, self)
    }

    pub fn from_json_file(path: &Path) -> ArtifactResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| ArtifactError::io(path, e))?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attr(name: &str, order: usize) -> Attribute {
        Attribute {
            dtype: "int64".into(),
            feature_type: "Integer".into(),
            name: name.into(),
            domain: Domain::default(),
            required: true,
            description: name.into(),
            order,
        }
    }

    #[test]
    fn duplicate_names_fail_validation() {
        let schema = Schema {
            attributes: vec![attr("a", 0), attr("a", 1)],
        };
        assert!(schema.validate_schema().is_err());
    }

    #[test]
    fn oversized_schema_reports_its_size() {
        let schema = Schema {
            attributes: (0..400).map(|i| attr(&format!("column_{i:04}"), i)).collect(),
        };
        match schema.validate_size() {
            Err(ArtifactError::SchemaTooLarge { size, limit }) => {
                assert_eq!(size, schema.size());
                assert_eq!(limit, METADATA_SIZE_LIMIT);
            }
            other => panic!("expected SchemaTooLarge, got {other:?}"),
        }
    }

    #[test]
    fn json_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(INPUT_SCHEMA_FILE_NAME);
        let schema = Schema {
            attributes: vec![attr("a", 0)],
        };
        schema.to_json_file(&path).unwrap();
        assert_eq!(Schema::from_json_file(&path).unwrap(), schema);
    }
}
