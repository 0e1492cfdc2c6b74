//! Ordered metadata containers with per-entry size accounting.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::common::error::{ArtifactError, ArtifactResult};
use crate::common::fs;

use super::domain::{
    Category, CustomItem, CustomKey, Framework, TaxonomyItem, TaxonomyKey, UseCaseType,
    METADATA_DESCRIPTION_LIMIT, METADATA_SIZE_LIMIT,
};
use super::extract::ExtractedInfo;

/// File the hyperparameters spill to when they exceed the size budget.
pub const HYPERPARAMETERS_FILE_NAME: &str = "hyperparameters.json";

/// Custom metadata in insertion order, at most one entry per key.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomMetadata {
    items: Vec<CustomItem>,
}

impl CustomMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one entry. Fails with `DuplicateKey` when the key exists and
    /// `replace` is false; with `replace` the existing entry is overwritten in place.
    pub fn add(
        &mut self,
        key: CustomKey,
        value: Option<String>,
        description: impl Into<String>,
        category: Category,
        replace: bool,
    ) -> ArtifactResult<()> {
        self.add_item(CustomItem::new(key, value, description, category), replace)
    }

    /// Same as [`add`](Self::add) with the key given by its catalog name.
    pub fn add_named(
        &mut self,
        key: &str,
        value: Option<String>,
        description: impl Into<String>,
        category: Category,
        replace: bool,
    ) -> ArtifactResult<()> {
        self.add(key.parse()?, value, description, category, replace)
    }

    pub fn add_item(&mut self, item: CustomItem, replace: bool) -> ArtifactResult<()> {
        match self.position(item.key) {
            Some(_) if !replace => Err(ArtifactError::DuplicateKey(item.key.to_string())),
            Some(idx) => {
                self.items[idx] = item;
                Ok(())
            }
            None => {
                self.items.push(item);
                Ok(())
            }
        }
    }

    /// Add several entries. Without `replace` nothing is added if any key
    /// already exists or repeats within `items`.
    pub fn add_many(&mut self, items: Vec<CustomItem>, replace: bool) -> ArtifactResult<()> {
        if !replace {
            for (idx, item) in items.iter().enumerate() {
                let repeated = items[..idx].iter().any(|prev| prev.key == item.key);
                if repeated || self.contains(item.key) {
                    return Err(ArtifactError::DuplicateKey(item.key.to_string()));
                }
            }
        }
        for item in items {
            self.add_item(item, true)?;
        }
        Ok(())
    }

    pub fn get(&self, key: CustomKey) -> Option<&CustomItem> {
        self.items.iter().find(|item| item.key == key)
    }

    pub fn value(&self, key: CustomKey) -> Option<&str> {
        self.get(key).and_then(|item| item.value.as_deref())
    }

    pub fn contains(&self, key: CustomKey) -> bool {
        self.position(key).is_some()
    }

    pub fn remove(&mut self, key: CustomKey) -> Option<CustomItem> {
        self.position(key).map(|idx| self.items.remove(idx))
    }

    pub fn keys(&self) -> impl Iterator<Item = CustomKey> + '_ {
        self.items.iter().map(|item| item.key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CustomItem> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Sum of the serialized byte sizes of all entries.
    pub fn size(&self) -> usize {
        self.items.iter().map(CustomItem::size).sum()
    }

    /// Check entry level constraints. The size budget is checked by the
    /// publish gate together with the taxonomy.
    pub fn validate(&self) -> ArtifactResult<()> {
        for item in &self.items {
            if item.description.chars().count() > METADATA_DESCRIPTION_LIMIT {
                return Err(ArtifactError::InvalidMetadataValue {
                    key: item.key.to_string(),
                    reason: format!(
                        "description is longer than {METADATA_DESCRIPTION_LIMIT} characters"
                    ),
                });
            }
        }
        Ok(())
    }

    fn position(&self, key: CustomKey) -> Option<usize> {
        self.items.iter().position(|item| item.key == key)
    }
}

/// Taxonomy metadata. Every key is always present; unset entries hold `None`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaxonomyMetadata {
    items: Vec<TaxonomyItem>,
}

impl Default for TaxonomyMetadata {
    fn default() -> Self {
        Self {
            items: TaxonomyKey::ALL
                .iter()
                .copied()
                .map(TaxonomyItem::empty)
                .collect(),
        }
    }
}

impl TaxonomyMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: TaxonomyKey) -> Option<&TaxonomyItem> {
        self.items.iter().find(|item| item.key == key)
    }

    pub fn value(&self, key: TaxonomyKey) -> Option<&Value> {
        self.get(key).and_then(|item| item.value.as_ref())
    }

    pub fn set(&mut self, key: TaxonomyKey, value: Option<Value>) {
        if let Some(item) = self.items.iter_mut().find(|item| item.key == key) {
            item.value = value;
        } else {
            self.items.push(TaxonomyItem { key, value });
        }
    }

    pub fn set_use_case(&mut self, use_case: Option<UseCaseType>) {
        self.set(
            TaxonomyKey::UseCaseType,
            use_case.map(|u| Value::String(u.as_str().to_string())),
        );
    }

    /// Copy extractor output into the framework related entries.
    pub fn populate_from(&mut self, info: &ExtractedInfo) {
        self.set(
            TaxonomyKey::Framework,
            Some(Value::String(info.framework.as_str().to_string())),
        );
        self.set(
            TaxonomyKey::FrameworkVersion,
            info.framework_version.clone().map(Value::String),
        );
        self.set(
            TaxonomyKey::Algorithm,
            Some(Value::String(info.algorithm.clone())),
        );
        self.set(
            TaxonomyKey::Hyperparameters,
            Some(info.hyperparameters.clone()),
        );
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaxonomyItem> {
        self.items.iter()
    }

    pub fn size(&self) -> usize {
        self.items.iter().map(TaxonomyItem::size).sum()
    }

    /// When the hyperparameters entry alone is over budget, write it to
    /// `hyperparameters.json` in `dir` and null it in the document. Returns the
    /// side file path when a spill happened.
    pub fn spill_hyperparameters(&mut self, dir: &Path) -> ArtifactResult<Option<PathBuf>> {
        let Some(entry) = self.get(TaxonomyKey::Hyperparameters) else {
            return Ok(None);
        };
        let size = entry.size();
        if size <= METADATA_SIZE_LIMIT {
            return Ok(None);
        }
        let path = dir.join(HYPERPARAMETERS_FILE_NAME);
        warn!(
            size,
            limit = METADATA_SIZE_LIMIT,
            path = %path.display(),
            "model hyperparameters are too large for catalog metadata; saving them to a side file \
             and removing them from the metadata"
        );
        let value = entry.value.clone().unwrap_or(Value::Null);
        fs::write_json(&path, &value)?;
        self.set(TaxonomyKey::Hyperparameters, None);
        Ok(Some(path))
    }

    /// Values of the closed-valued entries must belong to their enumerations.
    pub fn validate(&self) -> ArtifactResult<()> {
        if let Some(value) = self.value(TaxonomyKey::UseCaseType) {
            check_closed::<UseCaseType>(TaxonomyKey::UseCaseType, value)?;
        }
        if let Some(value) = self.value(TaxonomyKey::Framework) {
            check_closed::<Framework>(TaxonomyKey::Framework, value)?;
        }
        debug!(size = self.size(), "taxonomy metadata validated");
        Ok(())
    }
}

fn check_closed<T>(key: TaxonomyKey, value: &Value) -> ArtifactResult<()>
where
    T: std::str::FromStr<Err = ArtifactError>,
{
    match value {
        Value::String(s) => s.parse::<T>().map(|_| ()),
        other => Err(ArtifactError::InvalidMetadataValue {
            key: key.to_string(),
            reason: format!("expected a string, got {other}"),
        }),
    }
}
