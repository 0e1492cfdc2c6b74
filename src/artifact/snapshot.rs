//! Snapshots of training and validation data in object storage.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;
use walkdir::WalkDir;

use crate::common::error::{ArtifactError, ArtifactResult};
use crate::common::storage::{ObjectStorage, StorageUri};
use crate::metadata::{Category, CustomKey, CustomMetadata};
use crate::schema::TabularSample;

use super::files::glob_matcher;

/// Which dataset a snapshot describes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DataKind {
    Training,
    Validation,
}

impl DataKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DataKind::Training => "training",
            DataKind::Validation => "validation",
        }
    }

    /// Object name used for in-memory data.
    pub fn default_file_name(self) -> &'static str {
        match self {
            DataKind::Training => "train.csv",
            DataKind::Validation => "validation.csv",
        }
    }

    fn path_key(self) -> CustomKey {
        match self {
            DataKind::Training => CustomKey::TrainingDataset,
            DataKind::Validation => CustomKey::ValidationDataset,
        }
    }

    fn size_key(self) -> CustomKey {
        match self {
            DataKind::Training => CustomKey::TrainingDatasetSize,
            DataKind::Validation => CustomKey::ValidationDatasetSize,
        }
    }

    fn shape_keys(self) -> (CustomKey, CustomKey) {
        match self {
            DataKind::Training => (
                CustomKey::TrainingDatasetNumberOfRows,
                CustomKey::TrainingDatasetNumberOfCols,
            ),
            DataKind::Validation => (
                CustomKey::ValidationDatasetNumberOfRows,
                CustomKey::ValidationDatasetNumberOfCols,
            ),
        }
    }
}

/// Data handed to [`snapshot_data`].
#[derive(Clone, Copy, Debug)]
pub enum SnapshotSource<'a> {
    /// In-memory sample written as CSV under the given object name.
    Memory {
        sample: &'a TabularSample,
        file_name: &'a str,
    },
    /// Local files matching a glob; the directory part must be literal.
    Files(&'a str),
    /// Data already in object storage; only the destination is recorded.
    PathOnly,
}

/// Upload `source` under `destination` and record where it went, and how big
/// it is, in `metadata`. Returns the written object addresses.
pub fn snapshot_data(
    storage: &dyn ObjectStorage,
    metadata: &mut CustomMetadata,
    source: SnapshotSource<'_>,
    destination: &str,
    kind: DataKind,
) -> ArtifactResult<Vec<StorageUri>> {
    let prefix = StorageUri::parse(destination)?;
    match source {
        SnapshotSource::Memory { sample, file_name } => {
            let uri = prefix.join(file_name);
            storage.put(&uri, sample.to_csv().as_bytes())?;
            info!(uri = %uri, rows = sample.n_rows(), kind = kind.as_str(), "data snapshot written");
            record_path(metadata, &uri.to_string(), kind)?;
            record_shape(metadata, sample, kind)?;
            Ok(vec![uri])
        }
        SnapshotSource::Files(pattern) => {
            let files = expand_glob(pattern)?;
            if files.is_empty() {
                return Err(ArtifactError::InvalidArgument(format!(
                    "no files were found in `{pattern}`"
                )));
            }
            let mut written = Vec::with_capacity(files.len());
            let mut total_bytes = 0u64;
            for file in &files {
                let body = fs::read(file).map_err(|e| ArtifactError::io(file, e))?;
                let name = file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let uri = prefix.join(&name);
                storage.put(&uri, &body)?;
                total_bytes += body.len() as u64;
                written.push(uri);
            }
            info!(files = written.len(), bytes = total_bytes, kind = kind.as_str(), "data files uploaded");
            let joined = written
                .iter()
                .map(StorageUri::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            record_path(metadata, &joined, kind)?;
            metadata.add(
                kind.size_key(),
                Some(format!("{total_bytes} bytes")),
                format!("The {} dataset size in bytes.", kind.as_str()),
                Category::TrainingAndValidationDatasets,
                true,
            )?;
            Ok(written)
        }
        SnapshotSource::PathOnly => {
            // A recorded dataset must name an object, not a bucket.
            if prefix.key.is_empty() {
                return Err(ArtifactError::InvalidStoragePath(destination.to_string()));
            }
            record_path(metadata, destination, kind)?;
            Ok(Vec::new())
        }
    }
}

fn record_path(metadata: &mut CustomMetadata, path: &str, kind: DataKind) -> ArtifactResult<()> {
    metadata.add(
        kind.path_key(),
        Some(path.to_string()),
        format!(
            "The path where {} dataset path are stored on the object storage.",
            kind.as_str()
        ),
        Category::TrainingAndValidationDatasets,
        true,
    )
}

fn record_shape(
    metadata: &mut CustomMetadata,
    sample: &TabularSample,
    kind: DataKind,
) -> ArtifactResult<()> {
    let category = Category::TrainingAndValidationDatasets;
    metadata.add(
        kind.size_key(),
        Some(sample.shape()),
        format!("The size of the {} dataset.", kind.as_str()),
        category,
        true,
    )?;
    let (rows, cols) = kind.shape_keys();
    metadata.add(
        rows,
        Some(sample.n_rows().to_string()),
        format!("The number of rows in the {} dataset.", kind.as_str()),
        category,
        true,
    )?;
    metadata.add(
        cols,
        Some(sample.n_cols().to_string()),
        format!("The number of columns in the {} dataset.", kind.as_str()),
        category,
        true,
    )
}

/// Files in the pattern's directory whose names match its last component.
fn expand_glob(pattern: &str) -> ArtifactResult<Vec<PathBuf>> {
    let path = Path::new(pattern);
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| ArtifactError::InvalidArgument(format!("`{pattern}` names no file")))?;
    let matcher = glob_matcher(&name)?;
    let mut files: Vec<PathBuf> = WalkDir::new(&dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| matcher.is_match(&e.file_name().to_string_lossy()))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    Ok(files)
}
