//! Filesystem helpers shared by the artifact writers.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::error::{ArtifactError, ArtifactResult};

/// Write `bytes` to `path` through a temporary sibling and a rename, so readers
/// never observe a half-written file.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> ArtifactResult<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));
    fs::write(&tmp, bytes).map_err(|e| ArtifactError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        ArtifactError::io(path, e)
    })
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> ArtifactResult<()> {
    let body = serde_json::to_vec_pretty(value)?;
    atomic_write(path, &body)
}

/// Remove a directory tree if present. Missing directories are not an error.
pub fn remove_dir_if_exists(path: &Path) -> ArtifactResult<bool> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(ArtifactError::io(path, e)),
    }
}

/// Absolute form of `path`. Symlinks are resolved when the path exists.
pub fn absolute(path: &Path) -> ArtifactResult<PathBuf> {
    if let Ok(canonical) = fs::canonicalize(path) {
        return Ok(canonical);
    }
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|e| ArtifactError::io(path, e))?;
    Ok(cwd.join(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_replaces_content_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runtime.yaml");
        atomic_write(&path, b"first").unwrap();
        atomic_write(&path, b"second").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn removing_a_missing_dir_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("__pycache__");
        fs::create_dir(&cache).unwrap();
        assert!(remove_dir_if_exists(&cache).unwrap());
        assert!(!remove_dir_if_exists(&cache).unwrap());
    }
}
