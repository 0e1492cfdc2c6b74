//! Conda pack manifests and pack addresses.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::common::error::{ArtifactError, ArtifactResult};
use crate::common::storage::StorageUri;

const MANIFEST_SUFFIX: &str = "_manifest.yaml";

/// The `manifest` section of a pack's `*_manifest.yaml`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub pack_path: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    pub python: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    pub manifest_version: Option<String>,
}

/// Accept `3.8` as well as `'3.8'`.
fn scalar_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_yaml::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_yaml::Value::String(s)) => Some(s),
        Some(serde_yaml::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[derive(Deserialize)]
struct ManifestFile {
    manifest: Manifest,
}

/// Locate the first `*_manifest.yaml` in `prefix`, in name order.
pub fn find_manifest(prefix: &Path) -> ArtifactResult<PathBuf> {
    let entries = fs::read_dir(prefix).map_err(|_| ArtifactError::ManifestNotFound {
        prefix: prefix.to_path_buf(),
    })?;
    let mut candidates: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(MANIFEST_SUFFIX))
        })
        .collect();
    candidates.sort();
    candidates
        .into_iter()
        .next()
        .ok_or_else(|| ArtifactError::ManifestNotFound {
            prefix: prefix.to_path_buf(),
        })
}

/// Read the manifest of the environment installed at `prefix`.
pub fn read_manifest(prefix: &Path) -> ArtifactResult<Manifest> {
    let path = find_manifest(prefix)?;
    let raw = fs::read_to_string(&path).map_err(|e| ArtifactError::io(&path, e))?;
    let file: ManifestFile = serde_yaml::from_str(&raw)?;
    debug!(path = %path.display(), slug = ?file.manifest.slug, "read conda manifest");
    Ok(file.manifest)
}

/// Object storage address of a published pack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CondaUri {
    pub bucket: String,
    pub namespace: String,
    pub object: String,
    /// Basename of the object path.
    pub slug: String,
}

impl CondaUri {
    pub fn parse(raw: &str) -> ArtifactResult<Self> {
        let uri = StorageUri::parse(raw)?;
        if uri.key.is_empty() {
            return Err(ArtifactError::InvalidStoragePath(raw.to_string()));
        }
        Ok(Self {
            slug: uri.basename().to_string(),
            bucket: uri.bucket,
            namespace: uri.namespace,
            object: uri.key,
        })
    }

    pub fn storage_uri(&self) -> StorageUri {
        StorageUri {
            bucket: self.bucket.clone(),
            namespace: self.namespace.clone(),
            key: self.object.clone(),
        }
    }
}

/// Bucket that `odsc init` configured for publishing packs.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct BucketInfo {
    pub name: String,
    pub namespace: String,
}

#[derive(Deserialize)]
struct CondaConfig {
    bucket_info: BucketInfo,
}

/// Read `~/conda/config.yaml`. Returns `None` when it is missing or has no bucket section.
pub fn publish_bucket(home: &Path) -> Option<BucketInfo> {
    let path = home.join("conda").join("config.yaml");
    let raw = fs::read_to_string(&path).ok()?;
    serde_yaml::from_str::<CondaConfig>(&raw)
        .ok()
        .map(|c| c.bucket_info)
}

/// Read the `python` entry of the JSON manifest stored in an object metadata header.
pub fn python_from_manifest_header(header: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(header).ok()?;
    match value.get("python")? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_manifest(dir: &Path, body: &str) {
        fs::write(dir.join("gml_p38_cpu_v1_manifest.yaml"), body).unwrap();
    }

    #[test]
    fn manifest_is_read_from_the_prefix() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(
            dir.path(),
            "manifest:\n  name: General ML\n  slug: gml_p38_cpu_v1\n  type: data_science\n  \
             pack_path: oci://service-conda-packs@id19sfcrra6z/service_pack/cpu/gml_p38_cpu_v1\n  \
             python: 3.8\n",
        );
        let manifest = read_manifest(dir.path()).unwrap();
        assert_eq!(manifest.slug.as_deref(), Some("gml_p38_cpu_v1"));
        assert_eq!(manifest.kind.as_deref(), Some("data_science"));
        assert_eq!(manifest.python.as_deref(), Some("3.8"));
    }

    #[test]
    fn missing_manifest_names_the_prefix() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("environment.yaml"), "name: x\n").unwrap();
        match read_manifest(dir.path()) {
            Err(ArtifactError::ManifestNotFound { prefix }) => assert_eq!(prefix, dir.path()),
            other => panic!("expected ManifestNotFound, got {other:?}"),
        }
    }

    #[test]
    fn conda_uri_breaks_down_into_parts() {
        let uri = CondaUri::parse("oci://packs@ns/conda_environments/cpu/myenv/1.0/myenv_v1_0")
            .unwrap();
        assert_eq!(uri.bucket, "packs");
        assert_eq!(uri.namespace, "ns");
        assert_eq!(uri.object, "conda_environments/cpu/myenv/1.0/myenv_v1_0");
        assert_eq!(uri.slug, "myenv_v1_0");
        assert!(CondaUri::parse("oci://packs@ns").is_err());
    }

    #[test]
    fn bucket_info_comes_from_the_conda_config() {
        let home = tempfile::tempdir().unwrap();
        assert_eq!(publish_bucket(home.path()), None);
        fs::create_dir(home.path().join("conda")).unwrap();
        fs::write(
            home.path().join("conda/config.yaml"),
            "bucket_info:\n  name: packs\n  namespace: ns\n",
        )
        .unwrap();
        let info = publish_bucket(home.path()).unwrap();
        assert_eq!(info.name, "packs");
        assert_eq!(info.namespace, "ns");
    }

    #[test]
    fn python_version_is_read_from_the_header_json() {
        assert_eq!(
            python_from_manifest_header(r#"{"python": "3.8", "slug": "x"}"#).as_deref(),
            Some("3.8")
        );
        assert_eq!(python_from_manifest_header("not json"), None);
        assert_eq!(python_from_manifest_header(r#"{"slug": "x"}"#), None);
    }
}
