//! Object storage addressing and the transfer collaborator contract.

use std::collections::BTreeMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use super::error::{ArtifactError, ArtifactResult};

static STORAGE_URI: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^oci://([^@/\s]+)@([^/\s]+)(?:/(.*))?$").ok());

/// Parsed `oci://bucket@namespace/key` address.
///
/// The key may be empty: `oci://bucket@ns` addresses the bucket root and is a
/// valid upload prefix, since every object written under it gets a name via
/// [`StorageUri::join`]. Callers that need a concrete object reject an empty
/// key themselves.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct StorageUri {
    pub bucket: String,
    pub namespace: String,
    /// Object name or prefix, without a leading slash. May be empty.
    pub key: String,
}

impl StorageUri {
    /// Fails with `InvalidStoragePath` when `raw` does not follow the pattern.
    pub fn parse(raw: &str) -> ArtifactResult<Self> {
        let caps = STORAGE_URI
            .as_ref()
            .and_then(|re| re.captures(raw.trim()))
            .ok_or_else(|| ArtifactError::InvalidStoragePath(raw.to_string()))?;
        Ok(Self {
            bucket: caps[1].to_string(),
            namespace: caps[2].to_string(),
            key: caps
                .get(3)
                .map(|m| m.as_str().trim_matches('/').to_string())
                .unwrap_or_default(),
        })
    }

    /// Address of `name` under this prefix.
    pub fn join(&self, name: &str) -> Self {
        let name = name.trim_start_matches('/');
        let key = if self.key.is_empty() {
            name.to_string()
        } else {
            format!("{}/{name}", self.key)
        };
        Self { key, ..self.clone() }
    }

    /// Last path segment of the key.
    pub fn basename(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or("")
    }
}

impl fmt::Display for StorageUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "oci://{}@{}/{}", self.bucket, self.namespace, self.key)
    }
}

/// Blocking object storage access provided by the embedding application.
pub trait ObjectStorage {
    /// Write `body` to `uri`, replacing any existing object.
    fn put(&self, uri: &StorageUri, body: &[u8]) -> ArtifactResult<()>;

    /// User metadata headers of the object at `uri`.
    fn object_metadata(&self, uri: &StorageUri) -> ArtifactResult<BTreeMap<String, String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bucket_namespace_and_key() {
        let uri = StorageUri::parse("oci://packs@tenancyns/conda/gml_p38_cpu_v1").unwrap();
        assert_eq!(uri.bucket, "packs");
        assert_eq!(uri.namespace, "tenancyns");
        assert_eq!(uri.key, "conda/gml_p38_cpu_v1");
        assert_eq!(uri.basename(), "gml_p38_cpu_v1");
        assert_eq!(uri.to_string(), "oci://packs@tenancyns/conda/gml_p38_cpu_v1");
    }

    #[test]
    fn join_appends_under_the_prefix() {
        let uri = StorageUri::parse("oci://b@ns/data/").unwrap();
        assert_eq!(uri.join("train.csv").to_string(), "oci://b@ns/data/train.csv");
        let root = StorageUri::parse("oci://b@ns").unwrap();
        assert!(root.key.is_empty());
        assert_eq!(root.join("train.csv").to_string(), "oci://b@ns/train.csv");
    }

    #[test]
    fn rejects_other_shapes() {
        for raw in ["s3://bucket/key", "oci://bucket/key", "/local/path", "oci://@ns/key"] {
            let err = StorageUri::parse(raw).unwrap_err();
            assert!(matches!(err, ArtifactError::InvalidStoragePath(p) if p == raw));
        }
    }
}
