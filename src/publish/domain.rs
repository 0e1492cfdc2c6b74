//! Collaborator contracts and records of the publish step.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::error::ArtifactResult;
use crate::common::progress::Progress;
use crate::metadata::{CustomMetadata, TaxonomyMetadata};
use crate::provenance::ProvenanceRecord;
use crate::schema::Schema;

/// Everything the catalog receives for one upload.
#[derive(Debug)]
pub struct UploadRequest<'a> {
    pub artifact_dir: &'a Path,
    /// Files of the bundle, relative to `artifact_dir`, ignore patterns applied.
    pub files: &'a [String],
    pub display_name: Option<&'a str>,
    pub description: Option<&'a str>,
    pub project_id: &'a str,
    pub compartment_id: &'a str,
    pub provenance: &'a ProvenanceRecord,
    pub custom_metadata: &'a CustomMetadata,
    pub taxonomy_metadata: &'a TaxonomyMetadata,
    pub input_schema: &'a Schema,
    pub output_schema: &'a Schema,
    pub freeform_tags: &'a BTreeMap<String, String>,
    pub defined_tags: &'a BTreeMap<String, BTreeMap<String, Value>>,
    /// Connection timeout in seconds.
    pub timeout: Option<u64>,
}

/// Remote model catalog.
pub trait ModelCatalog {
    /// Upload the bundle and return the new model id. A timeout must be
    /// reported as a `Remote` error with `timed_out` set.
    fn upload(&self, request: &UploadRequest<'_>, progress: &mut dyn Progress)
        -> ArtifactResult<String>;
}

/// Outcome of one introspection rule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleResult {
    pub name: String,
    pub passed: bool,
    #[serde(default)]
    pub message: String,
}

impl RuleResult {
    pub fn passed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            message: String::new(),
        }
    }

    pub fn failed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            message: message.into(),
        }
    }
}

/// Rule based pre-flight checks run against an artifact directory.
pub trait Introspector {
    fn run(&self, artifact_dir: &Path) -> ArtifactResult<Vec<RuleResult>>;
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IntrospectionStatus {
    Passed,
    NotPassed,
    NotTested,
}

impl fmt::Display for IntrospectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IntrospectionStatus::Passed => "Passed",
            IntrospectionStatus::NotPassed => "Not passed",
            IntrospectionStatus::NotTested => "Not tested",
        })
    }
}

/// Rule results of one introspection run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IntrospectionReport {
    pub results: Vec<RuleResult>,
}

impl IntrospectionReport {
    pub fn status(&self) -> IntrospectionStatus {
        if self.results.is_empty() {
            IntrospectionStatus::NotTested
        } else if self.results.iter().all(|r| r.passed) {
            IntrospectionStatus::Passed
        } else {
            IntrospectionStatus::NotPassed
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &RuleResult> {
        self.results.iter().filter(|r| !r.passed)
    }

    pub fn failed_count(&self) -> usize {
        self.failures().count()
    }

    /// Results keyed by rule name, the shape stored in `ArtifactTestResults`.
    pub fn to_value(&self) -> Value {
        let map = self
            .results
            .iter()
            .map(|r| {
                (
                    r.name.clone(),
                    serde_json::json!({ "success": r.passed, "message": r.message }),
                )
            })
            .collect::<serde_json::Map<_, _>>();
        Value::Object(map)
    }
}

/// Result of a save that did not fail outright.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Model id assigned by the catalog.
    Published(String),
    /// The upload timed out; the message says how to retry.
    TimedOut(String),
}

impl SaveOutcome {
    pub fn model_id(&self) -> Option<&str> {
        match self {
            SaveOutcome::Published(id) => Some(id),
            SaveOutcome::TimedOut(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_needs_every_rule_to_pass() {
        let mut report = IntrospectionReport::default();
        assert_eq!(report.status(), IntrospectionStatus::NotTested);
        report.results.push(RuleResult::passed("score_py_present"));
        assert_eq!(report.status(), IntrospectionStatus::Passed);
        report
            .results
            .push(RuleResult::failed("runtime_yaml_valid", "INFERENCE_ENV_PATH is empty"));
        assert_eq!(report.status(), IntrospectionStatus::NotPassed);
        assert_eq!(report.failed_count(), 1);
        assert_eq!(
            report.to_value()["runtime_yaml_valid"]["message"],
            "INFERENCE_ENV_PATH is empty"
        );
    }

    #[test]
    fn only_published_outcomes_carry_an_id() {
        assert_eq!(SaveOutcome::Published("ocid1.model".into()).model_id(), Some("ocid1.model"));
        assert_eq!(SaveOutcome::TimedOut("retry".into()).model_id(), None);
    }
}
