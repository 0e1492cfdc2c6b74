//! Installing the libraries an artifact declares.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::common::config::ConflictStrategy;
use crate::common::error::{ArtifactError, ArtifactResult};

/// Requirements file of format 3.0 and later.
pub const REQUIREMENTS_FILE_NAME: &str = "requirements.txt";
/// Requirements file of the legacy formats.
pub const LEGACY_REQUIREMENTS_FILE_NAME: &str = "ds-requirements.txt";

/// State of one requirement in the running environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequirementStatus {
    Satisfied,
    Missing,
    /// Installed, but at a version the requirement rejects.
    Conflict { installed: String },
}

/// Installed package collaborator.
pub trait PackageIndex {
    fn check(&self, requirement: &str) -> ArtifactResult<RequirementStatus>;
    fn install(&self, requirement: &str, upgrade: bool) -> ArtifactResult<()>;
}

/// Installed versions that conflict with the artifact, kept under `Ignore`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VersionConflicts {
    /// `(installed, required)` pairs.
    pub entries: Vec<(String, String)>,
}

impl VersionConflicts {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for VersionConflicts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WARNING: Version conflicts found:")?;
        for (installed, required) in &self.entries {
            write!(f, "\nInstalled: {installed}, Required: {required}")?;
        }
        Ok(())
    }
}

/// What [`install_requirements`] did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub installed: Vec<String>,
    pub updated: Vec<String>,
    pub conflicts: VersionConflicts,
}

/// Requirements file for the artifact format. Fails with
/// `RequirementsNotFound` when the expected file is missing.
pub fn requirements_file(dir: &Path, legacy: bool) -> ArtifactResult<PathBuf> {
    let name = if legacy {
        LEGACY_REQUIREMENTS_FILE_NAME
    } else {
        REQUIREMENTS_FILE_NAME
    };
    let path = dir.join(name);
    if path.is_file() {
        Ok(path)
    } else {
        Err(ArtifactError::RequirementsNotFound(dir.to_path_buf()))
    }
}

/// Requirement lines, without blanks and `#` comments.
pub fn read_requirements(path: &Path) -> ArtifactResult<Vec<String>> {
    let raw = fs::read_to_string(path).map_err(|e| ArtifactError::io(path, e))?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Install missing requirements and resolve conflicts per `strategy`.
/// Conflicts kept under `Ignore` never fail the call; they are reported in
/// one warning and returned.
pub fn install_requirements(
    dir: &Path,
    legacy: bool,
    index: &dyn PackageIndex,
    strategy: ConflictStrategy,
) -> ArtifactResult<InstallReport> {
    let path = requirements_file(dir, legacy)?;
    let mut report = InstallReport::default();
    for requirement in read_requirements(&path)? {
        match index.check(&requirement)? {
            RequirementStatus::Satisfied => {}
            RequirementStatus::Missing => {
                index.install(&requirement, false)?;
                report.installed.push(requirement);
            }
            RequirementStatus::Conflict { installed } => match strategy {
                ConflictStrategy::Update => {
                    index.install(&requirement, true)?;
                    report.updated.push(requirement);
                }
                ConflictStrategy::Ignore => report.conflicts.entries.push((installed, requirement)),
            },
        }
    }
    if !report.conflicts.is_empty() {
        warn!(
            conflicts = report.conflicts.entries.len(),
            "{}; install with `ConflictStrategy::Update` to use the versions the artifact requires",
            report.conflicts
        );
    }
    info!(
        installed = report.installed.len(),
        updated = report.updated.len(),
        "requirements processed"
    );
    Ok(report)
}
