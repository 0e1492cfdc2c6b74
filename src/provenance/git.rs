//! Version control inspection of the training code.
//!
//! The resolver only needs a snapshot of the repository: where it lives, its
//! remotes, the checked out branch and commit, and which paths have pending
//! changes. [`VcsProbe`] produces that snapshot; [`GitCli`] does it by running
//! the `git` binary.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::common::error::{ArtifactError, ArtifactResult};
use crate::common::fs;

use super::domain::TrainingCodeInfo;

/// A configured remote.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Remote {
    pub name: String,
    pub url: String,
}

/// Point-in-time view of a repository.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RepoState {
    /// Absolute root of the working tree.
    pub working_dir: PathBuf,
    pub remotes: Vec<Remote>,
    /// `None` on a detached head.
    pub branch: Option<String>,
    /// `None` when the repository has no commits yet.
    pub head_commit: Option<String>,
    /// Tracked paths with staged or unstaged modifications, relative to the root.
    pub changed: Vec<PathBuf>,
    /// Untracked paths, relative to the root.
    pub untracked: Vec<PathBuf>,
}

impl RepoState {
    /// URL of `origin` if configured, else of the first remote, else a
    /// `file://` URL of the working tree.
    pub fn remote_url(&self) -> String {
        self.remotes
            .iter()
            .find(|r| r.name == "origin")
            .or_else(|| self.remotes.first())
            .map(|r| r.url.clone())
            .unwrap_or_else(|| format!("file://{}", self.working_dir.display()))
    }

    /// Training code section derived from this state.
    pub fn training_code(&self) -> TrainingCodeInfo {
        TrainingCodeInfo {
            git_remote: Some(self.remote_url()),
            git_branch: self.branch.clone(),
            git_commit: self.head_commit.clone(),
            artifact_directory: None,
            training_script: None,
        }
    }

    /// Whether `path` (absolute) is inside the working tree and has modified or
    /// untracked files at or below it. Paths outside the tree are never dirty.
    pub fn is_path_dirty(&self, path: &Path) -> bool {
        let Ok(rel) = path.strip_prefix(&self.working_dir) else {
            return false;
        };
        self.changed
            .iter()
            .chain(self.untracked.iter())
            .any(|p| rel.as_os_str().is_empty() || p.starts_with(rel))
    }
}

/// Produces repository snapshots.
pub trait VcsProbe {
    /// Inspect the repository enclosing `start`. Fails with `NoRepository`
    /// when no parent directory holds one.
    fn inspect(&self, start: &Path) -> ArtifactResult<RepoState>;
}

/// Walk `start` and its ancestors looking for a `.git` entry.
pub fn find_repository_root(start: &Path) -> ArtifactResult<PathBuf> {
    let start = fs::absolute(start)?;
    start
        .ancestors()
        .find(|dir| dir.join(".git").exists())
        .map(Path::to_path_buf)
        .ok_or(ArtifactError::NoRepository(start))
}

/// [`VcsProbe`] backed by the `git` command line.
#[derive(Clone, Debug)]
pub struct GitCli {
    program: String,
}

impl Default for GitCli {
    fn default() -> Self {
        Self {
            program: "git".to_string(),
        }
    }
}

impl GitCli {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Run git in `root`. `Ok(None)` means git ran and exited non-zero.
    fn run<I, S>(&self, root: &Path, args: I) -> ArtifactResult<Option<String>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = Command::new(&self.program)
            .arg("-C")
            .arg(root)
            .args(args)
            .output()
            .map_err(|e| ArtifactError::io(root, e))?;
        if !output.status.success() {
            debug!(
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "git exited with {}",
                output.status
            );
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned()))
    }
}

impl VcsProbe for GitCli {
    fn inspect(&self, start: &Path) -> ArtifactResult<RepoState> {
        let root = find_repository_root(start)?;
        let working_dir = match self.run(&root, ["rev-parse", "--show-toplevel"])? {
            Some(out) if !out.trim().is_empty() => PathBuf::from(out.trim()),
            _ => return Err(ArtifactError::NoRepository(root)),
        };

        let remotes = self
            .run(&working_dir, ["config", "--get-regexp", r"^remote\..*\.url$"])?
            .map(|out| parse_remotes(&out))
            .unwrap_or_default();
        let branch = self
            .run(&working_dir, ["symbolic-ref", "--short", "-q", "HEAD"])?
            .map(|out| out.trim().to_string())
            .filter(|b| !b.is_empty());
        let head_commit = self
            .run(&working_dir, ["rev-parse", "--verify", "-q", "HEAD"])?
            .map(|out| out.trim().to_string())
            .filter(|c| !c.is_empty());
        let status = self
            .run(
                &working_dir,
                ["status", "--porcelain=v1", "-z", "--untracked-files=all"],
            )?
            .unwrap_or_default();
        let (changed, untracked) = parse_status(&status);

        Ok(RepoState {
            working_dir,
            remotes,
            branch,
            head_commit,
            changed,
            untracked,
        })
    }
}

/// Parse `git config --get-regexp` output of `remote.<name>.url <url>` lines.
fn parse_remotes(out: &str) -> Vec<Remote> {
    out.lines()
        .filter_map(|line| {
            let (key, url) = line.split_once(' ')?;
            let name = key.strip_prefix("remote.")?.strip_suffix(".url")?;
            Some(Remote {
                name: name.to_string(),
                url: url.trim().to_string(),
            })
        })
        .collect()
}

/// Parse NUL separated porcelain v1 status into (changed, untracked).
fn parse_status(out: &str) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let mut changed = Vec::new();
    let mut untracked = Vec::new();
    let mut entries = out.split('\0').filter(|e| !e.is_empty());
    while let Some(entry) = entries.next() {
        if entry.len() < 4 {
            continue;
        }
        let (code, path) = entry.split_at(3);
        let code = code.trim_end();
        match code {
            "??" => untracked.push(PathBuf::from(path)),
            "!!" => {}
            _ => {
                changed.push(PathBuf::from(path));
                // Renames and copies carry the source path as a separate entry.
                if code.starts_with('R') || code.starts_with('C') {
                    entries.next();
                }
            }
        }
    }
    (changed, untracked)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(root: &str) -> RepoState {
        RepoState {
            working_dir: PathBuf::from(root),
            ..Default::default()
        }
    }

    #[test]
    fn origin_is_preferred_over_other_remotes() {
        let mut repo = state("/work/repo");
        repo.remotes = vec![
            Remote {
                name: "upstream".into(),
                url: "https://example.com/upstream.git".into(),
            },
            Remote {
                name: "origin".into(),
                url: "https://example.com/origin.git".into(),
            },
        ];
        assert_eq!(repo.remote_url(), "https://example.com/origin.git");
        repo.remotes.remove(1);
        assert_eq!(repo.remote_url(), "https://example.com/upstream.git");
    }

    #[test]
    fn repository_without_remotes_uses_a_file_url() {
        assert_eq!(state("/work/repo").remote_url(), "file:///work/repo");
    }

    #[test]
    fn commit_is_omitted_for_empty_repositories() {
        let mut repo = state("/work/repo");
        repo.branch = Some("main".into());
        let code = repo.training_code();
        assert_eq!(code.git_branch.as_deref(), Some("main"));
        assert_eq!(code.git_commit, None);
    }

    #[test]
    fn untracked_files_below_a_path_make_it_dirty() {
        let mut repo = state("/work/repo");
        repo.untracked = vec![PathBuf::from("models/artifact/new.pkl")];
        assert!(repo.is_path_dirty(Path::new("/work/repo/models/artifact")));
        assert!(repo.is_path_dirty(Path::new("/work/repo")));
        assert!(!repo.is_path_dirty(Path::new("/work/repo/models/other")));
        assert!(!repo.is_path_dirty(Path::new("/elsewhere/artifact")));
    }

    #[test]
    fn modified_tracked_file_is_dirty() {
        let mut repo = state("/work/repo");
        repo.changed = vec![PathBuf::from("train.py")];
        assert!(repo.is_path_dirty(Path::new("/work/repo/train.py")));
        assert!(!repo.is_path_dirty(Path::new("/work/repo/artifact")));
    }

    #[test]
    fn status_parser_splits_untracked_and_skips_rename_sources() {
        let out = " M train.py\0R  new.py\0old.py\0?? artifact/score.py\0!! build/\0";
        let (changed, untracked) = parse_status(out);
        assert_eq!(changed, vec![PathBuf::from("train.py"), PathBuf::from("new.py")]);
        assert_eq!(untracked, vec![PathBuf::from("artifact/score.py")]);
    }

    #[test]
    fn remotes_are_parsed_from_config_lines() {
        let remotes = parse_remotes(
            "remote.origin.url git@example.com:a/b.git\nremote.fork.url https://x/y.git\n",
        );
        assert_eq!(remotes.len(), 2);
        assert_eq!(remotes[0].name, "origin");
        assert_eq!(remotes[1].url, "https://x/y.git");
    }

    #[test]
    fn missing_repository_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        match find_repository_root(dir.path()) {
            Err(ArtifactError::NoRepository(_)) => {}
            Ok(root) => assert!(root.join(".git").exists()),
            Err(other) => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn repository_root_is_found_from_a_nested_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();
        let root = find_repository_root(&nested).unwrap();
        assert_eq!(root, fs::absolute(dir.path()).unwrap());
    }
}
