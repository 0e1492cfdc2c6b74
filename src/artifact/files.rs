//! Enumeration of the artifact tree with `.model-ignore` filtering.

use std::fs;
use std::path::Path;

use regex::Regex;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::common::error::{ArtifactError, ArtifactResult};
use crate::common::fs::remove_dir_if_exists;

/// Bytecode cache directory left behind by loading the score module.
pub const BYTECODE_CACHE_DIR: &str = "__pycache__";
/// File holding ignore patterns, one per line.
pub const MODEL_IGNORE_FILE_NAME: &str = ".model-ignore";
/// Width of the file summary recorded in metadata.
pub const FILE_SUMMARY_WIDTH: usize = 255;

/// A compiled `.model-ignore` pattern.
#[derive(Clone, Debug)]
pub struct IgnorePattern {
    raw: String,
    regex: Regex,
}

impl IgnorePattern {
    /// Compile one glob line. A trailing `/` matches everything below the
    /// directory. The pattern may match at any `/` boundary and must run to
    /// the end of the path.
    pub fn new(line: &str) -> ArtifactResult<Self> {
        let raw = line.trim().to_string();
        let glob = match raw.strip_suffix('/') {
            Some(dir) => format!("{dir}*"),
            None => raw.clone(),
        };
        let source = format!("(?s)/{}$", glob_to_regex(&glob));
        let regex = Regex::new(&source).map_err(|e| {
            ArtifactError::InvalidArgument(format!("ignore pattern `{raw}`: {e}"))
        })?;
        Ok(Self { raw, regex })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// `rel` is a `/` separated path relative to the artifact root.
    pub fn matches(&self, rel: &str) -> bool {
        self.regex.is_match(&format!("/{rel}"))
    }
}

/// Regex matching a whole string against `glob`.
pub(crate) fn glob_matcher(glob: &str) -> ArtifactResult<Regex> {
    Regex::new(&format!("(?s)^{}$", glob_to_regex(glob)))
        .map_err(|e| ArtifactError::InvalidArgument(format!("glob `{glob}`: {e}")))
}

/// Translate shell glob syntax: `*` matches any run of characters including
/// `/`, `?` one character, `[...]` a class with `!` for negation.
fn glob_to_regex(glob: &str) -> String {
    let chars: Vec<char> = glob.chars().collect();
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => match class_end(&chars, i) {
                Some(end) => {
                    let mut body: String = chars[i + 1..end].iter().collect();
                    let negated = body.starts_with('!');
                    if negated {
                        body.remove(0);
                    }
                    let mut body = body.replace('\\', r"\\").replace('[', r"\[");
                    // Only `!` negates; a leading `^` is a literal.
                    if body.starts_with('^') {
                        body.insert(0, '\\');
                    }
                    out.push('[');
                    if negated {
                        out.push('^');
                    }
                    out.push_str(&body);
                    out.push(']');
                    i = end;
                }
                None => out.push_str(r"\["),
            },
            c => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }
    out
}

/// Index of the `]` closing the class opened at `start`.
fn class_end(chars: &[char], start: usize) -> Option<usize> {
    let mut j = start + 1;
    if chars.get(j) == Some(&'!') {
        j += 1;
    }
    // A leading `]` is part of the class.
    if chars.get(j) == Some(&']') {
        j += 1;
    }
    (j..chars.len()).find(|&k| chars[k] == ']')
}

/// Patterns from `<dir>/.model-ignore`; `#` comments and blank lines are skipped.
pub fn read_ignore_patterns(dir: &Path) -> ArtifactResult<Vec<IgnorePattern>> {
    let path = dir.join(MODEL_IGNORE_FILE_NAME);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(ArtifactError::io(&path, e)),
    };
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(IgnorePattern::new)
        .collect()
}

/// Files and directories under `dir`, relative to it, in name order, minus
/// anything matched by `.model-ignore`.
pub fn list_files(dir: &Path) -> ArtifactResult<Vec<String>> {
    let patterns = read_ignore_patterns(dir)?;
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry in the artifact directory");
                continue;
            }
        };
        let Ok(rel) = entry.path().strip_prefix(dir) else {
            continue;
        };
        let rel = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if let Some(pattern) = patterns.iter().find(|p| p.matches(&rel)) {
            debug!(path = %rel, pattern = pattern.as_str(), "ignored");
            continue;
        }
        files.push(rel);
    }
    Ok(files)
}

/// Remove every bytecode cache directory under `dir`. Returns how many were removed.
pub fn purge_cache(dir: &Path) -> ArtifactResult<usize> {
    let caches: Vec<_> = WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_dir() && e.file_name() == BYTECODE_CACHE_DIR)
        .map(|e| e.into_path())
        .collect();
    let mut removed = 0;
    for cache in caches {
        if remove_dir_if_exists(&cache)? {
            debug!(path = %cache.display(), "bytecode cache removed");
            removed += 1;
        }
    }
    Ok(removed)
}

/// Collapse whitespace and cut at a word boundary so the result, including the
/// `...` placeholder, fits in `width` characters.
pub fn shorten(text: &str, width: usize) -> String {
    const PLACEHOLDER: &str = "...";
    let words: Vec<&str> = text.split_whitespace().collect();
    let collapsed = words.join(" ");
    if collapsed.chars().count() <= width {
        return collapsed;
    }
    let mut out = String::new();
    for word in words {
        let extra = usize::from(!out.is_empty()) + word.chars().count();
        if out.chars().count() + extra + PLACEHOLDER.len() > width {
            break;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out.push_str(PLACEHOLDER);
    out
}

/// Comma separated file list sized for the `ModelArtifacts` metadata entry.
pub fn files_summary(files: &[String]) -> String {
    shorten(&files.join(", "), FILE_SUMMARY_WIDTH)
}
