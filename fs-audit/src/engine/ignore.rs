//! Path ignore rules applied before anything reaches the event store

use std::path::{Component, Path, PathBuf};

/// Directory segments that never produce audit events
pub const IGNORED_SEGMENTS: &[&str] = &[".git", "venv", ".venv", "__pycache__"];

/// Suffixes ignored when nothing else is configured
pub const DEFAULT_IGNORED_SUFFIXES: &str = ".swp,.tmp,~,.log";

/// SQLite side files that live next to the database
const DATABASE_SIDE_FILES: &[&str] = &["-journal", "-wal", "-shm"];

/// Decides which filesystem paths are noise
#[derive(Debug, Clone)]
pub struct IgnorePolicy {
    database_name: Option<String>,
    reports_dir: Vec<String>,
    reports_absolute: bool,
    suffixes: Vec<String>,
}

impl IgnorePolicy {
    /// Build a policy that skips the audit database, the reports directory and
    /// the given suffixes
    pub fn new(database: &Path, reports_dir: &Path, suffixes: Vec<String>) -> Self {
        let database_name = database
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());

        let normalized = normalize(&anchor(reports_dir).to_string_lossy());
        let reports_absolute = normalized.starts_with('/');

        Self {
            database_name,
            reports_dir: segments(&normalized).map(str::to_string).collect(),
            reports_absolute,
            suffixes: suffixes.into_iter().filter(|s| !s.is_empty()).collect(),
        }
    }

    /// Split a comma separated suffix list, dropping blanks
    pub fn parse_suffixes(list: &str) -> Vec<String> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn suffixes(&self) -> &[String] {
        &self.suffixes
    }

    /// Whether an event for `path` should be dropped
    pub fn should_ignore(&self, path: &str) -> bool {
        let path = normalize(path);
        let parts: Vec<&str> = segments(&path).collect();

        if parts.iter().any(|part| IGNORED_SEGMENTS.contains(part)) {
            return true;
        }

        if let (Some(name), Some(last)) = (&self.database_name, parts.last()) {
            let is_database = *last == name.as_str()
                || DATABASE_SIDE_FILES
                    .iter()
                    .any(|side| last.strip_suffix(side) == Some(name.as_str()));
            if is_database {
                return true;
            }
        }

        if self.under_reports_dir(&path, &parts) {
            return true;
        }

        self.suffixes.iter().any(|suffix| path.ends_with(suffix.as_str()))
    }

    fn under_reports_dir(&self, path: &str, parts: &[&str]) -> bool {
        if self.reports_dir.is_empty() {
            return false;
        }
        // Only directory segments count; a file named "reports" is not the directory.
        let dirs = &parts[..parts.len().saturating_sub(1)];

        if self.reports_absolute {
            let prefix = format!("/{}/", self.reports_dir.join("/"));
            return path.starts_with(&prefix);
        }

        dirs.windows(self.reports_dir.len())
            .any(|window| window.iter().zip(&self.reports_dir).all(|(a, b)| *a == b.as_str()))
    }
}

/// Forward-slash form of a path
pub fn normalize(path: &str) -> String {
    path.replace('\\', "/")
}

/// Resolve a relative directory that climbs with `..` against the current
/// directory. Other paths are kept as given and match anywhere in the tree.
fn anchor(dir: &Path) -> PathBuf {
    let climbs = dir.components().any(|c| matches!(c, Component::ParentDir));
    if dir.is_absolute() || !climbs {
        return dir.to_path_buf();
    }
    let Ok(cwd) = std::env::current_dir() else {
        return dir.to_path_buf();
    };

    let mut resolved = PathBuf::new();
    for component in cwd.join(dir).components() {
        match component {
            Component::ParentDir => {
                resolved.pop();
            }
            Component::CurDir => {}
            other => resolved.push(other),
        }
    }
    resolved
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty() && *s != ".")
}
