use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use crate::process::{CommandSpec, ProcessRunner};

const OLD_FILE_HEADER: &str = "--- a/";

/// Repository-relative paths a diff declares it modifies, in header order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangedFiles {
    paths: Vec<Utf8PathBuf>,
}

impl ChangedFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<Utf8PathBuf>) {
        let path = path.into();
        if !self.paths.contains(&path) {
            self.paths.push(path);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Utf8Path> {
        self.paths.iter().map(Utf8PathBuf::as_path)
    }

    pub fn clear(&mut self) {
        self.paths.clear();
    }

    pub fn display(&self) -> String {
        self.paths
            .iter()
            .map(|p| p.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl<P: Into<Utf8PathBuf>> FromIterator<P> for ChangedFiles {
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self {
        let mut files = ChangedFiles::new();
        for p in iter {
            files.insert(p);
        }
        files
    }
}

/// A header path must stay inside the repository: relative, no `..`.
fn is_repo_relative(path: &Utf8Path) -> bool {
    path.components()
        .all(|c| matches!(c, Utf8Component::Normal(_) | Utf8Component::CurDir))
}

/// Collect the `--- a/<path>` headers of a unified diff. Headers pointing
/// outside the repository are dropped.
pub fn parse_changed_files(diff: &str) -> ChangedFiles {
    diff.lines()
        .filter_map(|line| line.strip_prefix(OLD_FILE_HEADER))
        .map(str::trim)
        .filter(|path| !path.is_empty())
        .filter(|path| {
            let ok = is_repo_relative(Utf8Path::new(path));
            if !ok {
                warn!(path = %path, "Ignoring diff header outside the repository");
            }
            ok
        })
        .collect()
}

pub fn changed_files_from_diff(diff_path: &Path) -> io::Result<ChangedFiles> {
    let bytes = fs::read(diff_path)?;
    Ok(parse_changed_files(&String::from_utf8_lossy(&bytes)))
}

#[derive(Error, Debug)]
pub enum ApplyError {
    #[error("Diff file not found: {}", .0.display())]
    MissingDiff(PathBuf),

    #[error("Patch does not apply cleanly\n   stdout: {stdout}\n   stderr: {stderr}")]
    Rejected { stdout: String, stderr: String },

    #[error("Timeout applying diff after {}s", .0.as_secs())]
    TimedOut(Duration),

    #[error("Error applying diff: {0}")]
    Io(#[from] io::Error),
}

/// A failed apply still reports what the diff would have touched.
#[derive(Debug)]
pub struct ApplyFailure {
    pub changed: ChangedFiles,
    pub error: ApplyError,
}

impl ApplyFailure {
    /// A killed `git apply` may have written some of its files.
    pub fn may_have_touched_tree(&self) -> bool {
        matches!(self.error, ApplyError::TimedOut(_))
    }
}

pub struct DiffApplier<'a> {
    runner: &'a dyn ProcessRunner,
    repo_root: PathBuf,
    timeout: Duration,
}

impl<'a> DiffApplier<'a> {
    pub fn new(runner: &'a dyn ProcessRunner, repo_root: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            runner,
            repo_root: repo_root.into(),
            timeout,
        }
    }

    /// Apply `diff_path` against the repository root. On success the returned
    /// set must be handed to the matching revert.
    pub fn apply(&self, diff_path: &Path) -> Result<ChangedFiles, ApplyFailure> {
        let fail = |changed: ChangedFiles, error: ApplyError| ApplyFailure { changed, error };

        if !diff_path.is_file() {
            return Err(fail(
                ChangedFiles::new(),
                ApplyError::MissingDiff(diff_path.to_path_buf()),
            ));
        }

        let changed = match changed_files_from_diff(diff_path) {
            Ok(c) => c,
            Err(e) => {
                warn!(diff = %diff_path.display(), error = %e, "Could not parse diff headers");
                return Err(fail(ChangedFiles::new(), e.into()));
            }
        };

        let abs_diff = if diff_path.is_absolute() {
            diff_path.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(diff_path))
                .unwrap_or_else(|_| diff_path.to_path_buf())
        };
        let cmd = CommandSpec::new("git", ["apply".to_string(), abs_diff.to_string_lossy().into_owned()]);

        match self.runner.run(&cmd, &self.repo_root, self.timeout) {
            Ok(out) if out.timed_out => Err(fail(changed, ApplyError::TimedOut(self.timeout))),
            Ok(out) if !out.success() => Err(fail(
                changed,
                ApplyError::Rejected {
                    stdout: out.stdout,
                    stderr: out.stderr,
                },
            )),
            Ok(_) => {
                debug!(diff = %diff_path.display(), files = %changed.display(), "Applied diff");
                Ok(changed)
            }
            Err(e) => Err(fail(changed, e.into())),
        }
    }
}
