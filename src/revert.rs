use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use camino::Utf8Path;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::applier::ChangedFiles;
use crate::process::{CommandSpec, ProcessRunner};

/// Directories never descended into by the backup sweep.
const SWEEP_SKIP_DIRS: &[&str] = &[".git", ".hg", ".svn"];

#[derive(Error, Debug)]
pub enum RevertError {
    #[error("git checkout failed\n   stdout: {stdout}\n   stderr: {stderr}")]
    CheckoutFailed { stdout: String, stderr: String },

    #[error("git checkout timed out after {}s", .0.as_secs())]
    TimedOut(Duration),

    #[error("Error reverting changes: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct RevertReport {
    pub restored: Vec<String>,
    pub removed_backups: Vec<PathBuf>,
}

/// `<file><suffix>` next to a restored file.
pub fn backup_path(repo_root: &Path, file: &Utf8Path, suffix: &str) -> PathBuf {
    repo_root.join(format!("{file}{suffix}"))
}

pub struct Reverter<'a> {
    runner: &'a dyn ProcessRunner,
    repo_root: PathBuf,
    backup_suffix: String,
    timeout: Duration,
}

impl<'a> Reverter<'a> {
    pub fn new(
        runner: &'a dyn ProcessRunner,
        repo_root: impl Into<PathBuf>,
        backup_suffix: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            runner,
            repo_root: repo_root.into(),
            backup_suffix: backup_suffix.into(),
            timeout,
        }
    }

    /// Restore exactly the files in `changed` from HEAD and drop their backups.
    /// The set is cleared once the checkout has been issued, whatever its
    /// result, so a second call is a no-op.
    pub fn revert(&self, changed: &mut ChangedFiles) -> Result<RevertReport, RevertError> {
        if changed.is_empty() {
            return Ok(RevertReport::default());
        }

        let restored: Vec<String> = changed.iter().map(|p| p.to_string()).collect();
        let mut args = vec!["checkout".to_string(), "HEAD".to_string(), "--".to_string()];
        args.extend(restored.iter().cloned());
        let cmd = CommandSpec::new("git", args);

        debug!(files = %changed.display(), "Reverting files");
        let result = self.runner.run(&cmd, &self.repo_root, self.timeout);

        let mut removed_backups = Vec::new();
        for file in changed.iter() {
            let bak = backup_path(&self.repo_root, file, &self.backup_suffix);
            if bak.is_file() {
                match fs::remove_file(&bak) {
                    Ok(()) => {
                        debug!(path = %bak.display(), "Removed backup file");
                        removed_backups.push(bak);
                    }
                    Err(e) => warn!(path = %bak.display(), error = %e, "Could not remove backup file"),
                }
            }
        }
        changed.clear();

        let out = result?;
        if out.timed_out {
            return Err(RevertError::TimedOut(self.timeout));
        }
        if !out.success() {
            return Err(RevertError::CheckoutFailed {
                stdout: out.stdout,
                stderr: out.stderr,
            });
        }
        Ok(RevertReport {
            restored,
            removed_backups,
        })
    }

    /// Delete every leftover backup file under the repository root.
    pub fn sweep_backup_files(&self) -> Vec<PathBuf> {
        let mut removed = Vec::new();
        sweep_dir(&self.repo_root, &self.backup_suffix, &mut removed);
        for path in &removed {
            let shown = path.strip_prefix(&self.repo_root).unwrap_or(path);
            info!(path = %shown.display(), "Cleaned up backup file");
        }
        removed
    }
}

fn sweep_dir(dir: &Path, suffix: &str, removed: &mut Vec<PathBuf>) {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Could not scan for backup files");
            return;
        }
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let Ok(ft) = entry.file_type() else { continue };
        if ft.is_dir() {
            if !SWEEP_SKIP_DIRS.contains(&&*name) {
                sweep_dir(&entry.path(), suffix, removed);
            }
        } else if ft.is_file() && name.ends_with(suffix) {
            let path = entry.path();
            match fs::remove_file(&path) {
                Ok(()) => removed.push(path),
                Err(e) => warn!(path = %path.display(), error = %e, "Could not remove backup file"),
            }
        }
    }
}
