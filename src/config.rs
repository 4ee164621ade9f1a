use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::ValueEnum;
use serde::Serialize;

use crate::error::DriverError;

/// What to do when restoring a mutated file fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RevertFailurePolicy {
    /// Stop the run; later verdicts would be computed on a dirty tree.
    #[default]
    Abort,
    /// Log the failure and keep going.
    Continue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub apply: Duration,
    pub revert: Duration,
    pub tests: Duration,
    pub coverage: Duration,
    pub summary: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            apply: Duration::from_secs(30),
            revert: Duration::from_secs(30),
            tests: Duration::from_secs(120),
            coverage: Duration::from_secs(240),
            summary: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub repo_root: PathBuf,
    pub mutations_dir: PathBuf,
    pub corpus_file: PathBuf,
    /// File that must exist at `repo_root` for the run to start.
    pub root_marker: String,
    pub test_cmd: String,
    /// `{profile}` is replaced with `coverage_profile`.
    pub coverage_cmd: String,
    pub coverage_summary_cmd: String,
    pub coverage_profile: PathBuf,
    pub skip_coverage: bool,
    /// Maximum number of characters of test output kept on a record.
    pub output_cap: usize,
    pub backup_suffix: String,
    pub on_revert_failure: RevertFailurePolicy,
    pub timeouts: Timeouts,
}

pub const DEFAULT_CORPUS_NAME: &str = "mutations.jsonl";
pub const DEFAULT_OUTPUT_CAP: usize = 500;

impl Default for DriverConfig {
    fn default() -> Self {
        Self::for_mutations_dir("mutations")
    }
}

impl DriverConfig {
    /// Config rooted at the parent of `mutations_dir`, with Go tooling defaults.
    pub fn for_mutations_dir(mutations_dir: impl Into<PathBuf>) -> Self {
        let mutations_dir = mutations_dir.into();
        let repo_root = match mutations_dir.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Self {
            corpus_file: mutations_dir.join(DEFAULT_CORPUS_NAME),
            coverage_profile: repo_root.join("coverage.out"),
            repo_root,
            mutations_dir,
            root_marker: "go.mod".into(),
            test_cmd: "go test ./...".into(),
            coverage_cmd: "go test -covermode=count -coverprofile={profile} ./...".into(),
            coverage_summary_cmd: "go tool cover -func={profile}".into(),
            skip_coverage: false,
            output_cap: DEFAULT_OUTPUT_CAP,
            backup_suffix: ".bak".into(),
            on_revert_failure: RevertFailurePolicy::default(),
            timeouts: Timeouts::default(),
        }
    }

    pub fn with_repo_root(mut self, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        if let Ok(rel) = self.coverage_profile.strip_prefix(&self.repo_root) {
            self.coverage_profile = root.join(rel);
        }
        self.repo_root = root;
        self
    }

    /// Absolute path of a diff artifact named in the corpus.
    pub fn diff_path(&self, mutation_file: &str) -> PathBuf {
        self.mutations_dir.join(mutation_file)
    }

    /// Setup check: the repository root must carry the marker file.
    pub fn validate(&self) -> Result<(), DriverError> {
        if !self.mutations_dir.is_dir() {
            return Err(DriverError::MissingMutationsDir(self.mutations_dir.clone()));
        }
        if !self.repo_root.join(&self.root_marker).exists() {
            return Err(DriverError::NotARepo {
                root: self.repo_root.clone(),
                marker: self.root_marker.clone(),
            });
        }
        if self.test_cmd.trim().is_empty() {
            return Err(DriverError::Config("test command is empty".into()));
        }
        if self.backup_suffix.is_empty() {
            return Err(DriverError::Config("backup suffix is empty".into()));
        }
        Ok(())
    }
}

/// Make `path` absolute against the current directory.
pub fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn repo_root_defaults_to_parent_of_mutations_dir() {
        let cfg = DriverConfig::for_mutations_dir("/work/fair/mutations");
        assert_eq!(cfg.repo_root, Path::new("/work/fair"));
        assert_eq!(cfg.corpus_file, Path::new("/work/fair/mutations/mutations.jsonl"));
        assert_eq!(cfg.coverage_profile, Path::new("/work/fair/coverage.out"));
    }

    #[test]
    fn bare_mutations_dir_uses_current_dir_as_root() {
        let cfg = DriverConfig::default();
        assert_eq!(cfg.repo_root, Path::new("."));
        assert_eq!(cfg.output_cap, 500);
        assert_eq!(cfg.on_revert_failure, RevertFailurePolicy::Abort);
        assert_eq!(cfg.timeouts.tests, Duration::from_secs(120));
    }

    #[test]
    fn with_repo_root_moves_default_profile() {
        let cfg = DriverConfig::for_mutations_dir("/a/mutations").with_repo_root("/b");
        assert_eq!(cfg.repo_root, Path::new("/b"));
        assert_eq!(cfg.coverage_profile, Path::new("/b/coverage.out"));
    }

    #[test]
    fn validate_requires_marker() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("mutations")).unwrap();
        let cfg = DriverConfig::for_mutations_dir(dir.path().join("mutations"));
        assert!(matches!(cfg.validate(), Err(DriverError::NotARepo { .. })));

        std::fs::write(dir.path().join("go.mod"), "module x\n").unwrap();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_requires_mutations_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("go.mod"), "module x\n").unwrap();
        let cfg = DriverConfig::for_mutations_dir(dir.path().join("missing"));
        assert!(matches!(cfg.validate(), Err(DriverError::MissingMutationsDir(_))));
    }

    #[test]
    fn diff_path_is_relative_to_mutations_dir() {
        let cfg = DriverConfig::for_mutations_dir("/r/mutations");
        assert_eq!(cfg.diff_path("m001.diff"), Path::new("/r/mutations/m001.diff"));
    }
}
