//! One mutation's lifecycle: apply, test, classify, revert.
//!
//! The working tree is a single shared resource. Once a diff is on disk it is
//! owned by an [`AppliedDiff`] guard, which reverts on every exit path: the
//! normal one, an early return, or unwinding out of the oracle.

use tracing::{debug, warn};

use crate::applier::{ApplyError, ChangedFiles, DiffApplier};
use crate::config::DriverConfig;
use crate::corpus::{self, MutationRecord};
use crate::oracle::Oracle;
use crate::process::ProcessRunner;
use crate::revert::{RevertError, RevertReport, Reverter};

pub const APPLY_FAILED_OUTPUT: &str = "Failed to apply diff";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Pending,
    Applying,
    /// Tests ran against the mutated tree; the diff is still on disk.
    Evaluated,
    /// The diff never made it onto disk. Terminal.
    Unapplicable,
    /// The diff was applied and a revert has been issued. Terminal.
    Reverted,
}

#[derive(Debug)]
pub enum Outcome {
    Unapplicable(ApplyError),
    Evaluated {
        caught: bool,
        revert: Result<RevertReport, RevertError>,
    },
}

#[derive(Debug)]
pub struct Evaluation {
    pub record: MutationRecord,
    pub outcome: Outcome,
}

impl Evaluation {
    pub fn revert_error(&self) -> Option<&RevertError> {
        match &self.outcome {
            Outcome::Evaluated { revert: Err(e), .. } => Some(e),
            _ => None,
        }
    }
}

/// Scoped ownership of an applied diff. Dropping it without calling
/// [`AppliedDiff::revert`] performs an emergency revert.
pub struct AppliedDiff<'s, 'a> {
    reverter: &'s Reverter<'a>,
    tracked: &'s mut ChangedFiles,
}

impl<'s, 'a> AppliedDiff<'s, 'a> {
    pub fn new(reverter: &'s Reverter<'a>, tracked: &'s mut ChangedFiles) -> Self {
        Self { reverter, tracked }
    }

    pub fn files(&self) -> &ChangedFiles {
        self.tracked
    }

    pub fn revert(self) -> Result<RevertReport, RevertError> {
        self.reverter.revert(&mut *self.tracked)
    }
}

impl Drop for AppliedDiff<'_, '_> {
    fn drop(&mut self) {
        if self.tracked.is_empty() {
            return;
        }
        warn!(files = %self.tracked.display(), "Emergency revert of applied diff");
        if let Err(e) = self.reverter.revert(&mut *self.tracked) {
            warn!(error = %e, "Emergency revert failed");
        }
    }
}

pub struct MutationSession<'a> {
    config: &'a DriverConfig,
    applier: DiffApplier<'a>,
    reverter: Reverter<'a>,
    oracle: Oracle<'a>,
    tracked: ChangedFiles,
    state: SessionState,
}

impl<'a> MutationSession<'a> {
    pub fn new(runner: &'a dyn ProcessRunner, config: &'a DriverConfig) -> Self {
        Self {
            config,
            applier: DiffApplier::new(runner, &config.repo_root, config.timeouts.apply),
            reverter: Reverter::new(
                runner,
                &config.repo_root,
                &config.backup_suffix,
                config.timeouts.revert,
            ),
            oracle: Oracle::new(runner, config),
            tracked: ChangedFiles::new(),
            state: SessionState::Pending,
        }
    }

    pub fn oracle(&self) -> &Oracle<'a> {
        &self.oracle
    }

    pub fn reverter(&self) -> &Reverter<'a> {
        &self.reverter
    }

    /// Files currently applied to the tree. Empty between mutations.
    pub fn pending_changes(&self) -> &ChangedFiles {
        &self.tracked
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Revert whatever is still tracked. No-op when nothing is.
    pub fn revert_pending(&mut self) -> Result<RevertReport, RevertError> {
        self.reverter.revert(&mut self.tracked)
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = ?self.state, to = ?next, "Session state");
        self.state = next;
    }

    pub fn evaluate(&mut self, mut record: MutationRecord) -> Evaluation {
        self.state = SessionState::Pending;
        if !self.tracked.is_empty() {
            warn!(files = %self.tracked.display(), "Stale changes tracked before apply");
            if let Err(e) = self.revert_pending() {
                warn!(error = %e, "Could not revert stale changes");
            }
        }

        self.transition(SessionState::Applying);
        let diff_path = self.config.diff_path(record.mutation_file());
        let changed = match self.applier.apply(&diff_path) {
            Ok(changed) => changed,
            Err(mut failure) => {
                warn!(mutation = record.mutation_file(), error = %failure.error, "Failed to apply diff");
                if failure.may_have_touched_tree() {
                    if let Err(e) = self.reverter.revert(&mut failure.changed) {
                        warn!(error = %e, "Cleanup after failed apply did not succeed");
                    }
                }
                record.record_outcome(
                    corpus::now_timestamp(),
                    None,
                    APPLY_FAILED_OUTPUT.to_string(),
                );
                self.transition(SessionState::Unapplicable);
                return Evaluation {
                    record,
                    outcome: Outcome::Unapplicable(failure.error),
                };
            }
        };

        self.tracked = changed;
        let guard = AppliedDiff::new(&self.reverter, &mut self.tracked);
        let run = self.oracle.run_tests();
        // A fault is caught exactly when the suite goes red.
        let caught = !run.passed;
        self.state = SessionState::Evaluated;
        debug!(mutation = record.mutation_file(), files = %guard.files().display(), caught, "Evaluated");
        let revert = guard.revert();
        self.transition(SessionState::Reverted);

        record.record_outcome(
            corpus::now_timestamp(),
            Some(caught),
            corpus::truncate_output(&run.output, self.config.output_cap),
        );
        Evaluation {
            record,
            outcome: Outcome::Evaluated { caught, revert },
        }
    }
}
