use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tracing::{info, warn};

use crate::config::{DriverConfig, RevertFailurePolicy};
use crate::corpus::{self, MutationRecord};
use crate::error::DriverError;
use crate::oracle::CoverageReport;
use crate::output;
use crate::process::ProcessRunner;
use crate::session::{Evaluation, MutationSession, Outcome};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub total: usize,
    /// Records with a non-null verdict.
    pub testable: usize,
    pub caught: usize,
}

impl RunStats {
    pub fn from_records(records: &[MutationRecord]) -> Self {
        let mut stats = RunStats::default();
        for record in records {
            stats.push(record);
        }
        stats
    }

    pub fn push(&mut self, record: &MutationRecord) {
        self.total += 1;
        if let Some(caught) = record.caught_by_test() {
            self.testable += 1;
            if caught {
                self.caught += 1;
            }
        }
    }

    pub fn missed(&self) -> usize {
        self.testable - self.caught
    }

    pub fn untestable(&self) -> usize {
        self.total - self.testable
    }

    /// Caught over testable, in percent. `None` when nothing was testable.
    pub fn score(&self) -> Option<f64> {
        (self.testable > 0).then(|| self.caught as f64 / self.testable as f64 * 100.0)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    #[serde(flatten)]
    pub stats: RunStats,
    pub missed: usize,
    pub untestable: usize,
    pub score: Option<f64>,
    pub coverage: Option<CoverageReport>,
}

impl RunReport {
    pub fn new(stats: RunStats, coverage: Option<CoverageReport>) -> Self {
        Self {
            missed: stats.missed(),
            untestable: stats.untestable(),
            score: stats.score(),
            stats,
            coverage,
        }
    }
}

pub struct RunController<'a> {
    config: &'a DriverConfig,
    runner: &'a dyn ProcessRunner,
    interrupt: Option<Arc<AtomicBool>>,
    progress: bool,
}

impl<'a> RunController<'a> {
    pub fn new(config: &'a DriverConfig, runner: &'a dyn ProcessRunner) -> Self {
        Self {
            config,
            runner,
            interrupt: None,
            progress: true,
        }
    }

    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    /// Disable human-readable progress on stdout.
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    fn interrupted(&self) -> bool {
        self.interrupt
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    fn check_interrupt(&self) -> Result<(), DriverError> {
        if self.interrupted() {
            Err(DriverError::Interrupted)
        } else {
            Ok(())
        }
    }

    pub fn run(&self) -> Result<RunReport, DriverError> {
        let config = self.config;
        config.validate()?;

        let mut session = MutationSession::new(self.runner, config);
        session.reverter().sweep_backup_files();

        if self.progress {
            output::print_run_header(&config.repo_root, &config.corpus_file);
            output::print_baseline_start();
        }

        if let Err(e) = session.revert_pending() {
            warn!(error = %e, "Could not revert stray changes before baseline");
        }
        let baseline = session.oracle().run_tests();
        self.check_interrupt()?;
        if !baseline.passed {
            if self.progress {
                output::print_baseline_failed(&baseline.output);
            }
            return Err(DriverError::BaselineFailed {
                output: baseline.output,
            });
        }
        if self.progress {
            output::print_success("Baseline tests passed. Ready for mutation testing.");
        }

        let corpus_exists = config.corpus_file.is_file();
        let records = corpus::load_corpus(&config.corpus_file)?;
        let total = records.len();
        info!(count = total, "Loaded mutations");
        if self.progress {
            println!("Found {} mutations to test", total);
        }

        let mut stats = RunStats::default();
        let mut tested = Vec::with_capacity(total);
        let mut pending = records.into_iter();
        let mut index = 0;
        while let Some(record) = pending.next() {
            self.check_interrupt()?;
            index += 1;
            if self.progress {
                output::print_mutation_start(index, total, &record);
            }

            let evaluation = session.evaluate(record);
            // The verdict of a run cut short by Ctrl+C is meaningless.
            self.check_interrupt()?;

            if self.progress {
                output::print_evaluation(&evaluation);
            }
            stats.push(&evaluation.record);

            let Evaluation { record, outcome } = evaluation;
            if let Outcome::Evaluated { revert: Err(source), .. } = outcome {
                warn!(mutation = record.mutation_file(), error = %source, "Revert failed");
                if config.on_revert_failure == RevertFailurePolicy::Abort {
                    let mutation = record.mutation_file().to_string();
                    tested.push(record);
                    tested.extend(pending);
                    corpus::save_corpus(&config.corpus_file, &tested)?;
                    return Err(DriverError::RevertFailed { mutation, source });
                }
            }
            tested.push(record);
        }

        if corpus_exists {
            corpus::save_corpus(&config.corpus_file, &tested)?;
        }

        if self.progress {
            output::print_stats(&stats);
            if corpus_exists {
                output::print_saved(&config.corpus_file);
            }
        }

        let coverage = if config.skip_coverage {
            None
        } else {
            if let Err(e) = session.revert_pending() {
                warn!(error = %e, "Could not revert residual changes before coverage");
            }
            let report = session.oracle().compute_line_coverage();
            self.check_interrupt()?;
            if self.progress {
                output::print_coverage(&report);
            }
            Some(report)
        };

        Ok(RunReport::new(stats, coverage))
    }
}

/// Score the verdicts already stored in the corpus without running anything.
pub fn status(config: &DriverConfig) -> Result<RunReport, DriverError> {
    let records = corpus::load_corpus(&config.corpus_file)?;
    Ok(RunReport::new(RunStats::from_records(&records), None))
}
