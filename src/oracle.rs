use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::DriverConfig;
use crate::process::{CommandSpec, ProcessRunner, parse_command};

static TOTAL_COVERAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^total:\s*\(statements\)\s*([0-9.]+)%$").expect("valid coverage regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRun {
    pub passed: bool,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoverageReport {
    pub ok: bool,
    /// Aggregate statement coverage, e.g. `"67.5%"`. Empty when unavailable.
    pub total_percent: String,
    pub detail: String,
}

impl CoverageReport {
    fn failed(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            total_percent: String::new(),
            detail: detail.into(),
        }
    }
}

/// Pull the `total: (statements) NN.N%` figure out of a coverage summary.
pub fn parse_total_coverage(summary: &str) -> Option<String> {
    summary.lines().find_map(|line| {
        TOTAL_COVERAGE
            .captures(line.trim())
            .map(|caps| format!("{}%", &caps[1]))
    })
}

/// Runs the project's test suite as a pass/fail oracle.
pub struct Oracle<'a> {
    runner: &'a dyn ProcessRunner,
    repo_root: PathBuf,
    test_cmd: String,
    coverage_cmd: String,
    coverage_summary_cmd: String,
    coverage_profile: PathBuf,
    test_timeout: Duration,
    coverage_timeout: Duration,
    summary_timeout: Duration,
}

impl<'a> Oracle<'a> {
    pub fn new(runner: &'a dyn ProcessRunner, config: &DriverConfig) -> Self {
        Self {
            runner,
            repo_root: config.repo_root.clone(),
            test_cmd: config.test_cmd.clone(),
            coverage_cmd: config.coverage_cmd.clone(),
            coverage_summary_cmd: config.coverage_summary_cmd.clone(),
            coverage_profile: config.coverage_profile.clone(),
            test_timeout: config.timeouts.tests,
            coverage_timeout: config.timeouts.coverage,
            summary_timeout: config.timeouts.summary,
        }
    }

    fn command(&self, line: &str, with_profile: bool) -> std::io::Result<CommandSpec> {
        let profile = with_profile.then_some(self.coverage_profile.as_path());
        Ok(parse_command(line, profile)?.interruptible())
    }

    /// Run the whole suite. Timeouts and spawn failures count as a failed run.
    pub fn run_tests(&self) -> TestRun {
        let cmd = match self.command(&self.test_cmd, false) {
            Ok(c) => c,
            Err(e) => {
                return TestRun {
                    passed: false,
                    output: format!("Error running tests: {e}"),
                };
            }
        };

        match self.runner.run(&cmd, &self.repo_root, self.test_timeout) {
            Ok(out) if out.timed_out => TestRun {
                passed: false,
                output: format!(
                    "Test execution timed out ({}s)",
                    self.test_timeout.as_secs()
                ),
            },
            Ok(out) => {
                debug!(exit_code = out.exit_code.unwrap_or(-1), "Test run finished");
                TestRun {
                    passed: out.success(),
                    output: out.combined(),
                }
            }
            Err(e) => {
                warn!(error = %e, "Could not run tests");
                TestRun {
                    passed: false,
                    output: format!("Error running tests: {e}"),
                }
            }
        }
    }

    /// Generate a coverage profile, summarise it and extract the total.
    pub fn compute_line_coverage(&self) -> CoverageReport {
        let (generate, summarize) = match (
            self.command(&self.coverage_cmd, true),
            self.command(&self.coverage_summary_cmd, true),
        ) {
            (Ok(g), Ok(s)) => (g, s),
            (Err(e), _) | (_, Err(e)) => return CoverageReport::failed(format!("Coverage error: {e}")),
        };

        let profile = match self.runner.run(&generate, &self.repo_root, self.coverage_timeout) {
            Ok(out) if out.timed_out => {
                return CoverageReport::failed("Coverage computation timed out");
            }
            Ok(out) => out,
            Err(e) => return CoverageReport::failed(format!("Coverage error: {e}")),
        };
        if !profile.success() {
            return CoverageReport::failed(profile.combined());
        }

        let summary = match self.runner.run(&summarize, &self.repo_root, self.summary_timeout) {
            Ok(out) if out.timed_out => {
                return CoverageReport::failed("Coverage computation timed out");
            }
            Ok(out) => out,
            Err(e) => return CoverageReport::failed(format!("Coverage error: {e}")),
        };
        if !summary.success() {
            return CoverageReport::failed(summary.combined());
        }

        match parse_total_coverage(&summary.stdout) {
            Some(total_percent) => CoverageReport {
                ok: true,
                total_percent,
                detail: summary.stdout,
            },
            None => CoverageReport::failed(summary.stdout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_total_line() {
        let summary = "\
example.com/fair/pkg/data/data.go:12:\tSum\t\t100.0%
example.com/fair/pkg/data/data.go:20:\tMean\t\t50.0%
total:\t\t\t\t\t(statements)\t67.5%
";
        assert_eq!(parse_total_coverage(summary).as_deref(), Some("67.5%"));
    }

    #[test]
    fn missing_total_line_is_none() {
        assert_eq!(parse_total_coverage("ok  \texample.com/fair\t0.01s\n"), None);
    }

    #[test]
    fn total_must_start_the_line() {
        assert_eq!(parse_total_coverage("subtotal: (statements) 10.0%"), None);
    }

    #[test]
    fn integer_percentages_parse() {
        assert_eq!(
            parse_total_coverage("total: (statements) 100%").as_deref(),
            Some("100%")
        );
    }
}
