use std::path::Path;

use console::Style;

use crate::controller::{RunReport, RunStats};
use crate::corpus::{self, MutationRecord};
use crate::oracle::CoverageReport;
use crate::session::{Evaluation, Outcome};

const DESCRIPTION_PREVIEW: usize = 80;
const DETAIL_PREVIEW: usize = 500;

pub fn print_error(msg: &str) {
    let style = Style::new().red().bold();
    eprintln!("{} {}", style.apply_to("✗"), msg);
}

pub fn print_success(msg: &str) {
    let style = Style::new().green().bold();
    println!("{} {}", style.apply_to("✓"), msg);
}

pub fn print_warning(msg: &str) {
    let style = Style::new().yellow().bold();
    println!("{} {}", style.apply_to("!"), msg);
}

pub fn print_run_header(repo_root: &Path, corpus_file: &Path) {
    let bold = Style::new().bold();
    println!("{}", bold.apply_to("Mutation testing run"));
    println!("  Repository:     {}", repo_root.display());
    println!("  Mutations file: {}", corpus_file.display());
}

pub fn print_baseline_start() {
    let dim = Style::new().dim();
    println!("{}", dim.apply_to("Running baseline tests to ensure clean state..."));
}

pub fn print_baseline_failed(output: &str) {
    print_error("Baseline tests failed! Cannot proceed with mutation testing.");
    eprintln!("Test output:");
    eprintln!("{}", output);
}

pub fn print_mutation_start(index: usize, total: usize, record: &MutationRecord) {
    let dim = Style::new().dim();
    let name = Style::new().cyan().bold();
    println!();
    println!("{}", dim.apply_to(format!("[{}/{}]", index, total)));
    println!("  {} {}", name.apply_to("mutation"), record.mutation_file());
    println!(
        "  {}",
        dim.apply_to(corpus::truncate_output(record.description(), DESCRIPTION_PREVIEW))
    );
}

pub fn print_evaluation(evaluation: &Evaluation) {
    match &evaluation.outcome {
        Outcome::Unapplicable(err) => {
            let style = Style::new().red();
            println!("  {} {}", style.apply_to("✗"), err);
        }
        Outcome::Evaluated { caught, revert } => {
            if *caught {
                let style = Style::new().green().bold();
                println!("  {} CAUGHT: tests failed, mutation detected", style.apply_to("✓"));
            } else {
                let style = Style::new().yellow().bold();
                println!("  {} MISSED: tests passed, mutation undetected", style.apply_to("!"));
            }
            match revert {
                Ok(report) => {
                    let dim = Style::new().dim();
                    println!(
                        "  {} reverted {}",
                        dim.apply_to("·"),
                        report.restored.join(", ")
                    );
                }
                Err(e) => {
                    let style = Style::new().red().bold();
                    println!("  {} Failed to revert changes: {}", style.apply_to("✗"), e);
                }
            }
        }
    }
}

/// Qualitative band for a mutation score in percent.
pub fn rating(score: f64) -> &'static str {
    if score >= 80.0 {
        "Excellent! Strong test suite."
    } else if score >= 60.0 {
        "Good test coverage."
    } else if score >= 40.0 {
        "Moderate test coverage. Consider more tests."
    } else {
        "Weak test coverage. Significant testing gaps."
    }
}

pub fn print_stats(stats: &RunStats) {
    let rule = "=".repeat(60);
    let bold = Style::new().bold();
    println!();
    println!("{}", rule);
    println!("{}", bold.apply_to("MUTATION TESTING RESULTS"));
    println!("{}", rule);
    println!("Total mutations:           {}", stats.total);
    println!("Testable mutations:        {}", stats.testable);
    println!("Mutations caught by tests: {}", stats.caught);

    match stats.score() {
        Some(score) => {
            println!("Mutation score: {:.1}%", score);
            let band = rating(score);
            if score >= 60.0 {
                print_success(band);
            } else {
                print_warning(band);
            }
        }
        None => print_warning("No testable mutations found."),
    }
    println!("{}", rule);
}

pub fn print_saved(corpus_file: &Path) {
    let dim = Style::new().dim();
    println!("{}", dim.apply_to(format!("Results saved to: {}", corpus_file.display())));
}

pub fn print_coverage(report: &CoverageReport) {
    if report.ok {
        print_success(&format!("Line coverage (clean baseline): {}", report.total_percent));
    } else {
        print_warning("Could not compute line coverage");
        if !report.detail.is_empty() {
            println!("{}", corpus::truncate_output(&report.detail, DETAIL_PREVIEW));
        }
    }
}

pub fn print_status(report: &RunReport, corpus_file: &Path) {
    println!(
        "{}: {} mutations, {} testable, {} caught, {} missed",
        corpus_file.display(),
        report.stats.total,
        report.stats.testable,
        report.stats.caught,
        report.stats.missed(),
    );
    match report.stats.score() {
        Some(score) => println!("Mutation score: {:.1}% ({})", score, rating(score)),
        None => println!("No testable mutations"),
    }
}
