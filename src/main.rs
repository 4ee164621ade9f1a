use mutation_driver::config::{self, DriverConfig, RevertFailurePolicy, Timeouts};
use mutation_driver::controller::{self, RunController};
use mutation_driver::output;
use mutation_driver::process::SystemRunner;

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(
    name = "mutation-driver",
    version,
    about = "Apply diff mutations one at a time, run the test suite, and revert"
)]
struct Cli {
    /// Log level when RUST_LOG is unset
    #[arg(long, global = true, default_value = "warn", env = "MUTATION_DRIVER_LOG")]
    log_level: String,
    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct CorpusArgs {
    /// Directory holding the diff files and the corpus
    #[arg(long, default_value = "mutations", env = "MUTATION_DRIVER_MUTATIONS_DIR")]
    mutations_dir: PathBuf,
    /// Corpus file name inside the mutations directory
    #[arg(long, default_value = config::DEFAULT_CORPUS_NAME, env = "MUTATION_DRIVER_CORPUS")]
    corpus: PathBuf,
    /// Output JSON instead of human-readable text
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate every mutation in the corpus and rewrite it with verdicts
    Run {
        #[command(flatten)]
        corpus: CorpusArgs,
        /// Repository root (default: parent of the mutations directory)
        #[arg(long, env = "MUTATION_DRIVER_REPO_ROOT")]
        repo_root: Option<PathBuf>,
        /// File that must exist at the repository root
        #[arg(long, default_value = "go.mod", env = "MUTATION_DRIVER_ROOT_MARKER")]
        root_marker: String,
        /// Test command; exit status 0 means the suite passed
        #[arg(long, default_value = "go test ./...", env = "MUTATION_DRIVER_TEST_CMD")]
        test_cmd: String,
        /// Coverage command; `{profile}` is replaced with the profile path
        #[arg(
            long,
            default_value = "go test -covermode=count -coverprofile={profile} ./...",
            env = "MUTATION_DRIVER_COVERAGE_CMD"
        )]
        coverage_cmd: String,
        /// Command summarising the coverage profile
        #[arg(
            long,
            default_value = "go tool cover -func={profile}",
            env = "MUTATION_DRIVER_COVERAGE_SUMMARY_CMD"
        )]
        coverage_summary_cmd: String,
        /// Coverage profile path, relative to the repository root
        #[arg(long, default_value = "coverage.out")]
        coverage_profile: PathBuf,
        /// Skip the final coverage measurement
        #[arg(long)]
        skip_coverage: bool,
        /// Characters of test output stored per mutation
        #[arg(long, default_value_t = config::DEFAULT_OUTPUT_CAP)]
        output_cap: usize,
        /// Suffix of backup files left behind by the patch tool
        #[arg(long, default_value = ".bak")]
        backup_suffix: String,
        /// What to do when a mutated file cannot be restored
        #[arg(long, value_enum, default_value_t = RevertFailurePolicy::Abort)]
        on_revert_failure: RevertFailurePolicy,
        /// Seconds allowed for applying one diff
        #[arg(long, default_value_t = 30)]
        apply_timeout: u64,
        /// Seconds allowed for restoring files
        #[arg(long, default_value_t = 30)]
        revert_timeout: u64,
        /// Seconds allowed for one test run
        #[arg(long, default_value_t = 120)]
        test_timeout: u64,
        /// Seconds allowed for generating the coverage profile
        #[arg(long, default_value_t = 240)]
        coverage_timeout: u64,
        /// Seconds allowed for summarising the coverage profile
        #[arg(long, default_value_t = 60)]
        summary_timeout: u64,
    },
    /// Report the score of the verdicts already stored in the corpus
    Status {
        #[command(flatten)]
        corpus: CorpusArgs,
    },
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(false).with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json);

    let exit_code = match cli.command {
        Commands::Run {
            corpus,
            repo_root,
            root_marker,
            test_cmd,
            coverage_cmd,
            coverage_summary_cmd,
            coverage_profile,
            skip_coverage,
            output_cap,
            backup_suffix,
            on_revert_failure,
            apply_timeout,
            revert_timeout,
            test_timeout,
            coverage_timeout,
            summary_timeout,
        } => {
            let mut cfg = base_config(&corpus);
            if let Some(root) = repo_root {
                cfg = cfg.with_repo_root(config::absolutize(&root));
            }
            cfg.coverage_profile = cfg.repo_root.join(coverage_profile);
            cfg.root_marker = root_marker;
            cfg.test_cmd = test_cmd;
            cfg.coverage_cmd = coverage_cmd;
            cfg.coverage_summary_cmd = coverage_summary_cmd;
            cfg.skip_coverage = skip_coverage;
            cfg.output_cap = output_cap;
            cfg.backup_suffix = backup_suffix;
            cfg.on_revert_failure = on_revert_failure;
            cfg.timeouts = Timeouts {
                apply: Duration::from_secs(apply_timeout),
                revert: Duration::from_secs(revert_timeout),
                tests: Duration::from_secs(test_timeout),
                coverage: Duration::from_secs(coverage_timeout),
                summary: Duration::from_secs(summary_timeout),
            };
            cmd_run(&cfg, corpus.json)
        }
        Commands::Status { corpus } => cmd_status(&base_config(&corpus), corpus.json),
    };

    process::exit(exit_code);
}

fn base_config(args: &CorpusArgs) -> DriverConfig {
    let mutations_dir = config::absolutize(&args.mutations_dir);
    let mut cfg = DriverConfig::for_mutations_dir(mutations_dir);
    cfg.corpus_file = cfg.mutations_dir.join(&args.corpus);
    cfg
}

fn cmd_run(cfg: &DriverConfig, json_mode: bool) -> i32 {
    let interrupt = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&interrupt);
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("\nInterrupted. Reverting pending changes...");
        handler_flag.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to set Ctrl+C handler");
    }

    let runner = SystemRunner::new().with_interrupt(Arc::clone(&interrupt));
    let controller = RunController::new(cfg, &runner)
        .with_interrupt(interrupt)
        .with_progress(!json_mode);

    match controller.run() {
        Ok(report) => {
            if json_mode {
                match serde_json::to_string(&report) {
                    Ok(json) => println!("{}", json),
                    Err(e) => {
                        output::print_error(&format!("Failed to encode report: {}", e));
                        return 1;
                    }
                }
            }
            0
        }
        Err(e) => {
            output::print_error(&e.to_string());
            e.exit_code()
        }
    }
}

fn cmd_status(cfg: &DriverConfig, json_mode: bool) -> i32 {
    match controller::status(cfg) {
        Ok(report) => {
            if json_mode {
                match serde_json::to_string(&report) {
                    Ok(json) => println!("{}", json),
                    Err(e) => {
                        output::print_error(&format!("Failed to encode report: {}", e));
                        return 1;
                    }
                }
            } else {
                output::print_status(&report, &cfg.corpus_file);
            }
            0
        }
        Err(e) => {
            output::print_error(&e.to_string());
            e.exit_code()
        }
    }
}
