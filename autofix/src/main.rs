//! `autofix`: repair a failing test suite in CI.
//!
//! Runs the tests, applies lint/format fixes, then asks the configured
//! patch oracle for diffs until the suite passes or the budget runs out.
//! Always exits 0 so the surrounding pipeline can decide what to do with the
//! result (see `report.json` and the GitHub step outputs).

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;
use tracing::error;

use autofix::core::types::{RepairReport, RepairStop, RunnerKind};
use autofix::io::artifacts::{ArtifactPaths, write_report};
use autofix::io::config::{CONFIG_FILE, OracleBackend, load_config};
use autofix::io::fixer::{ToolFixer, Toolchain};
use autofix::io::git::Git;
use autofix::io::github::{GITHUB_OUTPUT_ENV, append_step_outputs};
use autofix::io::oracle::{OracleClient, build_backend};
use autofix::io::process::ProcessRunner;
use autofix::io::project::ProjectSnapshot;
use autofix::io::prompt::ContextBuilder;
use autofix::io::test_runner::CommandTestRunner;
use autofix::logging;
use autofix::repair::{Collaborators, RepairSettings, run_repair};

#[derive(Parser, Debug)]
#[command(
    name = "autofix",
    version,
    about = "Repair failing Jest/Karma tests with lint/format fixes and oracle-proposed patches"
)]
struct Cli {
    /// Pre-captured failing test log; skips the initial test run when non-empty.
    /// Defaults to `test_output.txt` in the artifact directory. A relative path
    /// is resolved against --workdir.
    #[arg(long, value_name = "PATH")]
    test_output: Option<PathBuf>,

    /// Maximum oracle propose/apply/retest cycles.
    #[arg(long, value_name = "N")]
    max_iterations: Option<u32>,

    /// Force the test runner instead of detecting it.
    #[arg(long, value_name = "jest|karma", value_parser = parse_runner)]
    runner: Option<RunnerKind>,

    /// Config file (default: `autofix.toml` in the project root). A relative
    /// path is resolved against --workdir.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Project root. Relative --config and --test-output paths start here.
    #[arg(short = 'C', long, value_name = "PATH", default_value = ".")]
    workdir: PathBuf,

    /// Patch oracle backend.
    #[arg(long, value_name = "auto|azure|command|disabled", value_parser = parse_oracle)]
    oracle: Option<OracleBackend>,
}

fn parse_runner(value: &str) -> Result<RunnerKind, String> {
    value.parse().map_err(|err: anyhow::Error| err.to_string())
}

fn parse_oracle(value: &str) -> Result<OracleBackend, String> {
    value.parse().map_err(|err: anyhow::Error| err.to_string())
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    match run(&cli) {
        Ok(report) => print_summary(&report),
        Err(err) => {
            error!(err = %format!("{err:#}"), "autofix run failed");
            eprintln!("autofix: {err:#}");
        }
    }
}

fn run(cli: &Cli) -> Result<RepairReport> {
    let workdir = cli.workdir.as_path();
    let config_path = cli
        .config
        .as_deref()
        .map_or_else(|| workdir.join(CONFIG_FILE), |path| in_workdir(workdir, path));
    let mut config = load_config(&config_path)?;
    if let Some(max_iterations) = cli.max_iterations {
        config.max_iterations = max_iterations;
    }
    if let Some(runner) = cli.runner {
        config.runner = Some(runner);
    }
    if let Some(backend) = cli.oracle {
        config.oracle.backend = backend;
    }
    config.validate()?;

    let project = ProjectSnapshot::load(workdir)?;
    let runner = config.runner.unwrap_or_else(|| project.detect_runner());
    let process = ProcessRunner::new(workdir, config.output_limit_bytes);
    let artifacts = ArtifactPaths::new(workdir.join(&config.artifact_dir));
    let failing_log_path = cli
        .test_output
        .as_deref()
        .map_or_else(|| artifacts.initial_log.clone(), |path| in_workdir(workdir, path));

    let tests = CommandTestRunner::new(
        process.clone(),
        config.tests.clone(),
        project.declares_ci_script(),
    );
    let fixer = ToolFixer::new(
        process.clone(),
        Toolchain::detect(workdir, &config.fix),
        config.fix.clone(),
    );
    let tree = Git::new(process.clone()).excluding(&config.artifact_dir.to_string_lossy());
    let context = ContextBuilder::new(workdir, &project, config.context.clone())?;
    let backend = build_backend(&config.oracle, &process)?;
    let oracle = OracleClient::new(backend.as_deref(), &context, config.oracle.preview_chars);

    let settings = RepairSettings {
        runner,
        max_iterations: config.max_iterations,
        failing_log_path: Some(failing_log_path),
        artifacts: artifacts.clone(),
        commit_message: config.commit_message.clone(),
    };
    let report = run_repair(
        &settings,
        &Collaborators {
            tests: &tests,
            fixer: &fixer,
            tree: &tree,
            context: &context,
            oracle: &oracle,
        },
    )?;

    if report.stop != RepairStop::AlreadyPassing {
        write_report(&artifacts.report, &report)?;
    }
    if let Some(path) = std::env::var_os(GITHUB_OUTPUT_ENV) {
        append_step_outputs(Path::new(&path), &report)?;
    }
    Ok(report)
}

/// `path` as given when absolute, otherwise relative to the project root.
fn in_workdir(workdir: &Path, path: &Path) -> PathBuf {
    workdir.join(path)
}

fn print_summary(report: &RepairReport) {
    let message = match report.stop {
        RepairStop::AlreadyPassing => "Tests already pass; no fix required.".to_string(),
        RepairStop::PassedAfterDeterministic => "Tests pass after lint/format fixes.".to_string(),
        RepairStop::PassedAfterPatch { iteration } => {
            format!("Patch from iteration {iteration} applied; tests pass.")
        }
        RepairStop::OracleDeclined { iteration } => {
            format!("No patch proposed in iteration {iteration}; keeping lint/format fixes (if any).")
        }
        RepairStop::PatchRejected { iteration } => {
            format!("Patch from iteration {iteration} failed to apply.")
        }
        RepairStop::BudgetExhausted { iterations } => {
            format!("Tests still fail after {iterations} patch iteration(s).")
        }
    };
    println!("{message}");
    println!(
        "runner: {}, patches applied: {}, checkpoint committed: {}, verdict: {}",
        report.runner,
        report.patches_applied,
        report.checkpoint_committed,
        report.verdict.label()
    );
}
