//! Repair orchestrator: the state machine over test, fix, propose, apply.
//!
//! `Init -> TestInitial -> DeterministicPass -> TestPostDeterministic`,
//! then up to `max_iterations` rounds of `ProposePatch -> ApplyPatch ->
//! TestPostFix`. Every terminal outcome is an `Ok(RepairReport)`; `Err` is
//! reserved for faults such as an unwritable artifact or a missing `git`.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::core::types::{RepairReport, RepairStop, RunnerKind, TestOutcome, Verdict};
use crate::io::artifacts::{ArtifactPaths, write_log};
use crate::io::fixer::Fixer;
use crate::io::git::WorkTree;
use crate::io::oracle::OracleClient;
use crate::io::prompt::ContextBuilder;
use crate::io::test_runner::TestRunner;

/// Per-run settings, fixed before the loop starts.
#[derive(Debug, Clone)]
pub struct RepairSettings {
    pub runner: RunnerKind,
    /// Iteration budget for oracle rounds. Zero skips them.
    pub max_iterations: u32,
    /// Pre-captured failing log; used instead of the initial test run when non-empty.
    pub failing_log_path: Option<PathBuf>,
    pub artifacts: ArtifactPaths,
    /// Message for the checkpoint commit after deterministic fixes.
    pub commit_message: String,
}

/// Everything the orchestrator talks to.
pub struct Collaborators<'a, T, F, W> {
    pub tests: &'a T,
    pub fixer: &'a F,
    pub tree: &'a W,
    pub context: &'a ContextBuilder<'a>,
    pub oracle: &'a OracleClient<'a>,
}

/// Drive one repair run to a terminal state.
#[instrument(skip_all, fields(runner = %settings.runner, budget = settings.max_iterations))]
pub fn run_repair<T: TestRunner, F: Fixer, W: WorkTree>(
    settings: &RepairSettings,
    collab: &Collaborators<'_, T, F, W>,
) -> Result<RepairReport> {
    let kind = settings.runner;
    let artifacts = &settings.artifacts;

    let initial_log = match settings.failing_log_path.as_deref().and_then(read_prior_log) {
        Some(log) => log,
        None => {
            let outcome = run_suite(collab.tests, kind)?;
            if outcome.passed {
                info!("tests already pass; no fix required");
                return finish(collab.tree, kind, RepairStop::AlreadyPassing, false, 0);
            }
            write_log(&artifacts.initial_log, &outcome.log)?;
            outcome.log
        }
    };

    collab.fixer.apply(kind)?;
    let mut checkpoint_committed = false;
    if collab.tree.has_changes()? {
        match collab.tree.commit_all(&settings.commit_message) {
            Ok(true) => {
                info!("committed lint/format fixes");
                checkpoint_committed = true;
            }
            Ok(false) => debug!("lint/format left nothing to commit"),
            Err(err) => warn!(err = %format!("{err:#}"), "checkpoint commit failed, continuing"),
        }
    }

    let outcome = run_suite(collab.tests, kind)?;
    write_log(&artifacts.post_deterministic_log, &outcome.log)?;
    if outcome.passed {
        info!("tests pass after lint/format fixes");
        return finish(
            collab.tree,
            kind,
            RepairStop::PassedAfterDeterministic,
            checkpoint_committed,
            0,
        );
    }
    let mut current_log = if outcome.log.trim().is_empty() {
        initial_log
    } else {
        outcome.log
    };

    let mut patches_applied = 0u32;
    for iteration in 1..=settings.max_iterations {
        info!(iteration, "requesting patch");
        let files = collab.tree.tracked_files(collab.context.max_files())?;
        let ctx = collab.context.build(kind, files, &current_log);

        let Some(patch) = collab.oracle.propose(&ctx) else {
            info!(iteration, "no patch proposed");
            return finish(
                collab.tree,
                kind,
                RepairStop::OracleDeclined { iteration },
                checkpoint_committed,
                patches_applied,
            );
        };
        if !collab.tree.apply_patch(&patch)? {
            warn!(iteration, "patch failed to apply");
            return finish(
                collab.tree,
                kind,
                RepairStop::PatchRejected { iteration },
                checkpoint_committed,
                patches_applied,
            );
        }
        patches_applied += 1;

        let outcome = run_suite(collab.tests, kind)?;
        write_log(&artifacts.post_fix_log, &outcome.log)?;
        if outcome.passed {
            info!(iteration, "tests pass after patch");
            return finish(
                collab.tree,
                kind,
                RepairStop::PassedAfterPatch { iteration },
                checkpoint_committed,
                patches_applied,
            );
        }
        current_log = outcome.log;
    }

    info!("iteration budget exhausted");
    finish(
        collab.tree,
        kind,
        RepairStop::BudgetExhausted {
            iterations: settings.max_iterations,
        },
        checkpoint_committed,
        patches_applied,
    )
}

fn run_suite<T: TestRunner>(tests: &T, kind: RunnerKind) -> Result<TestOutcome> {
    let outcome = TestOutcome::from_run(&tests.run(kind)?);
    debug!(passed = outcome.passed, log_bytes = outcome.log.len(), "test run finished");
    Ok(outcome)
}

fn finish<W: WorkTree>(
    tree: &W,
    runner: RunnerKind,
    stop: RepairStop,
    checkpoint_committed: bool,
    patches_applied: u32,
) -> Result<RepairReport> {
    let changes_pending = tree.has_changes()?;
    let verdict = Verdict::decide(stop, changes_pending);
    info!(
        stop = stop.label(),
        verdict = verdict.label(),
        patches_applied,
        changes_pending,
        checkpoint_committed,
        "repair finished"
    );
    Ok(RepairReport {
        runner,
        stop,
        patches_applied,
        verdict,
        changes_pending,
        checkpoint_committed,
    })
}

/// Pre-captured failing log, if present and non-blank.
fn read_prior_log(path: &Path) -> Option<String> {
    match fs::read(path) {
        Ok(bytes) => {
            let log = String::from_utf8_lossy(&bytes).into_owned();
            if log.trim().is_empty() {
                debug!(path = %path.display(), "pre-captured log is empty");
                return None;
            }
            info!(path = %path.display(), "using pre-captured failing log");
            Some(log)
        }
        Err(err) if err.kind() == ErrorKind::NotFound => None,
        Err(err) => {
            warn!(path = %path.display(), %err, "cannot read pre-captured log, running tests instead");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_or_blank_prior_log_is_ignored() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert_eq!(read_prior_log(&temp.path().join("missing.txt")), None);

        let blank = temp.path().join("blank.txt");
        fs::write(&blank, "  \n\n").expect("write");
        assert_eq!(read_prior_log(&blank), None);

        let log = temp.path().join("log.txt");
        fs::write(&log, "FAIL app\n").expect("write");
        assert_eq!(read_prior_log(&log).as_deref(), Some("FAIL app\n"));
    }

    #[test]
    fn directory_as_prior_log_falls_back_to_test_run() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert_eq!(read_prior_log(temp.path()), None);
    }
}
