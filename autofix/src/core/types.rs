//! Shared deterministic types for the repair loop.
//!
//! These types are the contracts between the orchestrator and its
//! collaborators. They carry no I/O and are cheap to construct in tests.

use std::fmt;
use std::str::FromStr;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::ansi::strip_ansi;

/// Captured result of one external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    /// Process exit code; `-1` when the child ended without one (e.g. killed by a signal).
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RunResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout and stderr joined by a newline.
    pub fn combined_log(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

/// Result of one test invocation, reduced to what the loop decides on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestOutcome {
    /// Combined output with terminal escape codes removed.
    pub log: String,
    pub passed: bool,
}

impl TestOutcome {
    pub fn from_run(result: &RunResult) -> Self {
        Self {
            log: strip_ansi(&result.combined_log()),
            passed: result.success(),
        }
    }
}

/// Test-execution family of the project under repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerKind {
    Jest,
    Karma,
}

impl RunnerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RunnerKind::Jest => "jest",
            RunnerKind::Karma => "karma",
        }
    }
}

impl fmt::Display for RunnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunnerKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jest" => Ok(RunnerKind::Jest),
            "karma" => Ok(RunnerKind::Karma),
            other => Err(anyhow!("unknown runner kind '{other}' (expected jest or karma)")),
        }
    }
}

/// A proposed unified diff, normalized and ready for `git apply`.
///
/// Constructed only through [`crate::core::patch::extract_patch`], so a value
/// always contains the diff marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidatePatch(String);

impl CandidatePatch {
    pub(crate) fn new(text: String) -> Self {
        Self(text)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First `max_chars` characters, for log previews.
    pub fn preview(&self, max_chars: usize) -> &str {
        match self.0.char_indices().nth(max_chars) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }
}

/// Why the repair loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RepairStop {
    /// The initial test run passed; nothing was touched.
    AlreadyPassing,
    /// Lint/format fixes alone made the suite pass.
    PassedAfterDeterministic,
    /// An applied patch made the suite pass.
    PassedAfterPatch { iteration: u32 },
    /// The oracle produced no usable patch.
    OracleDeclined { iteration: u32 },
    /// The proposed patch did not apply; the tree was left untouched.
    PatchRejected { iteration: u32 },
    /// Every permitted iteration ran and tests still fail.
    BudgetExhausted { iterations: u32 },
}

impl RepairStop {
    pub fn tests_pass(self) -> bool {
        matches!(
            self,
            RepairStop::AlreadyPassing
                | RepairStop::PassedAfterDeterministic
                | RepairStop::PassedAfterPatch { .. }
        )
    }

    /// Stable short label for CI outputs.
    pub fn label(self) -> &'static str {
        match self {
            RepairStop::AlreadyPassing => "already_passing",
            RepairStop::PassedAfterDeterministic => "passed_after_deterministic",
            RepairStop::PassedAfterPatch { .. } => "passed_after_patch",
            RepairStop::OracleDeclined { .. } => "oracle_declined",
            RepairStop::PatchRejected { .. } => "patch_rejected",
            RepairStop::BudgetExhausted { .. } => "budget_exhausted",
        }
    }
}

/// What a downstream review step should do with the working tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Tests pass.
    Passing,
    /// Tests still fail but the tree carries changes worth reviewing.
    ProposedForReview,
    /// Tests still fail and there is nothing to review.
    NothingToPropose,
}

impl Verdict {
    /// Passing stops win; otherwise the working-tree reading decides.
    pub fn decide(stop: RepairStop, changes_pending: bool) -> Self {
        if stop.tests_pass() {
            Verdict::Passing
        } else if changes_pending {
            Verdict::ProposedForReview
        } else {
            Verdict::NothingToPropose
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Verdict::Passing => "passing",
            Verdict::ProposedForReview => "proposed_for_review",
            Verdict::NothingToPropose => "nothing_to_propose",
        }
    }
}

/// Final summary of one repair run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub runner: RunnerKind,
    pub stop: RepairStop,
    /// Patches that applied cleanly during this run.
    pub patches_applied: u32,
    pub verdict: Verdict,
    /// Working-tree reading taken after the loop stopped.
    pub changes_pending: bool,
    /// Whether lint/format fixes were committed as a checkpoint. That commit
    /// is part of the proposal even when `changes_pending` is false.
    pub checkpoint_committed: bool,
}
