//! GitHub Actions step outputs, so a later step can open a review PR.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

use crate::core::types::RepairReport;

/// Environment variable naming the step output file.
pub const GITHUB_OUTPUT_ENV: &str = "GITHUB_OUTPUT";

/// Append `key=value` lines describing `report` to the step output file.
pub fn append_step_outputs(path: &Path, report: &RepairReport) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    let lines = format!(
        "autofix_stop={}\nautofix_verdict={}\nchanges_proposed={}\ncheckpoint_committed={}\n",
        report.stop.label(),
        report.verdict.label(),
        report.changes_pending,
        report.checkpoint_committed
    );
    file.write_all(lines.as_bytes())
        .with_context(|| format!("append {}", path.display()))
}
