//! Audit artifacts under the artifact directory (`.autofix/` by default).
//!
//! Test logs are written at each checkpoint for humans and later CI steps;
//! the repair loop never reads them back.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::debug;

use crate::core::types::RepairReport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub dir: PathBuf,
    /// Log of the failing initial test run.
    pub initial_log: PathBuf,
    pub post_deterministic_log: PathBuf,
    /// Overwritten after every patch re-test.
    pub post_fix_log: PathBuf,
    pub report: PathBuf,
}

impl ArtifactPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            initial_log: dir.join("test_output.txt"),
            post_deterministic_log: dir.join("post_deterministic_test_output.txt"),
            post_fix_log: dir.join("post_fix_test_output.txt"),
            report: dir.join("report.json"),
            dir,
        }
    }
}

/// Write a test log, creating the artifact directory as needed.
pub fn write_log(path: &Path, log: &str) -> Result<()> {
    ensure_parent(path)?;
    fs::write(path, log).with_context(|| format!("write {}", path.display()))?;
    debug!(path = %path.display(), bytes = log.len(), "wrote test log");
    Ok(())
}

pub fn write_report(path: &Path, report: &RepairReport) -> Result<()> {
    ensure_parent(path)?;
    write_json(path, report)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create artifact dir {}", parent.display()))?;
    }
    Ok(())
}
