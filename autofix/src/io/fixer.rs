//! Deterministic fixer: lint auto-fix, then formatter.
//!
//! Its effect is only observable through the working tree. Both tools are
//! optional and a non-zero exit is expected from linters that fixed what they
//! could and still report the rest.

use std::path::Path;

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::core::types::RunnerKind;
use crate::io::config::FixConfig;
use crate::io::process::{ProcessRunner, display_command};

/// Applies mechanical, failure-independent fixes to the working tree.
pub trait Fixer {
    fn apply(&self, kind: RunnerKind) -> Result<()>;
}

/// Which fixer tools are installed, detected once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Toolchain {
    pub linter: bool,
    pub formatter: bool,
}

impl Toolchain {
    pub fn detect(root: &Path, config: &FixConfig) -> Self {
        let toolchain = Self {
            linter: root.join(&config.lint_bin).exists(),
            formatter: root.join(&config.format_bin).exists(),
        };
        debug!(
            linter = toolchain.linter,
            formatter = toolchain.formatter,
            "fixer toolchain detected"
        );
        toolchain
    }
}

/// [`Fixer`] that runs the configured lint and format commands.
#[derive(Debug, Clone)]
pub struct ToolFixer {
    process: ProcessRunner,
    toolchain: Toolchain,
    config: FixConfig,
}

impl ToolFixer {
    pub fn new(process: ProcessRunner, toolchain: Toolchain, config: FixConfig) -> Self {
        Self {
            process,
            toolchain,
            config,
        }
    }

    fn run_step(&self, step: &str, available: bool, command: &[String]) {
        if !available {
            debug!(step, "tool not installed, skipping");
            return;
        }
        info!(step, command = %display_command(command), "running auto-fix");
        match self.process.run(command, None) {
            Ok(result) if !result.success() => {
                info!(step, exit_code = result.exit_code, "auto-fix exited non-zero, continuing");
            }
            Ok(_) => {}
            Err(err) => warn!(step, err = %format!("{err:#}"), "auto-fix could not run, skipping"),
        }
    }
}

impl Fixer for ToolFixer {
    #[instrument(skip_all, fields(%kind))]
    fn apply(&self, kind: RunnerKind) -> Result<()> {
        self.run_step("lint", self.toolchain.linter, &self.config.lint_command);
        self.run_step("format", self.toolchain.formatter, &self.config.format_command);
        // Snapshot tests are never re-recorded here: an updated snapshot would
        // hide the regression the suite is reporting.
        debug!(%kind, "snapshot update skipped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[test]
    fn detects_installed_tools() {
        let temp = tempfile::tempdir().expect("tempdir");
        let bin = temp.path().join("node_modules/.bin");
        fs::create_dir_all(&bin).expect("mkdir");
        fs::write(bin.join("eslint"), "").expect("write");

        let toolchain = Toolchain::detect(temp.path(), &FixConfig::default());
        assert_eq!(
            toolchain,
            Toolchain {
                linter: true,
                formatter: false
            }
        );
    }

    #[test]
    fn missing_tools_are_a_no_op() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = FixConfig {
            lint_command: sh("touch linted"),
            format_command: sh("touch formatted"),
            ..FixConfig::default()
        };
        let fixer = ToolFixer::new(
            ProcessRunner::new(temp.path(), 1000),
            Toolchain::default(),
            config,
        );

        fixer.apply(RunnerKind::Karma).expect("apply");
        assert!(!temp.path().join("linted").exists());
        assert!(!temp.path().join("formatted").exists());
    }

    #[test]
    fn non_zero_lint_exit_still_runs_formatter() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = FixConfig {
            lint_command: sh("touch linted; exit 1"),
            format_command: sh("touch formatted"),
            ..FixConfig::default()
        };
        let fixer = ToolFixer::new(
            ProcessRunner::new(temp.path(), 1000),
            Toolchain {
                linter: true,
                formatter: true,
            },
            config,
        );

        fixer.apply(RunnerKind::Jest).expect("apply");
        assert!(temp.path().join("linted").exists());
        assert!(temp.path().join("formatted").exists());
    }

    #[test]
    fn unspawnable_tool_is_skipped() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = FixConfig {
            lint_command: vec!["definitely-not-a-real-linter".to_string()],
            format_command: sh("touch formatted"),
            ..FixConfig::default()
        };
        let fixer = ToolFixer::new(
            ProcessRunner::new(temp.path(), 1000),
            Toolchain {
                linter: true,
                formatter: true,
            },
            config,
        );

        fixer.apply(RunnerKind::Jest).expect("apply");
        assert!(temp.path().join("formatted").exists());
    }
}
