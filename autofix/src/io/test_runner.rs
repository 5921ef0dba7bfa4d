//! Test executor: runs the project's test command for a runner kind.

use anyhow::Result;
use tracing::{info, instrument};

use crate::core::types::{RunResult, RunnerKind};
use crate::io::config::TestsConfig;
use crate::io::process::{ProcessRunner, display_command};

/// Runs the project's test suite once.
pub trait TestRunner {
    /// Run the suite; a failing suite is `Ok` with a non-zero exit code.
    fn run(&self, kind: RunnerKind) -> Result<RunResult>;
}

/// [`TestRunner`] that spawns the configured test commands.
#[derive(Debug, Clone)]
pub struct CommandTestRunner {
    process: ProcessRunner,
    commands: TestsConfig,
    /// Decided once at startup from the manifest.
    has_ci_script: bool,
}

impl CommandTestRunner {
    pub fn new(process: ProcessRunner, commands: TestsConfig, has_ci_script: bool) -> Self {
        Self {
            process,
            commands,
            has_ci_script,
        }
    }

    /// Command used for `kind`.
    pub fn command_for(&self, kind: RunnerKind) -> &[String] {
        match kind {
            RunnerKind::Jest => &self.commands.jest_command,
            RunnerKind::Karma if self.has_ci_script => &self.commands.karma_ci_command,
            RunnerKind::Karma => &self.commands.karma_command,
        }
    }
}

impl TestRunner for CommandTestRunner {
    #[instrument(skip_all, fields(%kind))]
    fn run(&self, kind: RunnerKind) -> Result<RunResult> {
        let command = self.command_for(kind);
        info!(command = %display_command(command), "running tests");
        self.process.run(command, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner(has_ci_script: bool) -> CommandTestRunner {
        CommandTestRunner::new(
            ProcessRunner::new(".", 1000),
            TestsConfig::default(),
            has_ci_script,
        )
    }

    #[test]
    fn jest_uses_npm_test_in_ci_mode() {
        assert_eq!(
            runner(true).command_for(RunnerKind::Jest),
            ["npm", "test", "--silent", "--", "--ci"]
        );
    }

    #[test]
    fn karma_prefers_ci_script() {
        assert_eq!(
            runner(true).command_for(RunnerKind::Karma),
            ["npm", "run", "test:ci"]
        );
    }

    #[test]
    fn karma_falls_back_to_headless_without_coverage() {
        let command = runner(false).command_for(RunnerKind::Karma).to_vec();
        assert_eq!(&command[..3], ["npx", "ng", "test"]);
        assert!(command.contains(&"--browsers=ChromeHeadless".to_string()));
        assert!(command.contains(&"--code-coverage=false".to_string()));
    }

    #[test]
    fn failing_suite_is_reported_through_exit_code() {
        let temp = tempfile::tempdir().expect("tempdir");
        let commands = TestsConfig {
            jest_command: vec![
                "sh".to_string(),
                "-c".to_string(),
                "echo '1 failed'; exit 1".to_string(),
            ],
            ..TestsConfig::default()
        };
        let runner = CommandTestRunner::new(ProcessRunner::new(temp.path(), 1000), commands, false);

        let result = runner.run(RunnerKind::Jest).expect("run");
        assert_eq!(result.exit_code, 1);
        assert!(result.stdout.contains("1 failed"));
    }
}
