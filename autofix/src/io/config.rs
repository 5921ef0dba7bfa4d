//! Autofix configuration stored in `autofix.toml` at the project root.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::RunnerKind;

/// Default config file name, resolved against the working directory.
pub const CONFIG_FILE: &str = "autofix.toml";

/// Autofix configuration (TOML).
///
/// Every field is optional in the file; missing fields take the defaults
/// below. Command-line flags override the values loaded here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AutofixConfig {
    /// Maximum oracle-propose/apply/retest cycles per run.
    pub max_iterations: u32,

    /// Force the runner kind instead of sniffing project files.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runner: Option<RunnerKind>,

    /// Directory (relative to the project root) for audit logs and the run report.
    pub artifact_dir: PathBuf,

    /// Truncate captured stdout/stderr of any command beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Message for the checkpoint commit after lint/format fixes.
    pub commit_message: String,

    pub tests: TestsConfig,
    pub fix: FixConfig,
    pub context: ContextConfig,
    pub oracle: OracleConfig,
}

impl Default for AutofixConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1,
            runner: None,
            artifact_dir: PathBuf::from(".autofix"),
            output_limit_bytes: 1_000_000,
            commit_message: "chore: lint/format before AI autofix".to_string(),
            tests: TestsConfig::default(),
            fix: FixConfig::default(),
            context: ContextConfig::default(),
            oracle: OracleConfig::default(),
        }
    }
}

/// Test invocations per runner kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TestsConfig {
    pub jest_command: Vec<String>,
    /// Used for Karma projects that declare a `test:ci` script.
    pub karma_ci_command: Vec<String>,
    /// Headless fallback for Karma projects without a CI script.
    pub karma_command: Vec<String>,
}

impl Default for TestsConfig {
    fn default() -> Self {
        Self {
            jest_command: argv(&["npm", "test", "--silent", "--", "--ci"]),
            karma_ci_command: argv(&["npm", "run", "test:ci"]),
            karma_command: argv(&[
                "npx",
                "ng",
                "test",
                "--watch=false",
                "--browsers=ChromeHeadless",
                "--code-coverage=false",
            ]),
        }
    }
}

/// Lint and format auto-fixers. A step only runs when its `*_bin` exists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FixConfig {
    pub lint_bin: PathBuf,
    pub lint_command: Vec<String>,
    pub format_bin: PathBuf,
    pub format_command: Vec<String>,
}

impl Default for FixConfig {
    fn default() -> Self {
        Self {
            lint_bin: PathBuf::from("node_modules/.bin/eslint"),
            lint_command: argv(&["npx", "eslint", ".", "--ext", ".ts,.js", "--fix"]),
            format_bin: PathBuf::from("node_modules/.bin/prettier"),
            format_command: argv(&[
                "npx",
                "prettier",
                "**/*.{ts,js,html,scss,css,md,json}",
                "--write",
            ]),
        }
    }
}

/// Size bounds for the oracle prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContextConfig {
    pub manifest_bytes: usize,
    pub build_config_bytes: usize,
    pub karma_config_bytes: usize,
    pub jest_config_bytes: usize,
    /// Cap on the source of the file the failing log points at; 0 leaves it out.
    pub failing_source_bytes: usize,
    /// Maximum number of tracked paths listed.
    pub max_files: usize,
    /// Keep only the last this-many bytes of the failing log.
    pub failing_log_bytes: usize,
    /// Overall prompt cap; optional sections are dropped to meet it.
    pub prompt_budget_bytes: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            manifest_bytes: 2500,
            build_config_bytes: 2500,
            karma_config_bytes: 1500,
            jest_config_bytes: 1500,
            failing_source_bytes: 8000,
            max_files: 400,
            failing_log_bytes: 20_000,
            prompt_budget_bytes: 60_000,
        }
    }
}

/// Patch oracle backend selection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OracleBackend {
    /// Azure OpenAI when its environment is configured, otherwise disabled.
    Auto,
    Azure,
    Command,
    Disabled,
}

impl fmt::Display for OracleBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OracleBackend::Auto => "auto",
            OracleBackend::Azure => "azure",
            OracleBackend::Command => "command",
            OracleBackend::Disabled => "disabled",
        };
        f.write_str(name)
    }
}

impl FromStr for OracleBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(OracleBackend::Auto),
            "azure" => Ok(OracleBackend::Azure),
            "command" => Ok(OracleBackend::Command),
            "disabled" | "none" => Ok(OracleBackend::Disabled),
            other => Err(anyhow!(
                "unknown oracle backend '{other}' (expected auto, azure, command or disabled)"
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OracleConfig {
    pub backend: OracleBackend,
    /// Command for the `command` backend; receives the prompt on stdin.
    pub command: Vec<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Characters of each candidate patch echoed to the log.
    pub preview_chars: usize,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            backend: OracleBackend::Auto,
            command: Vec::new(),
            temperature: 0.2,
            max_tokens: 2000,
            preview_chars: 1000,
        }
    }
}

impl AutofixConfig {
    pub fn validate(&self) -> Result<()> {
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.commit_message.trim().is_empty() {
            return Err(anyhow!("commit_message must not be empty"));
        }
        if self.artifact_dir.as_os_str().is_empty() {
            return Err(anyhow!("artifact_dir must not be empty"));
        }
        ensure_command("tests.jest_command", &self.tests.jest_command)?;
        ensure_command("tests.karma_ci_command", &self.tests.karma_ci_command)?;
        ensure_command("tests.karma_command", &self.tests.karma_command)?;
        ensure_command("fix.lint_command", &self.fix.lint_command)?;
        ensure_command("fix.format_command", &self.fix.format_command)?;
        if self.context.max_files == 0 {
            return Err(anyhow!("context.max_files must be > 0"));
        }
        if self.context.failing_log_bytes == 0 {
            return Err(anyhow!("context.failing_log_bytes must be > 0"));
        }
        if self.context.prompt_budget_bytes == 0 {
            return Err(anyhow!("context.prompt_budget_bytes must be > 0"));
        }
        if self.oracle.backend == OracleBackend::Command {
            ensure_command("oracle.command", &self.oracle.command)?;
        }
        if !(0.0..=2.0).contains(&self.oracle.temperature) {
            return Err(anyhow!("oracle.temperature must be within 0.0..=2.0"));
        }
        Ok(())
    }
}

fn ensure_command(name: &str, command: &[String]) -> Result<()> {
    if command.is_empty() || command[0].trim().is_empty() {
        return Err(anyhow!("{name} must be a non-empty array"));
    }
    Ok(())
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| part.to_string()).collect()
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AutofixConfig::default()`.
pub fn load_config(path: &Path) -> Result<AutofixConfig> {
    if !path.exists() {
        let cfg = AutofixConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AutofixConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}
