//! Test-only helpers: a scratch git repository and scripted collaborators.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow, bail};
use tempfile::TempDir;

use crate::core::types::{RunResult, RunnerKind};
use crate::io::fixer::Fixer;
use crate::io::git::Git;
use crate::io::oracle::PatchOracle;
use crate::io::process::ProcessRunner;
use crate::io::test_runner::TestRunner;

/// A git repository in a temp dir with one commit containing `README.md` ("hi\n").
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create temp repo")?;
        let repo = Self { dir };
        repo.git_cmd(&["init", "-q"])?;
        repo.git_cmd(&["config", "user.email", "autofix@example.com"])?;
        repo.git_cmd(&["config", "user.name", "autofix"])?;
        repo.git_cmd(&["config", "commit.gpgsign", "false"])?;
        repo.write("README.md", "hi\n")?;
        repo.commit_all("init")?;
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn process(&self) -> ProcessRunner {
        ProcessRunner::new(self.path(), 1_000_000)
    }

    pub fn git(&self) -> Git {
        Git::new(self.process())
    }

    pub fn write(&self, rel: &str, contents: &str) -> Result<()> {
        write_file(self.path(), rel, contents)
    }

    pub fn read(&self, rel: &str) -> Result<String> {
        let path = self.path().join(rel);
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
    }

    pub fn commit_all(&self, message: &str) -> Result<()> {
        self.git_cmd(&["add", "-A"])?;
        self.git_cmd(&["commit", "-q", "-m", message])
    }

    /// Number of commits reachable from HEAD.
    pub fn commit_count(&self) -> Result<u32> {
        let out = self.git_output(&["rev-list", "--count", "HEAD"])?;
        out.trim()
            .parse()
            .with_context(|| format!("parse commit count '{}'", out.trim()))
    }

    fn git_cmd(&self, args: &[&str]) -> Result<()> {
        self.git_output(args).map(|_| ())
    }

    fn git_output(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(self.path())
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !output.status.success() {
            bail!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn write_file(root: &Path, rel: &str, contents: &str) -> Result<()> {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(&path, contents).with_context(|| format!("write {}", path.display()))
}

/// Successful test run with `log` on stdout.
pub fn pass(log: &str) -> RunResult {
    RunResult {
        exit_code: 0,
        stdout: log.to_string(),
        stderr: String::new(),
    }
}

/// Failing test run with `log` on stdout.
pub fn fail(log: &str) -> RunResult {
    RunResult {
        exit_code: 1,
        stdout: log.to_string(),
        stderr: String::new(),
    }
}

/// [`TestRunner`] that replays a fixed sequence of results.
pub struct ScriptedTestRunner {
    results: RefCell<VecDeque<RunResult>>,
    calls: Cell<u32>,
}

impl ScriptedTestRunner {
    pub fn new(results: Vec<RunResult>) -> Self {
        Self {
            results: RefCell::new(results.into()),
            calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.get()
    }
}

impl TestRunner for ScriptedTestRunner {
    fn run(&self, _kind: RunnerKind) -> Result<RunResult> {
        self.calls.set(self.calls.get() + 1);
        self.results
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted test result left"))
    }
}

/// [`Fixer`] that writes the same edits under `root` on every call.
pub struct ScriptedFixer {
    root: PathBuf,
    edits: Vec<(String, String)>,
    calls: Cell<u32>,
}

impl ScriptedFixer {
    pub fn new(root: &Path, edits: &[(&str, &str)]) -> Self {
        Self {
            root: root.to_path_buf(),
            edits: edits
                .iter()
                .map(|(path, contents)| (path.to_string(), contents.to_string()))
                .collect(),
            calls: Cell::new(0),
        }
    }

    /// Fixer that touches nothing.
    pub fn noop(root: &Path) -> Self {
        Self::new(root, &[])
    }

    pub fn calls(&self) -> u32 {
        self.calls.get()
    }
}

impl Fixer for ScriptedFixer {
    fn apply(&self, _kind: RunnerKind) -> Result<()> {
        self.calls.set(self.calls.get() + 1);
        for (path, contents) in &self.edits {
            write_file(&self.root, path, contents)?;
        }
        Ok(())
    }
}

/// [`PatchOracle`] that replays fixed completions and records the prompts it saw.
pub struct ScriptedOracle {
    replies: RefCell<VecDeque<Result<String>>>,
    prompts: RefCell<Vec<String>>,
}

impl ScriptedOracle {
    pub fn new(replies: Vec<Result<String>>) -> Self {
        Self {
            replies: RefCell::new(replies.into()),
            prompts: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.borrow().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }
}

impl PatchOracle for ScriptedOracle {
    fn name(&self) -> &str {
        "scripted"
    }

    fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.borrow_mut().push(prompt.to_string());
        self.replies
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(anyhow!("no scripted reply left")))
    }
}
