//! Git adapter for the repair loop.
//!
//! The loop needs four things from version control: the tracked file
//! listing, a dirtiness check, a best-effort stage-and-commit, and an atomic
//! staging apply of a candidate patch. [`WorkTree`] names that surface so the
//! orchestrator can be driven against a fake in tests; [`Git`] implements it
//! with `git` subprocesses.

use std::io::Write;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::types::{CandidatePatch, RunResult};
use crate::io::process::ProcessRunner;

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// Version-control operations the orchestrator depends on.
pub trait WorkTree {
    /// True iff any tracked or untracked file differs from the last commit.
    fn has_changes(&self) -> Result<bool>;

    /// Repository-tracked paths in index order, at most `limit` of them.
    fn tracked_files(&self, limit: usize) -> Result<Vec<String>>;

    /// Stage everything and commit. `Ok(false)` when there was nothing to commit.
    fn commit_all(&self, message: &str) -> Result<bool>;

    /// Apply `patch` to the working tree and index in one step.
    ///
    /// `Ok(false)` means the patch was rejected and nothing was changed.
    fn apply_patch(&self, patch: &CandidatePatch) -> Result<bool>;
}

/// [`WorkTree`] backed by the `git` CLI.
#[derive(Debug, Clone)]
pub struct Git {
    process: ProcessRunner,
    /// Path prefixes (relative, `/`-terminated) that are neither inspected nor staged.
    excluded: Vec<String>,
}

impl Git {
    pub fn new(process: ProcessRunner) -> Self {
        Self {
            process,
            excluded: Vec::new(),
        }
    }

    /// Ignore `prefix` when inspecting and staging (used for audit artifacts).
    pub fn excluding(mut self, prefix: &str) -> Self {
        let trimmed = prefix.trim_start_matches("./").trim_end_matches('/');
        if !trimmed.is_empty() {
            self.excluded.push(format!("{trimmed}/"));
        }
        self
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_checked(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.stdout.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    /// True if there is anything staged for commit.
    pub fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run_checked(&["diff", "--cached", "--name-only"])?;
        Ok(!out.stdout.trim().is_empty())
    }

    /// Stage all changes outside the excluded prefixes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        let mut args = vec!["add".to_string(), "-A".to_string()];
        if !self.excluded.is_empty() {
            args.push("--".to_string());
            args.push(".".to_string());
            for prefix in &self.excluded {
                args.push(format!(":(exclude){prefix}"));
            }
        }
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run_checked(&args)?;
        Ok(())
    }

    fn is_excluded(&self, path: &str) -> bool {
        self.excluded.iter().any(|prefix| path.starts_with(prefix))
    }

    fn run_checked(&self, args: &[&str]) -> Result<RunResult> {
        let output = self.run(args)?;
        if !output.success() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                output.stderr.trim()
            ));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<RunResult> {
        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push("git".to_string());
        argv.extend(args.iter().map(|arg| arg.to_string()));
        self.process
            .run(&argv, None)
            .with_context(|| format!("git {}", args.join(" ")))
    }
}

impl WorkTree for Git {
    #[instrument(skip_all)]
    fn has_changes(&self) -> Result<bool> {
        let changed = self
            .status_porcelain()?
            .into_iter()
            .filter(|entry| !self.is_excluded(&entry.path))
            .count();
        debug!(changed, "working tree status");
        Ok(changed > 0)
    }

    fn tracked_files(&self, limit: usize) -> Result<Vec<String>> {
        let out = self.run_checked(&["ls-files"])?;
        Ok(out
            .stdout
            .lines()
            .filter(|line| !line.trim().is_empty())
            .take(limit)
            .map(str::to_string)
            .collect())
    }

    #[instrument(skip_all)]
    fn commit_all(&self, message: &str) -> Result<bool> {
        self.add_all()?;
        if !self.has_staged_changes()? {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        self.run_checked(&["commit", "-m", message])?;
        info!(message, "committed working tree");
        Ok(true)
    }

    #[instrument(skip_all, fields(patch_bytes = patch.as_str().len()))]
    fn apply_patch(&self, patch: &CandidatePatch) -> Result<bool> {
        // Outside the work tree so the patch file never shows up as a change.
        let mut file = tempfile::Builder::new()
            .prefix("autofix-")
            .suffix(".patch")
            .tempfile()
            .context("create patch file")?;
        file.write_all(patch.as_str().as_bytes())
            .context("write patch file")?;
        file.flush().context("flush patch file")?;

        let path = file.path().to_string_lossy().into_owned();
        let output = self.run(&["apply", "--index", &path])?;
        if output.success() {
            debug!("patch applied and staged");
            return Ok(true);
        }
        warn!(exit_code = output.exit_code, stderr = %output.stderr.trim(), "git apply rejected patch");
        Ok(false)
    }
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: unquote(path.trim()),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry {
        code,
        path: unquote(&path),
    })
}

/// Git wraps paths with unusual characters in double quotes.
fn unquote(path: &str) -> String {
    path.strip_prefix('"')
        .and_then(|p| p.strip_suffix('"'))
        .unwrap_or(path)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::patch::extract_patch;
    use crate::test_support::TestRepo;

    #[test]
    fn parses_untracked_line() {
        let e = parse_status_line("?? foo.txt").expect("parse");
        assert_eq!(
            e,
            StatusEntry {
                code: "??".to_string(),
                path: "foo.txt".to_string()
            }
        );
    }

    #[test]
    fn parses_modified_line() {
        let e = parse_status_line(" M src/main.ts").expect("parse");
        assert_eq!(e.code, " M");
        assert_eq!(e.path, "src/main.ts");
    }

    #[test]
    fn parses_rename_line_uses_new_path() {
        let e = parse_status_line("R  old.txt -> new.txt").expect("parse");
        assert_eq!(e.path, "new.txt");
    }

    #[test]
    fn parses_quoted_path() {
        let e = parse_status_line("?? \"my file.ts\"").expect("parse");
        assert_eq!(e.path, "my file.ts");
    }

    #[test]
    fn clean_repo_has_no_changes() {
        let repo = TestRepo::new().expect("repo");
        assert!(!repo.git().has_changes().expect("status"));
    }

    #[test]
    fn untracked_file_counts_as_change() {
        let repo = TestRepo::new().expect("repo");
        repo.write("src/new.ts", "export {};\n").expect("write");
        assert!(repo.git().has_changes().expect("status"));
    }

    #[test]
    fn excluded_prefix_is_not_a_change_and_is_not_staged() {
        let repo = TestRepo::new().expect("repo");
        repo.write(".autofix/test_output.txt", "FAIL\n").expect("write");
        let git = repo.git().excluding(".autofix");
        assert!(!git.has_changes().expect("status"));

        repo.write("src/app.ts", "export const a = 1;\n").expect("write");
        assert!(git.commit_all("chore: fix").expect("commit"));
        let tracked = git.tracked_files(100).expect("ls-files");
        assert!(tracked.contains(&"src/app.ts".to_string()));
        assert!(!tracked.iter().any(|path| path.starts_with(".autofix/")));
    }

    #[test]
    fn commit_all_without_changes_returns_false() {
        let repo = TestRepo::new().expect("repo");
        assert!(!repo.git().commit_all("chore: nothing").expect("commit"));
    }

    #[test]
    fn tracked_files_are_capped() {
        let repo = TestRepo::new().expect("repo");
        repo.write("a.ts", "a\n").expect("write");
        repo.write("b.ts", "b\n").expect("write");
        repo.commit_all("chore: files").expect("commit");

        let files = repo.git().tracked_files(2).expect("ls-files");
        assert_eq!(files, vec!["README.md".to_string(), "a.ts".to_string()]);
    }

    #[test]
    fn applied_patch_is_staged() {
        let repo = TestRepo::new().expect("repo");
        let patch = extract_patch(
            "diff --git a/README.md b/README.md\n--- a/README.md\n+++ b/README.md\n@@ -1 +1 @@\n-hi\n+hello\n",
        )
        .expect("patch");

        let git = repo.git();
        assert!(git.apply_patch(&patch).expect("apply"));
        assert_eq!(repo.read("README.md").expect("read"), "hello\n");
        assert!(git.has_staged_changes().expect("staged"));
    }

    #[test]
    fn rejected_patch_leaves_tree_untouched() {
        let repo = TestRepo::new().expect("repo");
        // Second hunk does not match, so the whole patch must be rejected.
        let patch = extract_patch(
            "diff --git a/README.md b/README.md\n--- a/README.md\n+++ b/README.md\n@@ -1 +1 @@\n-hi\n+hello\n@@ -5 +5 @@\n-missing\n+line\n",
        )
        .expect("patch");

        let git = repo.git();
        assert!(!git.apply_patch(&patch).expect("apply"));
        assert!(!git.has_changes().expect("status"));
        assert_eq!(repo.read("README.md").expect("read"), "hi\n");
    }

    #[test]
    fn malformed_patch_is_rejected_not_raised() {
        let repo = TestRepo::new().expect("repo");
        let patch = extract_patch("diff --git this is not a diff").expect("patch");
        assert!(!repo.git().apply_patch(&patch).expect("apply"));
        assert!(!repo.git().has_changes().expect("status"));
    }
}
