//! Context builder: assembles the bounded oracle prompt.
//!
//! The prompt is rendered from a minijinja template whose sections carry
//! `<!-- section:KEY required|droppable -->` markers. When the rendered text
//! exceeds the byte budget, droppable sections go first (file listing, then
//! config excerpts from the least to the most useful, then the failing
//! source), and the failing log is shortened last, keeping its tail.

use std::fs;
use std::path::PathBuf;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::core::ansi::strip_ansi;
use crate::core::detect::failing_source_path;
use crate::core::types::RunnerKind;
use crate::io::config::ContextConfig;
use crate::io::project::{BUILD_CONFIG_FILE, MANIFEST_FILE, ProjectSnapshot};

const REPAIR_TEMPLATE: &str = include_str!("prompts/repair.md");

const TRUNCATED_MARKER: &str = "[truncated]\n";

/// Bounded excerpt of one project file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Excerpt {
    /// Section key, used to drop the excerpt under budget pressure.
    pub key: &'static str,
    /// Heading shown to the oracle.
    pub name: &'static str,
    pub text: String,
}

/// Current text of the file the failing log points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceExcerpt {
    /// Path relative to the project root.
    pub path: String,
    pub text: String,
}

/// Everything the oracle sees for one iteration. Rebuilt every time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairContext {
    pub runner: RunnerKind,
    pub excerpts: Vec<Excerpt>,
    pub failing_source: Option<SourceExcerpt>,
    pub files: Vec<String>,
    pub failing_log: String,
}

/// Builds [`RepairContext`] values from the startup snapshot and renders them.
///
/// Config excerpts come from the snapshot. The failing source is read from
/// `root` on every build, so it reflects patches applied earlier in the run.
pub struct ContextBuilder<'a> {
    root: PathBuf,
    project: &'a ProjectSnapshot,
    limits: ContextConfig,
    env: Environment<'static>,
}

impl<'a> ContextBuilder<'a> {
    pub fn new(
        root: impl Into<PathBuf>,
        project: &'a ProjectSnapshot,
        limits: ContextConfig,
    ) -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("repair", REPAIR_TEMPLATE)
            .context("load repair prompt template")?;
        Ok(Self {
            root: root.into(),
            project,
            limits,
            env,
        })
    }

    /// Cap on the tracked-file listing.
    pub fn max_files(&self) -> usize {
        self.limits.max_files
    }

    pub fn build(&self, runner: RunnerKind, files: Vec<String>, failing_log: &str) -> RepairContext {
        let mut excerpts = Vec::new();
        let mut push = |key: &'static str, name: &'static str, source: &str, limit: usize| {
            if source.trim().is_empty() {
                return;
            }
            excerpts.push(Excerpt {
                key,
                name,
                text: head_bytes(source, limit).to_string(),
            });
        };

        push("manifest", MANIFEST_FILE, &self.project.manifest, self.limits.manifest_bytes);
        push(
            "build_config",
            BUILD_CONFIG_FILE,
            &self.project.build_config,
            self.limits.build_config_bytes,
        );
        match runner {
            RunnerKind::Jest => push(
                "jest_config",
                "Jest config",
                &self.project.jest_config,
                self.limits.jest_config_bytes,
            ),
            RunnerKind::Karma => push(
                "karma_config",
                "Karma config",
                &self.project.karma_config,
                self.limits.karma_config_bytes,
            ),
        }

        let mut files = files;
        files.truncate(self.limits.max_files);

        let log = strip_ansi(failing_log);
        RepairContext {
            runner,
            excerpts,
            failing_source: self.failing_source(&log),
            files,
            failing_log: tail_bytes(&log, self.limits.failing_log_bytes).to_string(),
        }
    }

    fn failing_source(&self, log: &str) -> Option<SourceExcerpt> {
        if self.limits.failing_source_bytes == 0 {
            return None;
        }
        let path = failing_source_path(log, |rel| self.root.join(rel).is_file())?;
        match fs::read_to_string(self.root.join(&path)) {
            Ok(text) => {
                debug!(path = %path, bytes = text.len(), "including failing source");
                Some(SourceExcerpt {
                    text: head_bytes(&text, self.limits.failing_source_bytes)
                        .trim_end()
                        .to_string(),
                    path,
                })
            }
            Err(err) => {
                debug!(path = %path, err = %err, "failing source unreadable");
                None
            }
        }
    }

    /// Render `ctx` into a prompt no longer than the configured budget.
    pub fn render(&self, ctx: &RepairContext) -> Result<String> {
        let template = self.env.get_template("repair")?;
        let files = (!ctx.files.is_empty()).then(|| ctx.files.join("\n"));
        let rendered = template
            .render(context! {
                runner => ctx.runner.as_str(),
                excerpts => &ctx.excerpts,
                failing_source => &ctx.failing_source,
                files => files,
                failing_log => ctx.failing_log.trim_end(),
            })
            .context("render repair prompt")?;

        let mut sections = parse_sections(&rendered);
        apply_budget_to_sections(&mut sections, self.limits.prompt_budget_bytes);
        Ok(render_sections(&sections))
    }
}

#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
            .expect("section marker regex is valid")
    });

    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::with_capacity(markers.len());
    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let content = rendered[whole.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }
    sections
}

fn rendered_len(sections: &[ParsedSection]) -> usize {
    let separators = sections.len().saturating_sub(1) * 2;
    sections.iter().map(|s| s.content.len()).sum::<usize>() + separators
}

/// Drop order: files -> jest_config -> karma_config -> build_config -> manifest
/// -> failing_source, then shorten the failing log from the front.
fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    if rendered_len(sections) <= budget {
        return;
    }

    let drop_order = [
        "files",
        "jest_config",
        "karma_config",
        "build_config",
        "manifest",
        "failing_source",
    ];
    for key in drop_order {
        if rendered_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    let total = rendered_len(sections);
    if total <= budget {
        return;
    }
    let Some(log) = sections.iter_mut().find(|s| s.key == "log") else {
        return;
    };
    let before_len = log.content.len();
    let excess = total - budget;
    log.content = shorten_log_section(&log.content, excess);
    debug!(
        section = "log",
        before_len,
        after_len = log.content.len(),
        "truncated section for budget"
    );
}

/// Remove at least `excess` bytes from the inside of the `<log>` block, keeping its tail.
fn shorten_log_section(content: &str, excess: usize) -> String {
    let (Some(open), Some(close)) = (content.find("<log>\n"), content.rfind("\n</log>")) else {
        return content.to_string();
    };
    let inner_start = open + "<log>\n".len();
    if close < inner_start {
        return content.to_string();
    }
    let inner = &content[inner_start..close];
    let keep = inner.len().saturating_sub(excess + TRUNCATED_MARKER.len());
    format!(
        "{}{}{}{}",
        &content[..inner_start],
        TRUNCATED_MARKER,
        tail_bytes(inner, keep),
        &content[close..]
    )
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Longest prefix of at most `max` bytes ending on a char boundary.
fn head_bytes(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Longest suffix of at most `max` bytes starting on a char boundary.
fn tail_bytes(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> ProjectSnapshot {
        ProjectSnapshot {
            manifest: r#"{ "name": "shop", "devDependencies": { "jest": "^29" } }"#.to_string(),
            build_config: r#"{ "projects": { "shop": {} } }"#.to_string(),
            karma_config: "module.exports = function (config) {};".to_string(),
            jest_config: "module.exports = { preset: 'jest-preset-angular' };".to_string(),
        }
    }

    fn limits() -> ContextConfig {
        ContextConfig::default()
    }

    #[test]
    fn jest_context_uses_jest_config_excerpt() {
        let project = project();
        let builder = ContextBuilder::new(".", &project, limits()).expect("builder");
        let ctx = builder.build(RunnerKind::Jest, vec!["src/app.ts".to_string()], "FAIL");

        let keys: Vec<_> = ctx.excerpts.iter().map(|e| e.key).collect();
        assert_eq!(keys, ["manifest", "build_config", "jest_config"]);
    }

    #[test]
    fn karma_context_uses_karma_config_excerpt() {
        let project = project();
        let builder = ContextBuilder::new(".", &project, limits()).expect("builder");
        let ctx = builder.build(RunnerKind::Karma, Vec::new(), "FAIL");

        let keys: Vec<_> = ctx.excerpts.iter().map(|e| e.key).collect();
        assert_eq!(keys, ["manifest", "build_config", "karma_config"]);
    }

    #[test]
    fn empty_sources_are_omitted() {
        let project = ProjectSnapshot {
            manifest: "{}".to_string(),
            ..ProjectSnapshot::default()
        };
        let builder = ContextBuilder::new(".", &project, limits()).expect("builder");
        let ctx = builder.build(RunnerKind::Karma, Vec::new(), "FAIL");
        assert_eq!(ctx.excerpts.len(), 1);
        assert_eq!(ctx.excerpts[0].name, MANIFEST_FILE);
    }

    #[test]
    fn bounds_excerpts_files_and_log() {
        let project = ProjectSnapshot {
            manifest: "é".repeat(10),
            ..ProjectSnapshot::default()
        };
        let limits = ContextConfig {
            manifest_bytes: 5,
            max_files: 2,
            failing_log_bytes: 6,
            ..ContextConfig::default()
        };
        let builder = ContextBuilder::new(".", &project, limits).expect("builder");
        let files = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let ctx = builder.build(RunnerKind::Jest, files, "header\x1b[31m\nend of log");

        assert_eq!(ctx.excerpts[0].text, "éé");
        assert_eq!(ctx.files, ["a", "b"]);
        assert_eq!(ctx.failing_log, "of log");
    }

    #[test]
    fn prompt_carries_contract_and_sections_in_order() {
        let project = project();
        let builder = ContextBuilder::new(".", &project, limits()).expect("builder");
        let ctx = builder.build(
            RunnerKind::Jest,
            vec!["src/app.ts".to_string()],
            "Expected 1 to be 2",
        );
        let prompt = builder.render(&ctx).expect("render");

        assert!(prompt.contains("`diff --git`"));
        assert!(prompt.contains("git apply --index"));
        assert!(prompt.contains("Never update Jest snapshots"));
        assert!(prompt.contains("Do not weaken, skip, or delete tests."));
        assert!(!prompt.contains("<!-- section:"));

        let contract = prompt.find("<contract>").expect("contract");
        let manifest = prompt.find("### package.json").expect("manifest");
        let files = prompt.find("<files>\nsrc/app.ts\n</files>").expect("files");
        let log = prompt.find("<log>\nExpected 1 to be 2\n</log>").expect("log");
        assert!(contract < manifest && manifest < files && files < log);
    }

    #[test]
    fn karma_prompt_has_generic_snapshot_rule() {
        let project = project();
        let builder = ContextBuilder::new(".", &project, limits()).expect("builder");
        let ctx = builder.build(RunnerKind::Karma, Vec::new(), "FAILED");
        let prompt = builder.render(&ctx).expect("render");

        assert!(prompt.contains("karma test suite"));
        assert!(!prompt.contains("Jest snapshots"));
        assert!(!prompt.contains("<files>"));
    }

    #[test]
    fn budget_drops_files_then_excerpts_before_log() {
        let project = project();
        let files: Vec<String> = (0..200).map(|i| format!("src/file_{i}.ts")).collect();
        let unbounded = ContextBuilder::new(".", &project, limits()).expect("builder");
        let ctx = unbounded.build(RunnerKind::Jest, files, "Expected 1 to be 2");
        let without_files = {
            let mut ctx = ctx.clone();
            ctx.files.clear();
            unbounded.render(&ctx).expect("render")
        };

        let tight = ContextBuilder::new(
            ".",
            &project,
            ContextConfig {
                prompt_budget_bytes: without_files.len(),
                ..limits()
            },
        )
        .expect("builder");
        let prompt = tight.render(&ctx).expect("render");

        assert!(!prompt.contains("<files>"));
        assert!(prompt.contains("### Jest config"));
        assert!(prompt.contains("Expected 1 to be 2"));
        assert!(prompt.len() <= without_files.len());
    }

    #[test]
    fn budget_shortens_log_from_the_front_last() {
        let project = project();
        let log = format!("{}\nTests: 1 failed", "noise\n".repeat(500));
        let builder = ContextBuilder::new(
            ".",
            &project,
            ContextConfig {
                prompt_budget_bytes: 900,
                ..limits()
            },
        )
        .expect("builder");
        let ctx = builder.build(RunnerKind::Jest, vec!["src/app.ts".to_string()], &log);
        let prompt = builder.render(&ctx).expect("render");

        assert!(prompt.len() <= 900, "prompt is {} bytes", prompt.len());
        assert!(prompt.contains("<contract>"));
        assert!(!prompt.contains("### package.json"));
        assert!(prompt.contains("[truncated]\n"));
        assert!(prompt.ends_with("Tests: 1 failed\n</log>"));
    }

    #[test]
    fn failing_spec_pulls_in_implementation_source() {
        let temp = tempfile::tempdir().expect("tempdir");
        let app = temp.path().join("src/app");
        fs::create_dir_all(&app).expect("mkdir");
        fs::write(app.join("calc.ts"), "export const add = (a, b) => a - b;\n").expect("write");
        fs::write(app.join("calc.spec.ts"), "it('adds', () => {});\n").expect("write");
        let project = project();
        let builder = ContextBuilder::new(temp.path(), &project, limits()).expect("builder");

        let log = "FAIL \x1b[1msrc/app/calc.spec.ts\x1b[22m\n  expected 3, got -1";
        let ctx = builder.build(RunnerKind::Jest, vec!["src/app/calc.ts".to_string()], log);
        let source = ctx.failing_source.as_ref().expect("failing source");
        assert_eq!(source.path, "src/app/calc.ts");
        assert_eq!(source.text, "export const add = (a, b) => a - b;");

        let prompt = builder.render(&ctx).expect("render");
        let excerpt = prompt.find("### Failing Source: src/app/calc.ts").expect("source");
        let files = prompt.find("<files>").expect("files");
        assert!(prompt.contains("<source path=\"src/app/calc.ts\">\nexport const add"));
        assert!(prompt.find("### Jest config").expect("jest") < excerpt && excerpt < files);
    }

    #[test]
    fn failing_source_is_capped_and_can_be_disabled() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("src")).expect("mkdir");
        fs::write(temp.path().join("src/big.ts"), "x".repeat(100)).expect("write");
        let project = ProjectSnapshot::default();

        let capped = ContextBuilder::new(
            temp.path(),
            &project,
            ContextConfig {
                failing_source_bytes: 10,
                ..limits()
            },
        )
        .expect("builder");
        let ctx = capped.build(RunnerKind::Karma, Vec::new(), "at src/big.ts:1");
        assert_eq!(ctx.failing_source.expect("source").text, "x".repeat(10));

        let disabled = ContextBuilder::new(
            temp.path(),
            &project,
            ContextConfig {
                failing_source_bytes: 0,
                ..limits()
            },
        )
        .expect("builder");
        let ctx = disabled.build(RunnerKind::Karma, Vec::new(), "at src/big.ts:1");
        assert!(ctx.failing_source.is_none());
    }

    #[test]
    fn budget_drops_config_excerpts_before_failing_source() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("src")).expect("mkdir");
        fs::write(temp.path().join("src/app.ts"), "export const answer = 41;\n").expect("write");
        let project = project();
        let log = "FAIL src/app.spec.ts\nTests: 1 failed";

        let unbounded = ContextBuilder::new(temp.path(), &project, limits()).expect("builder");
        let ctx = unbounded.build(RunnerKind::Jest, Vec::new(), log);
        let minimal = {
            let mut ctx = ctx.clone();
            ctx.excerpts.clear();
            unbounded.render(&ctx).expect("render")
        };

        let tight = ContextBuilder::new(
            temp.path(),
            &project,
            ContextConfig {
                prompt_budget_bytes: minimal.len(),
                ..limits()
            },
        )
        .expect("builder");
        let prompt = tight.render(&ctx).expect("render");
        assert!(!prompt.contains("### package.json"));
        assert!(!prompt.contains("### Jest config"));
        assert!(prompt.contains("### Failing Source: src/app.ts"));
        assert!(!prompt.contains("[truncated]"));

        let tighter = ContextBuilder::new(
            temp.path(),
            &project,
            ContextConfig {
                prompt_budget_bytes: minimal.len() - 1,
                ..limits()
            },
        )
        .expect("builder");
        let prompt = tighter.render(&ctx).expect("render");
        assert!(!prompt.contains("### Failing Source"));
        assert!(prompt.ends_with("Tests: 1 failed\n</log>"));
    }

    #[test]
    fn tail_and_head_respect_char_boundaries() {
        assert_eq!(head_bytes("aé", 2), "a");
        assert_eq!(tail_bytes("éa", 2), "a");
        assert_eq!(tail_bytes("abc", 10), "abc");
    }
}
