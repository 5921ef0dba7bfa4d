//! Runner-kind sniffing over project configuration text, and locating the
//! source file a failing test log points at.
//!
//! Detection is substring-based on purpose: the inputs are never parsed, so a
//! malformed `package.json` still yields a decision.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::RunnerKind;

const SPEC_SUFFIX: &str = ".spec.ts";

/// Script name that marks a project-defined CI test entry point.
pub const CI_TEST_SCRIPT: &str = "test:ci";

/// Pick the runner kind from the manifest and jest config texts.
///
/// Jest wins when the jest config mentions jest, or the manifest declares a
/// `"jest"` key or depends on `jest-preset-angular`. Everything else is Karma.
pub fn detect_runner_kind(manifest: &str, jest_config: &str) -> RunnerKind {
    let is_jest = jest_config.contains("jest")
        || manifest.contains("\"jest\"")
        || manifest.contains("jest-preset-angular");
    if is_jest {
        RunnerKind::Jest
    } else {
        RunnerKind::Karma
    }
}

/// True when the manifest declares a `test:ci` script.
pub fn declares_ci_script(manifest: &str) -> bool {
    manifest.contains(&format!("\"{CI_TEST_SCRIPT}\""))
}

/// First `src/**.ts` file named in `log` that `exists` accepts.
///
/// A spec file maps to its implementation (`x.spec.ts` -> `x.ts`) when that
/// exists, since the test is assumed correct. Falls back to the spec file
/// itself. Paths that climb out of the tree are ignored.
pub fn failing_source_path(log: &str, exists: impl Fn(&str) -> bool) -> Option<String> {
    static SOURCE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"src/[A-Za-z0-9_\-./]+\.ts\b").expect("source path regex is valid")
    });

    let found = SOURCE_RE.find(log)?.as_str();
    if found.split('/').any(|part| part == "..") {
        return None;
    }
    if let Some(stem) = found.strip_suffix(SPEC_SUFFIX) {
        let implementation = format!("{stem}.ts");
        if exists(&implementation) {
            return Some(implementation);
        }
    }
    exists(found).then(|| found.to_string())
}
