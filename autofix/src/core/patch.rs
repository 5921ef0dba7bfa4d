//! Diff extraction from free-form oracle completions.

use crate::core::types::CandidatePatch;

/// Marker every acceptable completion must contain.
pub const DIFF_MARKER: &str = "diff --git";

/// Extract a unified diff from an oracle completion.
///
/// Returns `None` unless the text contains [`DIFF_MARKER`]. Leading prose is
/// dropped and the result always ends with exactly one newline (`git apply`
/// rejects a truncated last line). Only a fence in column 0 closes the diff:
/// hunk context lines start with a space, so fenced blocks inside a patched
/// markdown file survive.
pub fn extract_patch(completion: &str) -> Option<CandidatePatch> {
    let start = diff_start(completion)?;
    let body = &completion[start..];

    let mut end = body.len();
    let mut offset = 0;
    for line in body.split_inclusive('\n') {
        if offset > 0 && line.starts_with("```") {
            end = offset;
            break;
        }
        offset += line.len();
    }

    let mut text = body[..end].trim_end_matches(['\n', '\r']).to_string();
    text.push('\n');
    Some(CandidatePatch::new(text))
}

/// Byte offset of the first line starting with the marker, or of the bare
/// marker when it only appears mid-line.
fn diff_start(completion: &str) -> Option<usize> {
    let mut offset = 0;
    for line in completion.split_inclusive('\n') {
        if line.trim_start().starts_with(DIFF_MARKER) {
            return Some(offset + (line.len() - line.trim_start().len()));
        }
        offset += line.len();
    }
    completion.find(DIFF_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIFF: &str = "diff --git a/src/app.ts b/src/app.ts\n--- a/src/app.ts\n+++ b/src/app.ts\n@@ -1 +1 @@\n-old\n+new\n";

    #[test]
    fn rejects_text_without_marker() {
        assert!(extract_patch("I could not find a fix.").is_none());
        assert!(extract_patch("--- a/x\n+++ b/x\n").is_none());
    }

    #[test]
    fn keeps_bare_diff_unchanged() {
        let patch = extract_patch(DIFF).expect("patch");
        assert_eq!(patch.as_str(), DIFF);
    }

    #[test]
    fn strips_prose_and_code_fence() {
        let completion = format!("Here is the fix:\n\n```diff\n{DIFF}```\nLet me know.\n");
        let patch = extract_patch(&completion).expect("patch");
        assert_eq!(patch.as_str(), DIFF);
    }

    #[test]
    fn keeps_fenced_context_lines_inside_hunk() {
        let diff = "diff --git a/README.md b/README.md\n--- a/README.md\n+++ b/README.md\n@@ -1,4 +1,4 @@\n ```ts\n-const a = 1;\n+const a = 2;\n ```\n";
        let patch = extract_patch(diff).expect("patch");
        assert_eq!(patch.as_str(), diff);

        let fenced = format!("```diff\n{diff}```\n");
        let patch = extract_patch(&fenced).expect("patch");
        assert_eq!(patch.as_str(), diff);
    }

    #[test]
    fn adds_missing_trailing_newline() {
        let patch = extract_patch(DIFF.trim_end()).expect("patch");
        assert!(patch.as_str().ends_with("+new\n"));
    }

    #[test]
    fn keeps_whitespace_only_context_line_at_end() {
        let completion = "diff --git a/x b/x\n@@ -1,2 +1,2 @@\n-a\n+b\n \n\n\n";
        let patch = extract_patch(completion).expect("patch");
        assert!(patch.as_str().ends_with("+b\n \n"));
    }
}
