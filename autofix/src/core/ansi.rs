//! Terminal escape stripping for captured test logs.

use std::sync::LazyLock;

use regex::Regex;

static ANSI_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1B(?:[@-Z\\\]\^_]|\[[0-?]*[ -/]*[@-~])").expect("ansi regex is valid")
});

/// Remove ANSI escape sequences (colors, cursor movement) from `text`.
pub fn strip_ansi(text: &str) -> String {
    ANSI_RE.replace_all(text, "").into_owned()
}
