//! Project configuration snapshot used for detection and prompt excerpts.
//!
//! Loaded once at startup; the files are never parsed, only sniffed and
//! excerpted.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::detect::{declares_ci_script, detect_runner_kind};
use crate::core::types::RunnerKind;

pub const MANIFEST_FILE: &str = "package.json";
pub const BUILD_CONFIG_FILE: &str = "angular.json";
pub const KARMA_CONFIG_FILES: &[&str] = &["karma.conf.js", "karma.conf.ts"];
pub const JEST_CONFIG_FILES: &[&str] = &["jest.config.js", "jest.config.ts", "jest.preset.js"];

/// Raw text of the project files the repair loop inspects. Missing files are empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectSnapshot {
    pub manifest: String,
    pub build_config: String,
    pub karma_config: String,
    pub jest_config: String,
}

impl ProjectSnapshot {
    pub fn load(root: &Path) -> Result<Self> {
        let snapshot = Self {
            manifest: read_or_empty(&root.join(MANIFEST_FILE))?,
            build_config: read_or_empty(&root.join(BUILD_CONFIG_FILE))?,
            karma_config: read_first(root, KARMA_CONFIG_FILES)?,
            jest_config: read_first(root, JEST_CONFIG_FILES)?,
        };
        debug!(
            manifest = !snapshot.manifest.is_empty(),
            build_config = !snapshot.build_config.is_empty(),
            karma_config = !snapshot.karma_config.is_empty(),
            jest_config = !snapshot.jest_config.is_empty(),
            "project snapshot loaded"
        );
        Ok(snapshot)
    }

    pub fn detect_runner(&self) -> RunnerKind {
        detect_runner_kind(&self.manifest, &self.jest_config)
    }

    pub fn declares_ci_script(&self) -> bool {
        declares_ci_script(&self.manifest)
    }
}

/// First non-empty file among `candidates`.
fn read_first(root: &Path, candidates: &[&str]) -> Result<String> {
    for name in candidates {
        let contents = read_or_empty(&root.join(name))?;
        if !contents.is_empty() {
            return Ok(contents);
        }
    }
    Ok(String::new())
}

fn read_or_empty(path: &Path) -> Result<String> {
    match fs::read(path) {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(String::new()),
        Err(err) => Err(err).with_context(|| format!("read {}", path.display())),
    }
}
