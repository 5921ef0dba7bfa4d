//! Side-effecting collaborators of the repair loop.

pub mod artifacts;
pub mod config;
pub mod fixer;
pub mod git;
pub mod github;
pub mod oracle;
pub mod process;
pub mod project;
pub mod prompt;
pub mod test_runner;
