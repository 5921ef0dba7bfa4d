//! Test-repair loop for JavaScript/Angular projects in CI.
//!
//! Given a failing test suite, `autofix` runs deterministic lint/format fixes,
//! re-tests, and then asks an optional patch oracle for unified diffs, applying
//! each with `git apply --index` and re-testing until the suite passes or the
//! iteration budget runs out. The run always ends successfully; its outcome is
//! reported as a [`core::types::RepairReport`].
//!
//! - **[`core`]**: Pure logic (detection, patch extraction, log cleanup, types).
//! - **[`io`]**: Collaborators that touch processes, git, files and the network,
//!   each behind a trait so tests can script them.
//! - **[`repair`]**: The orchestrator state machine.

pub mod core;
pub mod io;
pub mod logging;
pub mod repair;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
