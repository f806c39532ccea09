//! Domain models for fixgate.
//!
//! Canonical definitions for the core entities:
//! - `Commit` / `FileChange` / `Hunk`: a commit and its parsed diff
//! - `TestRunResult`: outcome of one test command execution
//! - `Verdict`: the terminal classification of one commit

pub mod commit;
pub mod error;
pub mod run_result;
pub mod verdict;

// Re-export main types and errors
pub use commit::{short_sha, ChangeKind, Commit, CommitMeta, FileChange, Hunk, HunkLine, LineKind};
pub use error::{GateError, Result, Stage};
pub use run_result::{tail_lines, PatchKind, TestRunResult, TestRunStatus, WorkspaceId};
pub use verdict::{Verdict, VerdictTag};
