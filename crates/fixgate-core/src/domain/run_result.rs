//! Test run outcomes and the workspace identity they ran against.

use serde::{Deserialize, Serialize};

use super::error::Stage;

/// Which patch a workspace carries on top of its base commit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PatchKind {
    /// Base tree as checked out.
    None,
    /// Parent tree plus the commit's test changes only.
    TestOnly,
    /// The commit's own tree.
    Full,
}

/// Identity of the workspace a test run executed in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkspaceId {
    /// Directory name allocated by the arena.
    pub label: String,

    /// Commit the tree was checked out from.
    pub base: String,

    pub patch: PatchKind,

    pub stage: Stage,
}

/// How a test command ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TestRunStatus {
    /// Exit code 0.
    Passed,
    /// Non-zero exit code.
    Failed { exit_code: i32 },
    /// Terminated by a signal the gate did not send.
    Crashed { signal: Option<i32> },
    /// Killed by the gate after the wall-clock limit.
    TimedOut,
}

impl TestRunStatus {
    pub fn passed(&self) -> bool {
        matches!(self, TestRunStatus::Passed)
    }

    /// Failed or crashed: the tests ran and did not succeed.
    pub fn failed(&self) -> bool {
        matches!(
            self,
            TestRunStatus::Failed { .. } | TestRunStatus::Crashed { .. }
        )
    }

    pub fn describe(&self) -> String {
        match self {
            TestRunStatus::Passed => "passed".to_string(),
            TestRunStatus::Failed { exit_code } => format!("failed (exit code {exit_code})"),
            TestRunStatus::Crashed { signal: Some(sig) } => format!("crashed (signal {sig})"),
            TestRunStatus::Crashed { signal: None } => "crashed".to_string(),
            TestRunStatus::TimedOut => "timed out".to_string(),
        }
    }
}

/// Result of one test command execution in one workspace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestRunResult {
    pub status: TestRunStatus,

    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,

    /// Combined stdout/stderr, bounded; truncation is marked inline.
    pub output: String,

    /// Whether the captured output was truncated.
    pub truncated: bool,

    pub workspace: WorkspaceId,
}

impl TestRunResult {
    /// Last `n` lines of the captured output.
    pub fn output_tail(&self, n: usize) -> String {
        tail_lines(&self.output, n)
    }
}

/// Last `n` lines of `text`, joined with `\n`.
pub fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}
