//! Structured observability hooks for the commit evaluation lifecycle.
//!
//! This module provides:
//! - Commit-scoped tracing spans via the `CommitSpan` RAII guard
//! - Emission functions for the stage boundaries: classification, workspace
//!   creation, stage completion and the final verdict
//!
//! Events are emitted at `info!` level; filter with `RUST_LOG`.

use tracing::info;

use crate::classifier::Classification;
use crate::domain::error::Stage;
use crate::domain::run_result::TestRunResult;
use crate::domain::verdict::Verdict;

/// RAII guard that enters a commit-scoped span for the duration of an evaluation.
///
/// # Example
///
/// ```ignore
/// let _span = CommitSpan::enter(&commit.id);
/// // tracing calls made here carry commit = <short id>
/// ```
pub struct CommitSpan {
    _span: tracing::span::EnteredSpan,
}

impl CommitSpan {
    pub fn enter(commit_id: &str) -> Self {
        Self {
            _span: commit_span(commit_id).entered(),
        }
    }
}

/// Span for one commit evaluation, for use with `Instrument` across awaits.
pub fn commit_span(commit_id: &str) -> tracing::Span {
    tracing::info_span!("fixgate.commit", commit = %crate::domain::short_sha(commit_id))
}

/// Emit event: commit message classified.
pub fn emit_commit_classified(commit_id: &str, classification: Classification) {
    info!(
        event = "commit.classified",
        commit = %crate::domain::short_sha(commit_id),
        classification = %classification,
    );
}

/// Emit event: a workspace was materialized for a stage.
pub fn emit_workspace_created(commit_id: &str, stage: Stage, label: &str) {
    info!(
        event = "workspace.created",
        commit = %crate::domain::short_sha(commit_id),
        stage = %stage,
        workspace = %label,
    );
}

/// Emit event: a stage's test run finished.
pub fn emit_stage_finished(commit_id: &str, stage: Stage, result: &TestRunResult) {
    info!(
        event = "stage.finished",
        commit = %crate::domain::short_sha(commit_id),
        stage = %stage,
        status = %result.status.describe(),
        duration_ms = result.duration_ms,
        truncated = result.truncated,
    );
}

/// Emit event: a stage ended without a test run (warn level).
pub fn emit_stage_aborted(commit_id: &str, stage: Stage, error: &dyn std::fmt::Display) {
    tracing::warn!(
        event = "stage.aborted",
        commit = %crate::domain::short_sha(commit_id),
        stage = %stage,
        error = %error,
    );
}

/// Emit event: the commit's terminal verdict.
pub fn emit_verdict_decided(verdict: &Verdict) {
    info!(
        event = "verdict.decided",
        commit = %crate::domain::short_sha(verdict.commit_id()),
        verdict = %verdict.tag(),
        passing = verdict.is_passing(),
    );
}
