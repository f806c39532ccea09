//! Observability tests for fixgate commit evaluation tracing.
//!
//! These tests verify that the structured tracing hooks for the evaluation
//! lifecycle run cleanly under a capturing subscriber: classification,
//! workspace creation, stage completion, stage aborts and verdicts.

use fixgate_core::{
    commit_span, emit_commit_classified, emit_stage_aborted, emit_stage_finished,
    emit_verdict_decided, emit_workspace_created, Classification, CommitSpan, GateError,
    PatchKind, Stage, TestRunResult, TestRunStatus, Verdict, VerdictTag, WorkspaceId,
};
use tracing::Instrument;
use tracing_test::traced_test;

const COMMIT: &str = "0123456789abcdef0123456789abcdef01234567";

fn run_result(status: TestRunStatus) -> TestRunResult {
    TestRunResult {
        status,
        duration_ms: 1200,
        output: "running 3 tests\ntest parse ... FAILED\n".to_string(),
        truncated: false,
        workspace: WorkspaceId {
            label: "0123456-pre-fix-0001".to_string(),
            base: "fedcba9876543210fedcba9876543210fedcba98".to_string(),
            patch: PatchKind::TestOnly,
            stage: Stage::PreFix,
        },
    }
}

/// Test: emit_commit_classified creates an info-level event
#[traced_test]
#[test]
fn test_emit_commit_classified() {
    emit_commit_classified(COMMIT, Classification::Applicable);
    emit_commit_classified(COMMIT, Classification::Waived);
}

/// Test: emit_workspace_created creates an info-level event
#[traced_test]
#[test]
fn test_emit_workspace_created() {
    emit_workspace_created(COMMIT, Stage::PostFix, "0123456-post-fix-0002");
}

/// Test: emit_stage_finished reports every run status
#[traced_test]
#[test]
fn test_emit_stage_finished_for_each_status() {
    for status in [
        TestRunStatus::Passed,
        TestRunStatus::Failed { exit_code: 101 },
        TestRunStatus::Crashed { signal: Some(11) },
        TestRunStatus::TimedOut,
    ] {
        emit_stage_finished(COMMIT, Stage::PreFix, &run_result(status));
    }
}

/// Test: emit_stage_aborted creates a warn-level event
#[traced_test]
#[test]
fn test_emit_stage_aborted_logs_warning() {
    let err = GateError::PatchConflict {
        path: "src/parser.rs".to_string(),
        detail: "context mismatch at line 12".to_string(),
    };
    emit_stage_aborted(COMMIT, Stage::PreFix, &err);
}

/// Test: emit_verdict_decided accepts passing and blocking verdicts
#[traced_test]
#[test]
fn test_emit_verdict_decided() {
    let valid = Verdict::new(
        COMMIT,
        VerdictTag::Valid,
        "pre-fix: tests failed; post-fix: tests passed",
        Some(run_result(TestRunStatus::Failed { exit_code: 1 })),
        Some(run_result(TestRunStatus::Passed)),
    );
    emit_verdict_decided(&valid);

    let blocked = Verdict::new(
        "abc",
        VerdictTag::MissingRegressionTest,
        "fix commit changes no test files",
        None,
        None,
    );
    emit_verdict_decided(&blocked);
}

/// Test: CommitSpan::enter creates an entered span without panicking
#[traced_test]
#[test]
fn test_commit_span_enter_creates_span() {
    let span = CommitSpan::enter(COMMIT);
    tracing::info!("inside commit span");
    drop(span);
    assert!(logs_contain("inside commit span"));
}

/// Test: commit_span carries the short id across awaits
#[traced_test]
#[tokio::test]
async fn test_commit_span_instruments_future() {
    async {
        tokio::task::yield_now().await;
        tracing::info!("after yield");
    }
    .instrument(commit_span(COMMIT))
    .await;

    assert!(logs_contain("after yield"));
}
