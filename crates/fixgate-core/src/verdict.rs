//! Verdict engine: fold classification and stage outcomes into one verdict.
//!
//! Pure. The pipeline gathers [`Evidence`]; nothing here touches the
//! filesystem or spawns processes.

use crate::classifier::Classification;
use crate::domain::error::{GateError, Stage};
use crate::domain::run_result::{TestRunResult, TestRunStatus};
use crate::domain::verdict::{Verdict, VerdictTag};

/// How one stage ended: the tests ran, or the stage could not produce a run.
#[derive(Debug)]
pub enum StageOutcome {
    Ran(TestRunResult),
    /// Materialization or launch failed; no test result exists.
    Aborted(GateError),
}

impl StageOutcome {
    pub fn result(&self) -> Option<&TestRunResult> {
        match self {
            StageOutcome::Ran(r) => Some(r),
            StageOutcome::Aborted(_) => None,
        }
    }

    fn into_result(self) -> Option<TestRunResult> {
        match self {
            StageOutcome::Ran(r) => Some(r),
            StageOutcome::Aborted(_) => None,
        }
    }
}

/// What the pipeline learned about an applicable commit.
#[derive(Debug)]
pub enum Evidence {
    /// Nothing gathered (not applicable, waived, or never got that far).
    None,
    /// Reading or partitioning the diff failed.
    ExtractionFailed(GateError),
    /// The commit changes no test files.
    NoTestChanges,
    /// At least the pre-fix stage was attempted. `post_fix` is `None` when the
    /// pre-fix outcome already decides the verdict.
    Stages {
        pre_fix: StageOutcome,
        post_fix: Option<StageOutcome>,
    },
}

/// Decision table over classification and evidence.
#[derive(Debug, Clone, Copy)]
pub struct VerdictEngine {
    tail_lines: usize,
    timeout_secs: Option<u64>,
}

impl Default for VerdictEngine {
    fn default() -> Self {
        Self::new(20)
    }
}

impl VerdictEngine {
    /// `tail_lines` bounds how much captured output a diagnostic quotes.
    pub fn new(tail_lines: usize) -> Self {
        Self {
            tail_lines,
            timeout_secs: None,
        }
    }

    pub fn from_config(config: &crate::config::GateConfig) -> Self {
        Self {
            tail_lines: config.diagnostic_tail_lines,
            timeout_secs: Some(config.timeout_secs),
        }
    }

    fn timeout_message(&self, stage: Stage, result: &TestRunResult) -> String {
        match self.timeout_secs {
            Some(limit_secs) => format!("{stage}: {}", GateError::Timeout { limit_secs }),
            None => format!(
                "{stage}: test command timed out after {}ms",
                result.duration_ms
            ),
        }
    }

    /// Whether evaluation should continue to the post-fix stage.
    ///
    /// Only a pre-fix run that actually failed leaves the verdict open.
    pub fn needs_post_fix(pre_fix: &StageOutcome) -> bool {
        matches!(pre_fix, StageOutcome::Ran(r) if r.status.failed())
    }

    pub fn decide(
        &self,
        commit_id: &str,
        classification: Classification,
        evidence: Evidence,
    ) -> Verdict {
        match classification {
            Classification::NotApplicable => Verdict::new(
                commit_id,
                VerdictTag::NotApplicable,
                "commit message makes no bug-fix claim",
                None,
                None,
            ),
            Classification::Waived => Verdict::new(
                commit_id,
                VerdictTag::Bypassed,
                "regression check waived by skip token",
                None,
                None,
            ),
            Classification::Applicable => self.decide_applicable(commit_id, evidence),
        }
    }

    fn decide_applicable(&self, commit_id: &str, evidence: Evidence) -> Verdict {
        let (pre_fix, post_fix) = match evidence {
            Evidence::None => {
                return Verdict::new(
                    commit_id,
                    VerdictTag::Error,
                    "no evaluation evidence was gathered",
                    None,
                    None,
                )
            }
            Evidence::ExtractionFailed(err) => {
                return Verdict::new(
                    commit_id,
                    VerdictTag::Error,
                    format!("could not read the commit's changes: {err}"),
                    None,
                    None,
                )
            }
            Evidence::NoTestChanges => {
                return Verdict::new(
                    commit_id,
                    VerdictTag::MissingRegressionTest,
                    "fix commit changes no test files",
                    None,
                    None,
                )
            }
            Evidence::Stages { pre_fix, post_fix } => (pre_fix, post_fix),
        };

        let pre = match pre_fix {
            StageOutcome::Aborted(GateError::PatchConflict { path, detail }) => {
                return Verdict::new(
                    commit_id,
                    VerdictTag::AmbiguousPatch,
                    format!(
                        "{}: test changes in {path} cannot be separated from the fix ({detail})",
                        Stage::PreFix
                    ),
                    None,
                    None,
                );
            }
            StageOutcome::Aborted(err) => {
                return Verdict::new(
                    commit_id,
                    VerdictTag::Error,
                    format!("{}: {err}", Stage::PreFix),
                    None,
                    None,
                );
            }
            StageOutcome::Ran(result) => result,
        };

        match pre.status {
            TestRunStatus::TimedOut => {
                let diagnostic = self.with_tail(
                    self.timeout_message(Stage::PreFix, &pre),
                    Stage::PreFix,
                    &pre,
                );
                return Verdict::new(commit_id, VerdictTag::Error, diagnostic, Some(pre), None);
            }
            TestRunStatus::Passed => {
                let diagnostic = self.with_tail(
                    format!(
                        "{}: tests passed without the fix; the added tests do not catch the defect",
                        Stage::PreFix
                    ),
                    Stage::PreFix,
                    &pre,
                );
                let post = post_fix.and_then(StageOutcome::into_result);
                return Verdict::new(
                    commit_id,
                    VerdictTag::MissingRegressionTest,
                    diagnostic,
                    Some(pre),
                    post,
                );
            }
            TestRunStatus::Failed { .. } | TestRunStatus::Crashed { .. } => {}
        }

        let post = match post_fix {
            None => {
                return Verdict::new(
                    commit_id,
                    VerdictTag::Error,
                    format!("{}: stage did not run", Stage::PostFix),
                    Some(pre),
                    None,
                )
            }
            Some(StageOutcome::Aborted(err)) => {
                return Verdict::new(
                    commit_id,
                    VerdictTag::Error,
                    format!("{}: {err}", Stage::PostFix),
                    Some(pre),
                    None,
                )
            }
            Some(StageOutcome::Ran(result)) => result,
        };

        let (tag, diagnostic) = match post.status {
            TestRunStatus::Passed => (
                VerdictTag::Valid,
                format!(
                    "{}: tests {}; {}: tests passed",
                    Stage::PreFix,
                    pre.status.describe(),
                    Stage::PostFix
                ),
            ),
            TestRunStatus::TimedOut => (
                VerdictTag::Error,
                self.with_tail(
                    self.timeout_message(Stage::PostFix, &post),
                    Stage::PostFix,
                    &post,
                ),
            ),
            TestRunStatus::Failed { .. } | TestRunStatus::Crashed { .. } => (
                VerdictTag::FixIncomplete,
                self.with_tail(
                    format!(
                        "{}: tests still {} with the fix applied",
                        Stage::PostFix,
                        post.status.describe()
                    ),
                    Stage::PostFix,
                    &post,
                ),
            ),
        };

        Verdict::new(commit_id, tag, diagnostic, Some(pre), Some(post))
    }

    fn with_tail(&self, mut message: String, stage: Stage, result: &TestRunResult) -> String {
        if self.tail_lines == 0 {
            return message;
        }
        let tail = result.output_tail(self.tail_lines);
        if !tail.trim().is_empty() {
            message.push_str(&format!(
                "\n--- {stage} output (last {} lines) ---\n{tail}",
                self.tail_lines
            ));
        }
        message
    }
}

/// Decide with the default diagnostic tail length.
pub fn decide(commit_id: &str, classification: Classification, evidence: Evidence) -> Verdict {
    VerdictEngine::default().decide(commit_id, classification, evidence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::run_result::{PatchKind, WorkspaceId};

    const ID: &str = "0123456789abcdef0123456789abcdef01234567";

    fn run(stage: Stage, status: TestRunStatus, output: &str) -> TestRunResult {
        TestRunResult {
            status,
            duration_ms: 1500,
            output: output.to_string(),
            truncated: false,
            workspace: WorkspaceId {
                label: "ws-0001".to_string(),
                base: ID.to_string(),
                patch: match stage {
                    Stage::PreFix => PatchKind::TestOnly,
                    Stage::PostFix => PatchKind::Full,
                },
                stage,
            },
        }
    }

    fn failed() -> TestRunStatus {
        TestRunStatus::Failed { exit_code: 1 }
    }

    #[test]
    fn test_not_applicable_and_waived() {
        let v = decide(ID, Classification::NotApplicable, Evidence::None);
        assert_eq!(v.tag(), VerdictTag::NotApplicable);

        // waived ignores whatever evidence might exist
        let v = decide(
            ID,
            Classification::Waived,
            Evidence::Stages {
                pre_fix: StageOutcome::Ran(run(Stage::PreFix, TestRunStatus::Passed, "")),
                post_fix: None,
            },
        );
        assert_eq!(v.tag(), VerdictTag::Bypassed);
        assert!(v.pre_fix().is_none());
    }

    #[test]
    fn test_no_test_changes() {
        let v = decide(ID, Classification::Applicable, Evidence::NoTestChanges);
        assert_eq!(v.tag(), VerdictTag::MissingRegressionTest);
    }

    #[test]
    fn test_extraction_failure_is_error() {
        let v = decide(
            ID,
            Classification::Applicable,
            Evidence::ExtractionFailed(GateError::MalformedDiff("bad hunk".to_string())),
        );
        assert_eq!(v.tag(), VerdictTag::Error);
        assert!(v.diagnostic().contains("bad hunk"));
    }

    #[test]
    fn test_valid() {
        let v = decide(
            ID,
            Classification::Applicable,
            Evidence::Stages {
                pre_fix: StageOutcome::Ran(run(Stage::PreFix, failed(), "panic: index out of range")),
                post_fix: Some(StageOutcome::Ran(run(Stage::PostFix, TestRunStatus::Passed, "ok"))),
            },
        );
        assert_eq!(v.tag(), VerdictTag::Valid);
        assert!(v.pre_fix().is_some());
        assert!(v.post_fix().is_some());
    }

    #[test]
    fn test_crash_counts_as_failure() {
        let v = decide(
            ID,
            Classification::Applicable,
            Evidence::Stages {
                pre_fix: StageOutcome::Ran(run(
                    Stage::PreFix,
                    TestRunStatus::Crashed { signal: Some(11) },
                    "",
                )),
                post_fix: Some(StageOutcome::Ran(run(Stage::PostFix, TestRunStatus::Passed, ""))),
            },
        );
        assert_eq!(v.tag(), VerdictTag::Valid);
    }

    #[test]
    fn test_fix_incomplete_quotes_post_fix_output() {
        let v = decide(
            ID,
            Classification::Applicable,
            Evidence::Stages {
                pre_fix: StageOutcome::Ran(run(Stage::PreFix, failed(), "")),
                post_fix: Some(StageOutcome::Ran(run(
                    Stage::PostFix,
                    failed(),
                    "line1\nassertion failed: left == right",
                ))),
            },
        );
        assert_eq!(v.tag(), VerdictTag::FixIncomplete);
        assert!(v.diagnostic().starts_with("post-fix"));
        assert!(v.diagnostic().contains("assertion failed"));
    }

    #[test]
    fn test_pre_fix_pass_is_missing_regression_test() {
        for post in [
            None,
            Some(StageOutcome::Ran(run(Stage::PostFix, failed(), ""))),
            Some(StageOutcome::Aborted(GateError::ToolingFailure("gone".to_string()))),
        ] {
            let v = decide(
                ID,
                Classification::Applicable,
                Evidence::Stages {
                    pre_fix: StageOutcome::Ran(run(Stage::PreFix, TestRunStatus::Passed, "")),
                    post_fix: post,
                },
            );
            assert_eq!(v.tag(), VerdictTag::MissingRegressionTest);
            assert!(v.diagnostic().starts_with("pre-fix"));
        }
    }

    #[test]
    fn test_patch_conflict_names_file() {
        let v = decide(
            ID,
            Classification::Applicable,
            Evidence::Stages {
                pre_fix: StageOutcome::Aborted(GateError::PatchConflict {
                    path: "src/lib.rs".to_string(),
                    detail: "context mismatch at line 12".to_string(),
                }),
                post_fix: None,
            },
        );
        assert_eq!(v.tag(), VerdictTag::AmbiguousPatch);
        assert!(v.diagnostic().contains("src/lib.rs"));
    }

    #[test]
    fn test_pre_fix_timeout_is_error_naming_stage() {
        let v = decide(
            ID,
            Classification::Applicable,
            Evidence::Stages {
                pre_fix: StageOutcome::Ran(run(Stage::PreFix, TestRunStatus::TimedOut, "looping")),
                post_fix: None,
            },
        );
        assert_eq!(v.tag(), VerdictTag::Error);
        assert!(v.diagnostic().contains("pre-fix"));
        assert!(v.diagnostic().contains("timed out"));
    }

    #[test]
    fn test_post_fix_timeout_is_error() {
        let v = decide(
            ID,
            Classification::Applicable,
            Evidence::Stages {
                pre_fix: StageOutcome::Ran(run(Stage::PreFix, failed(), "")),
                post_fix: Some(StageOutcome::Ran(run(Stage::PostFix, TestRunStatus::TimedOut, ""))),
            },
        );
        assert_eq!(v.tag(), VerdictTag::Error);
        assert!(v.diagnostic().contains("post-fix"));
    }

    #[test]
    fn test_tooling_failure_is_error_not_missing_test() {
        let v = decide(
            ID,
            Classification::Applicable,
            Evidence::Stages {
                pre_fix: StageOutcome::Aborted(GateError::ToolingFailure(
                    "no-such-binary: No such file or directory".to_string(),
                )),
                post_fix: None,
            },
        );
        assert_eq!(v.tag(), VerdictTag::Error);
        assert!(v.diagnostic().contains("no-such-binary"));
    }

    #[test]
    fn test_cancellation_is_error() {
        let v = decide(
            ID,
            Classification::Applicable,
            Evidence::Stages {
                pre_fix: StageOutcome::Ran(run(Stage::PreFix, failed(), "")),
                post_fix: Some(StageOutcome::Aborted(GateError::Cancelled(
                    "deadline reached".to_string(),
                ))),
            },
        );
        assert_eq!(v.tag(), VerdictTag::Error);
        assert!(v.diagnostic().contains("cancelled"));
        assert!(v.pre_fix().is_some());
    }

    #[test]
    fn test_needs_post_fix() {
        assert!(VerdictEngine::needs_post_fix(&StageOutcome::Ran(run(
            Stage::PreFix,
            failed(),
            ""
        ))));
        assert!(!VerdictEngine::needs_post_fix(&StageOutcome::Ran(run(
            Stage::PreFix,
            TestRunStatus::Passed,
            ""
        ))));
        assert!(!VerdictEngine::needs_post_fix(&StageOutcome::Aborted(
            GateError::CheckoutFailure("no parent".to_string())
        )));
    }

    #[test]
    fn test_timeout_names_configured_limit() {
        let config = crate::config::GateConfig {
            timeout_secs: 7,
            ..Default::default()
        };
        let v = VerdictEngine::from_config(&config).decide(
            ID,
            Classification::Applicable,
            Evidence::Stages {
                pre_fix: StageOutcome::Ran(run(Stage::PreFix, TestRunStatus::TimedOut, "")),
                post_fix: None,
            },
        );
        assert_eq!(v.diagnostic(), "pre-fix: test command timed out after 7s");
    }

    #[test]
    fn test_zero_tail_lines_omits_output() {
        let engine = VerdictEngine::new(0);
        let v = engine.decide(
            ID,
            Classification::Applicable,
            Evidence::Stages {
                pre_fix: StageOutcome::Ran(run(Stage::PreFix, TestRunStatus::Passed, "noise")),
                post_fix: None,
            },
        );
        assert!(!v.diagnostic().contains("noise"));
    }
}
