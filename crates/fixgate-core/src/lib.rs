//! fixgate core library
//!
//! Commit classification, diff parsing, change-set extraction and the verdict
//! engine, plus the git collaborator and the tracing/metrics helpers shared by
//! the fixgate binaries.

pub mod changeset;
pub mod classifier;
pub mod config;
pub mod diff;
pub mod domain;
pub mod git;
pub mod metrics;
pub mod obs;
pub mod report;
pub mod spec;
pub mod telemetry;
pub mod verdict;

pub use changeset::{
    ChangeSet, ChangeSetExtractor, GlobTestPaths, HunkClassifier, HunkRole, InlineTestSections,
    TestPathPredicate,
};
pub use classifier::{Classification, CommitClassifier};
pub use config::{GateConfig, CONFIG_FILE_NAME, DEFAULT_SKIP_TOKEN};
pub use diff::parse_unified_diff;
pub use domain::{
    short_sha, ChangeKind, Commit, CommitMeta, FileChange, GateError, Hunk, HunkLine, LineKind,
    PatchKind, Result, Stage, TestRunResult, TestRunStatus, Verdict, VerdictTag, WorkspaceId,
};
pub use git::{capture_head_sha, is_git_repo, repo_toplevel, GitCli, VersionControl};
pub use metrics::METRICS;
pub use obs::{
    commit_span, emit_commit_classified, emit_stage_aborted, emit_stage_finished,
    emit_verdict_decided, emit_workspace_created, CommitSpan,
};
pub use report::{GateReport, EXIT_BLOCKED, EXIT_PASS, EXIT_USAGE};
pub use spec::GateSpec;
pub use telemetry::init_tracing;
pub use verdict::{decide, Evidence, StageOutcome, VerdictEngine};

/// fixgate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
