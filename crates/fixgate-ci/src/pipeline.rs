//! Per-commit evaluation: classify, extract, run pre-fix then post-fix, decide.

use std::future::Future;
use std::sync::Arc;

use fixgate_core::metrics::METRICS;
use fixgate_core::{
    commit_span, emit_commit_classified, emit_stage_aborted, emit_stage_finished,
    emit_verdict_decided, ChangeSetExtractor, Classification, Commit, CommitClassifier, Evidence,
    GateConfig, GateError, Result, Stage, StageOutcome, Verdict, VerdictEngine, VerdictTag,
    VersionControl,
};
use tracing::{debug, warn, Instrument};

use crate::cancel::CancelSignal;
use crate::runner::TestRunner;
use crate::workspace::{Materializer, Workspace, WorkspaceArena};

/// Everything needed to evaluate one commit, shared across a batch.
pub struct CommitPipeline {
    vcs: Arc<dyn VersionControl>,
    classifier: CommitClassifier,
    extractor: ChangeSetExtractor,
    materializer: Materializer,
    runner: TestRunner,
    engine: VerdictEngine,
}

impl CommitPipeline {
    pub fn new(
        config: &GateConfig,
        vcs: Arc<dyn VersionControl>,
        arena: Arc<WorkspaceArena>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            classifier: CommitClassifier::from_config(config)?,
            extractor: ChangeSetExtractor::from_config(config)?,
            materializer: Materializer::new(Arc::clone(&vcs), arena),
            runner: TestRunner::from_config(config),
            engine: VerdictEngine::from_config(config),
            vcs,
        })
    }

    /// Swap the test runner (e.g. a custom process-tree strategy).
    pub fn with_runner(mut self, runner: TestRunner) -> Self {
        self.runner = runner;
        self
    }

    /// Swap the change-set extractor (e.g. a custom test path predicate).
    pub fn with_extractor(mut self, extractor: ChangeSetExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn arena(&self) -> &WorkspaceArena {
        self.materializer.arena()
    }

    /// Evaluate `rev` to exactly one verdict. Never fails: every error is
    /// folded into an `ERROR` (or `AMBIGUOUS_PATCH`) verdict for this commit.
    pub async fn evaluate(&self, rev: &str, cancel: &CancelSignal) -> Verdict {
        let verdict = self
            .evaluate_inner(rev, cancel)
            .instrument(commit_span(rev))
            .await;
        METRICS.inc_commits_evaluated();
        emit_verdict_decided(&verdict);
        verdict
    }

    async fn evaluate_inner(&self, rev: &str, cancel: &CancelSignal) -> Verdict {
        if let Err(e) = cancel.check() {
            return Verdict::new(rev, VerdictTag::Error, e.to_string(), None, None);
        }

        let meta = match self.vcs.read_meta(rev).await {
            Ok(meta) => meta,
            Err(e) => {
                return Verdict::new(
                    rev,
                    VerdictTag::Error,
                    format!("could not read commit: {e}"),
                    None,
                    None,
                )
            }
        };

        let classification = self.classifier.classify(&meta.message);
        emit_commit_classified(&meta.id, classification);
        if classification != Classification::Applicable {
            return self.engine.decide(&meta.id, classification, Evidence::None);
        }

        let evidence = match self.vcs.read_commit(&meta).await {
            Ok(commit) => self.gather(&commit, cancel).await,
            Err(e) => Evidence::ExtractionFailed(e),
        };

        self.engine.decide(&meta.id, classification, evidence)
    }

    /// Extract the change set and run the stages in order.
    async fn gather(&self, commit: &Commit, cancel: &CancelSignal) -> Evidence {
        let changes = match self.extractor.extract(commit) {
            Ok(changes) => changes,
            Err(e) => return Evidence::ExtractionFailed(e),
        };
        if !changes.has_test_changes() {
            return Evidence::NoTestChanges;
        }
        debug!(
            test_files = changes.test_changes.len(),
            other_files = changes.non_test_changes.len(),
            "change set extracted"
        );

        let pre_fix = self
            .run_stage(
                commit,
                Stage::PreFix,
                self.materializer.build_pre_fix(commit, &changes),
                cancel,
            )
            .await;
        if !VerdictEngine::needs_post_fix(&pre_fix) {
            return Evidence::Stages {
                pre_fix,
                post_fix: None,
            };
        }

        let post_fix = self
            .run_stage(
                commit,
                Stage::PostFix,
                self.materializer.build_post_fix(commit),
                cancel,
            )
            .await;
        Evidence::Stages {
            pre_fix,
            post_fix: Some(post_fix),
        }
    }

    /// Materialize, run and tear down one stage's workspace.
    async fn run_stage<F>(
        &self,
        commit: &Commit,
        stage: Stage,
        build: F,
        cancel: &CancelSignal,
    ) -> StageOutcome
    where
        F: Future<Output = Result<Workspace>>,
    {
        let workspace = tokio::select! {
            ws = build => ws,
            reason = cancel.cancelled() => Err(GateError::Cancelled(reason)),
        };
        let workspace = match workspace {
            Ok(ws) => ws,
            Err(e) => {
                emit_stage_aborted(&commit.id, stage, &e);
                return StageOutcome::Aborted(e);
            }
        };

        let outcome = match self.runner.run(&workspace, &commit.id, cancel).await {
            Ok(result) => {
                emit_stage_finished(&commit.id, stage, &result);
                StageOutcome::Ran(result)
            }
            Err(e) => {
                emit_stage_aborted(&commit.id, stage, &e);
                StageOutcome::Aborted(e)
            }
        };

        let label = workspace.id().label.clone();
        if let Err(e) = workspace.remove().await {
            warn!(workspace = %label, error = %e, "workspace teardown failed");
        }
        outcome
    }
}
