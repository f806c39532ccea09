//! Concurrent evaluation of a set of commits.
//!
//! One task per commit, at most `max_concurrency` running at once. Each task
//! holds its permit across both stages. A panicking task becomes an `ERROR`
//! verdict for its commit and never affects siblings.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use fixgate_core::metrics::METRICS;
use fixgate_core::{CommitSpan, GateReport, Verdict, VerdictTag};
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

use crate::cancel::CancelSignal;
use crate::pipeline::CommitPipeline;

/// Evaluates batches of commits with bounded concurrency.
pub struct BatchEvaluator {
    pipeline: Arc<CommitPipeline>,
    max_concurrency: usize,
}

impl BatchEvaluator {
    pub fn new(pipeline: Arc<CommitPipeline>, max_concurrency: usize) -> Self {
        Self {
            pipeline,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Evaluate every commit in `revs` and collect the verdicts.
    ///
    /// Duplicate revisions are evaluated once.
    #[instrument(skip_all, fields(commits = revs.len(), max_concurrency = self.max_concurrency))]
    pub async fn evaluate_all(&self, revs: &[String], cancel: &CancelSignal) -> GateReport {
        let start = Instant::now();
        let mut seen = BTreeSet::new();
        let sem = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks = Vec::new();

        for rev in revs {
            if !seen.insert(rev.clone()) {
                continue;
            }
            let pipeline = Arc::clone(&self.pipeline);
            let cancel = cancel.clone();
            let sem = Arc::clone(&sem);
            let task_rev = rev.clone();

            let task = tokio::spawn(async move {
                let _permit = sem.acquire_owned().await.ok();
                pipeline.evaluate(&task_rev, &cancel).await
            });
            tasks.push((rev.clone(), task));
        }

        let mut report = GateReport::new(self.pipeline.arena().run_id());
        for (rev, task) in tasks {
            let verdict = match task.await {
                Ok(verdict) => verdict,
                Err(e) => {
                    let _span = CommitSpan::enter(&rev);
                    warn!(error = %e, "evaluation task failed");
                    METRICS.inc_commits_evaluated();
                    Verdict::new(
                        rev.as_str(),
                        VerdictTag::Error,
                        format!("evaluation aborted unexpectedly: {e}"),
                        None,
                        None,
                    )
                }
            };
            report.insert(verdict);
        }

        info!(
            commits = report.len(),
            passing = report.is_passing(),
            duration_ms = start.elapsed().as_millis() as u64,
            "batch evaluated"
        );
        METRICS.flush();
        report
    }
}
