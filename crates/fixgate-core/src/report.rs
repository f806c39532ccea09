//! Gate report: the set of verdicts for one invocation and its exit status.
//!
//! Serialized as `fixgate-report.json` (or wherever `--report` points).

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::error::Result;
use crate::domain::verdict::{Verdict, VerdictTag};
use crate::spec::GateSpec;

/// Exit status when every verdict lets the pipeline proceed.
pub const EXIT_PASS: i32 = 0;
/// Exit status when at least one verdict blocks the pipeline.
pub const EXIT_BLOCKED: i32 = 1;
/// Exit status for usage or configuration errors before evaluation.
pub const EXIT_USAGE: i32 = 2;

/// Verdicts keyed by commit id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GateReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,

    /// Repository, command and configuration the verdicts were produced under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<GateSpec>,

    pub verdicts: BTreeMap<String, Verdict>,
}

impl Default for GateReport {
    fn default() -> Self {
        Self::new(Uuid::new_v4())
    }
}

impl GateReport {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            generated_at: Utc::now(),
            spec: None,
            verdicts: BTreeMap::new(),
        }
    }

    pub fn with_spec(mut self, spec: GateSpec) -> Self {
        self.spec = Some(spec);
        self
    }

    /// Record a verdict. A commit listed twice keeps its first verdict.
    pub fn insert(&mut self, verdict: Verdict) {
        self.verdicts
            .entry(verdict.commit_id().to_string())
            .or_insert(verdict);
    }

    pub fn get(&self, commit_id: &str) -> Option<&Verdict> {
        self.verdicts.get(commit_id)
    }

    pub fn len(&self) -> usize {
        self.verdicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verdicts.is_empty()
    }

    /// Whether every verdict is NOT_APPLICABLE, BYPASSED or VALID.
    pub fn is_passing(&self) -> bool {
        self.verdicts.values().all(Verdict::is_passing)
    }

    /// Process exit status a merge/release pipeline acts on.
    pub fn exit_code(&self) -> i32 {
        if self.is_passing() {
            EXIT_PASS
        } else {
            EXIT_BLOCKED
        }
    }

    /// Number of verdicts per tag, every tag present.
    pub fn counts(&self) -> BTreeMap<VerdictTag, usize> {
        let mut counts: BTreeMap<VerdictTag, usize> =
            VerdictTag::ALL.iter().map(|t| (*t, 0)).collect();
        for verdict in self.verdicts.values() {
            *counts.entry(verdict.tag()).or_default() += 1;
        }
        counts
    }

    /// Blocking verdicts, in commit-id order.
    pub fn blocking(&self) -> impl Iterator<Item = &Verdict> {
        self.verdicts.values().filter(|v| !v.is_passing())
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the report as pretty JSON to `path`.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json_pretty()?)?;
        Ok(())
    }

    pub fn read_json(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}
