//! Verdicts: the single terminal classification produced per commit.

use serde::{Deserialize, Serialize};

use super::run_result::TestRunResult;

/// Verdict tag. All tags are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictTag {
    NotApplicable,
    Bypassed,
    Valid,
    MissingRegressionTest,
    FixIncomplete,
    AmbiguousPatch,
    Error,
}

impl VerdictTag {
    pub const ALL: [VerdictTag; 7] = [
        VerdictTag::NotApplicable,
        VerdictTag::Bypassed,
        VerdictTag::Valid,
        VerdictTag::MissingRegressionTest,
        VerdictTag::FixIncomplete,
        VerdictTag::AmbiguousPatch,
        VerdictTag::Error,
    ];

    /// Whether this tag lets the merge/release pipeline proceed.
    pub fn is_passing(&self) -> bool {
        matches!(
            self,
            VerdictTag::NotApplicable | VerdictTag::Bypassed | VerdictTag::Valid
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VerdictTag::NotApplicable => "NOT_APPLICABLE",
            VerdictTag::Bypassed => "BYPASSED",
            VerdictTag::Valid => "VALID",
            VerdictTag::MissingRegressionTest => "MISSING_REGRESSION_TEST",
            VerdictTag::FixIncomplete => "FIX_INCOMPLETE",
            VerdictTag::AmbiguousPatch => "AMBIGUOUS_PATCH",
            VerdictTag::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for VerdictTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The verdict for one commit.
///
/// Fields are private and there are no setters: a verdict is assembled once
/// and then only read.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Verdict {
    commit_id: String,
    tag: VerdictTag,
    diagnostic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pre_fix: Option<TestRunResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    post_fix: Option<TestRunResult>,
}

impl Verdict {
    pub fn new(
        commit_id: impl Into<String>,
        tag: VerdictTag,
        diagnostic: impl Into<String>,
        pre_fix: Option<TestRunResult>,
        post_fix: Option<TestRunResult>,
    ) -> Self {
        Self {
            commit_id: commit_id.into(),
            tag,
            diagnostic: diagnostic.into(),
            pre_fix,
            post_fix,
        }
    }

    pub fn commit_id(&self) -> &str {
        &self.commit_id
    }

    pub fn tag(&self) -> VerdictTag {
        self.tag
    }

    pub fn diagnostic(&self) -> &str {
        &self.diagnostic
    }

    /// Result of the pre-fix run, when one completed.
    pub fn pre_fix(&self) -> Option<&TestRunResult> {
        self.pre_fix.as_ref()
    }

    /// Result of the post-fix run, when one completed.
    pub fn post_fix(&self) -> Option<&TestRunResult> {
        self.post_fix.as_ref()
    }

    pub fn is_passing(&self) -> bool {
        self.tag.is_passing()
    }
}
