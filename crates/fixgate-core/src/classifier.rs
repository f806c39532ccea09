//! Commit classifier: does a commit claim to fix a defect, and is validation waived?

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::GateConfig;
use crate::domain::error::{GateError, Result};

/// Classifier outcome for one commit message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Classification {
    /// The message claims a fix; regression validation applies.
    Applicable,
    /// No fix claim.
    NotApplicable,
    /// The skip token is present.
    Waived,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Applicable => "applicable",
            Classification::NotApplicable => "not-applicable",
            Classification::Waived => "waived",
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compiled fix patterns plus the skip token.
#[derive(Debug, Clone)]
pub struct CommitClassifier {
    fix_patterns: Vec<Regex>,
    skip_token: String,
}

impl CommitClassifier {
    /// Compile `patterns`. Prefix forms should anchor themselves with `^`;
    /// matching is case-sensitive unless a pattern opts out.
    pub fn new(patterns: &[String], skip_token: impl Into<String>) -> Result<Self> {
        let fix_patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p)
                    .map_err(|e| GateError::Config(format!("invalid fix pattern '{p}': {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            fix_patterns,
            skip_token: skip_token.into(),
        })
    }

    pub fn from_config(config: &GateConfig) -> Result<Self> {
        Self::new(&config.fix_patterns, config.skip_token.clone())
    }

    /// Classify a commit message. Pure; the skip token takes precedence.
    pub fn classify(&self, message: &str) -> Classification {
        if message.contains(&self.skip_token) {
            return Classification::Waived;
        }
        if self.fix_patterns.iter().any(|re| re.is_match(message)) {
            Classification::Applicable
        } else {
            Classification::NotApplicable
        }
    }
}
