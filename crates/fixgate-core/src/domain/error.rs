//! Domain-level error taxonomy for fixgate.

/// Stage of a commit evaluation in which an error surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    PreFix,
    PostFix,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::PreFix => "pre-fix",
            Stage::PostFix => "post-fix",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// fixgate errors.
///
/// Every variant is scoped to the single commit under evaluation; the
/// pipeline folds them into that commit's verdict instead of aborting a batch.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("malformed diff: {0}")]
    MalformedDiff(String),

    #[error("patch conflict in {path}: {detail}")]
    PatchConflict { path: String, detail: String },

    #[error("test command could not be launched: {0}")]
    ToolingFailure(String),

    #[error("test command timed out after {limit_secs}s")]
    Timeout { limit_secs: u64 },

    #[error("checkout failed: {0}")]
    CheckoutFailure(String),

    #[error("evaluation cancelled: {0}")]
    Cancelled(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("git error: {0}")]
    Git(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl GateError {
    /// Whether this error means the test/production split could not be
    /// reconstructed, as opposed to an operational failure.
    pub fn is_conflict(&self) -> bool {
        matches!(self, GateError::PatchConflict { .. })
    }
}

/// Result type for fixgate operations.
pub type Result<T> = std::result::Result<T, GateError>;
