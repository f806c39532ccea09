//! fixgate CI - regression validation runs
//!
//! Provides the execution side of the gate:
//! - Isolated pre-fix / post-fix workspaces reconstructed from git
//! - Strict application of a commit's test hunks onto its parent tree
//! - Bounded, cancellable test command execution
//! - Per-commit pipelines and concurrent batch evaluation

pub mod batch;
pub mod cancel;
pub mod patch;
pub mod pipeline;
pub mod runner;
pub mod workspace;

// Re-export key types
pub use batch::BatchEvaluator;
pub use cancel::CancelSignal;
pub use pipeline::CommitPipeline;
pub use runner::{ProcessGroupTree, ProcessTree, RunLimits, TestRunner};
pub use workspace::{Materializer, Workspace, WorkspaceArena};
