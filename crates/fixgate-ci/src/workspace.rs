//! Workspace materialization.
//!
//! Every stage runs in its own directory allocated from a per-run
//! [`WorkspaceArena`]. A [`Workspace`] removes its directory when torn down
//! or dropped, so failure paths and panics clean up too. Filesystem work
//! runs on the blocking pool, never on an async worker thread.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use fixgate_core::metrics::METRICS;
use fixgate_core::{
    emit_workspace_created, short_sha, ChangeKind, ChangeSet, Commit, GateError, PatchKind,
    Result, Stage, VersionControl, WorkspaceId,
};
use tempfile::TempDir;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::patch;

/// Per-run directory under which all workspaces are allocated.
///
/// The arena directory itself is removed when the arena is dropped.
#[derive(Debug)]
pub struct WorkspaceArena {
    root: TempDir,
    run_id: Uuid,
    next: Mutex<u64>,
}

impl WorkspaceArena {
    /// Create the arena under `base`, or the system temp dir when `None`.
    pub fn new(base: Option<&Path>, run_id: Uuid) -> Result<Self> {
        let prefix = format!("fixgate-{}-", &run_id.simple().to_string()[..8]);
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let root = match base {
            Some(base) => {
                std::fs::create_dir_all(base)?;
                builder.tempdir_in(base)?
            }
            None => builder.tempdir()?,
        };
        debug!(arena = %root.path().display(), run_id = %run_id, "workspace arena created");
        Ok(Self {
            root,
            run_id,
            next: Mutex::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Directories currently present in the arena.
    pub fn live_entries(&self) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(self.root.path())? {
            entries.push(entry?.path());
        }
        entries.sort();
        Ok(entries)
    }

    fn next_label(&self, commit_id: &str, stage: Stage) -> String {
        let n = {
            let mut next = self.next.lock().unwrap_or_else(|p| p.into_inner());
            *next += 1;
            *next
        };
        format!("{}-{}-{n:04}", short_sha(commit_id), stage.as_str())
    }

    /// Allocate an empty, uniquely named workspace directory.
    pub fn allocate(
        &self,
        commit_id: &str,
        stage: Stage,
        base: &str,
        patch: PatchKind,
    ) -> Result<Workspace> {
        let label = self.next_label(commit_id, stage);
        let dir = tempfile::Builder::new()
            .prefix(&label)
            .rand_bytes(0)
            .tempdir_in(self.root.path())?;
        METRICS.inc_workspaces_created();
        emit_workspace_created(commit_id, stage, &label);

        Ok(Workspace {
            dir: Some(dir),
            id: WorkspaceId {
                label,
                base: base.to_string(),
                patch,
                stage,
            },
        })
    }
}

/// An isolated directory holding one tree for one stage.
#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
    id: WorkspaceId,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        match &self.dir {
            Some(dir) => dir.path(),
            None => Path::new(""),
        }
    }

    pub fn id(&self) -> &WorkspaceId {
        &self.id
    }

    pub fn stage(&self) -> Stage {
        self.id.stage
    }

    /// Remove the directory, reporting failures instead of ignoring them.
    pub fn teardown(mut self) -> Result<()> {
        if let Some(dir) = self.dir.take() {
            METRICS.inc_workspaces_removed();
            dir.close()?;
        }
        Ok(())
    }

    /// [`Workspace::teardown`] on the blocking pool.
    pub async fn remove(self) -> Result<()> {
        blocking(move || self.teardown()).await
    }

    /// Remove the directory after a failed build, logging any failure.
    async fn discard(self) {
        let label = self.id.label.clone();
        if let Err(e) = self.remove().await {
            warn!(workspace = %label, error = %e, "workspace teardown failed");
        }
    }
}

/// Run filesystem work on the blocking pool.
async fn blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| GateError::ToolingFailure(format!("filesystem task failed: {e}")))?
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            METRICS.inc_workspaces_removed();
            if let Err(e) = dir.close() {
                warn!(workspace = %self.id.label, error = %e, "failed to remove workspace");
            }
        }
    }
}

/// Builds pre-fix and post-fix workspaces for a commit.
#[derive(Clone)]
pub struct Materializer {
    vcs: Arc<dyn VersionControl>,
    arena: Arc<WorkspaceArena>,
}

impl Materializer {
    pub fn new(vcs: Arc<dyn VersionControl>, arena: Arc<WorkspaceArena>) -> Self {
        Self { vcs, arena }
    }

    pub fn arena(&self) -> &WorkspaceArena {
        &self.arena
    }

    async fn allocate(
        &self,
        commit_id: &str,
        stage: Stage,
        base: &str,
        patch: PatchKind,
    ) -> Result<Workspace> {
        let arena = Arc::clone(&self.arena);
        let commit_id = commit_id.to_string();
        let base = base.to_string();
        blocking(move || arena.allocate(&commit_id, stage, &base, patch)).await
    }

    /// Parent tree plus only the commit's test changes.
    ///
    /// # Errors
    ///
    /// - [`GateError::CheckoutFailure`] for a root commit or a failed checkout
    /// - [`GateError::PatchConflict`] when a test change does not apply cleanly
    ///   or shares a hunk with production edits
    pub async fn build_pre_fix(&self, commit: &Commit, changes: &ChangeSet) -> Result<Workspace> {
        let parent = commit.parent.as_deref().ok_or_else(|| {
            GateError::CheckoutFailure(format!(
                "{} has no parent commit to reconstruct the pre-fix tree from",
                commit.short_id()
            ))
        })?;

        if let Some(path) = changes.interleaved.iter().next() {
            return Err(GateError::PatchConflict {
                path: path.clone(),
                detail: "test and production edits share a hunk".to_string(),
            });
        }

        // binary files arrive as whole blobs from the fix commit
        let mut steps = Vec::with_capacity(changes.test_changes.len());
        for change in &changes.test_changes {
            let blob = if change.binary && change.kind != ChangeKind::Deleted {
                Some(self.vcs.read_blob(&commit.id, &change.path).await?)
            } else {
                None
            };
            steps.push((change.clone(), blob));
        }

        let workspace = self
            .allocate(&commit.id, Stage::PreFix, parent, PatchKind::TestOnly)
            .await?;
        if let Err(e) = self.vcs.checkout(parent, workspace.path()).await {
            workspace.discard().await;
            return Err(e);
        }

        // The closure owns the workspace: if this future is dropped mid-patch,
        // the directory is removed only once the patch work has stopped.
        let workspace = blocking(move || {
            let root = workspace.path();
            for (change, blob) in &steps {
                match blob {
                    Some(blob) => patch::write_blob(root, change, blob)?,
                    None if change.binary => patch::remove_file(root, &change.path)?,
                    None => patch::apply_change(root, change)?,
                }
            }
            Ok(workspace)
        })
        .await?;

        debug!(
            workspace = %workspace.id().label,
            files = changes.test_changes.len(),
            "test changes applied to parent tree"
        );
        Ok(workspace)
    }

    /// The commit's own tree.
    pub async fn build_post_fix(&self, commit: &Commit) -> Result<Workspace> {
        let workspace = self
            .allocate(&commit.id, Stage::PostFix, &commit.id, PatchKind::Full)
            .await?;
        if let Err(e) = self.vcs.checkout(&commit.id, workspace.path()).await {
            workspace.discard().await;
            return Err(e);
        }
        Ok(workspace)
    }
}
