//! Git integration: the version-control collaborator behind commit reads and checkouts.

use std::path::{Path, PathBuf};
use std::process::Command;

use async_trait::async_trait;
use tracing::debug;

use crate::diff::parse_unified_diff;
use crate::domain::commit::{Commit, CommitMeta};
use crate::domain::error::{GateError, Result};

/// Hash of git's empty tree, used as the diff base for root commits.
pub const EMPTY_TREE: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

/// Source of commits, diffs and trees.
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Resolve `rev` and read its parent and message.
    async fn read_meta(&self, rev: &str) -> Result<CommitMeta>;

    /// Read the commit's diff against its first parent.
    async fn read_commit(&self, meta: &CommitMeta) -> Result<Commit>;

    /// Commit ids in `range` (e.g. `base..head`), oldest first.
    async fn list_commits(&self, range: &str) -> Result<Vec<String>>;

    /// Materialize the tree of `commit_id` into the empty directory `dest`.
    ///
    /// Must not modify the source repository's working tree or refs.
    async fn checkout(&self, commit_id: &str, dest: &Path) -> Result<()>;

    /// Raw contents of `path` as of `commit_id`.
    async fn read_blob(&self, commit_id: &str, path: &str) -> Result<Vec<u8>>;
}

/// [`VersionControl`] over the `git` executable.
#[derive(Debug, Clone)]
pub struct GitCli {
    repo: PathBuf,
    program: String,
}

impl GitCli {
    pub fn new(repo: impl Into<PathBuf>) -> Self {
        Self {
            repo: repo.into(),
            program: "git".to_string(),
        }
    }

    pub fn repo(&self) -> &Path {
        &self.repo
    }

    async fn git(&self, dir: &Path, args: &[&str]) -> Result<Vec<u8>> {
        debug!(dir = %dir.display(), args = ?args, "running git");
        let output = tokio::process::Command::new(&self.program)
            .args(args)
            .current_dir(dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("LC_ALL", "C")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| GateError::Git(format!("failed to run git: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GateError::Git(format!(
                "git {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }
        Ok(output.stdout)
    }

    async fn git_text(&self, args: &[&str]) -> Result<String> {
        let stdout = self.git(&self.repo, args).await?;
        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }
}

#[async_trait]
impl VersionControl for GitCli {
    async fn read_meta(&self, rev: &str) -> Result<CommitMeta> {
        let spec = format!("{rev}^{{commit}}");
        let id = self
            .git_text(&["rev-parse", "--verify", "--quiet", &spec])
            .await
            .map_err(|_| GateError::Git(format!("unknown revision '{rev}'")))?
            .trim()
            .to_string();

        let raw = self
            .git_text(&["show", "-s", "--no-color", "--format=%P%x00%B", &id])
            .await?;
        let (parents, message) = raw
            .split_once('\0')
            .ok_or_else(|| GateError::Git(format!("unexpected `git show` output for {id}")))?;

        Ok(CommitMeta {
            parent: parents.split_whitespace().next().map(str::to_string),
            message: message.trim_end_matches('\n').to_string(),
            id,
        })
    }

    async fn read_commit(&self, meta: &CommitMeta) -> Result<Commit> {
        let base = meta.parent.as_deref().unwrap_or(EMPTY_TREE);
        // Raw bytes: file content is not necessarily UTF-8. The `-c` overrides
        // and `--no-textconv` pin the output format against user config.
        let diff = self
            .git(
                &self.repo,
                &[
                    "-c",
                    "core.quotepath=on",
                    "-c",
                    "diff.suppressBlankEmpty=false",
                    "diff",
                    "--no-color",
                    "--no-ext-diff",
                    "--no-textconv",
                    "-M",
                    "--full-index",
                    "--src-prefix=a/",
                    "--dst-prefix=b/",
                    base,
                    &meta.id,
                ],
            )
            .await?;
        let changes = parse_unified_diff(&diff)?;
        Ok(Commit::new(meta.clone(), changes))
    }

    async fn list_commits(&self, range: &str) -> Result<Vec<String>> {
        let out = self.git_text(&["rev-list", "--reverse", range]).await?;
        Ok(out.lines().map(str::to_string).collect())
    }

    async fn checkout(&self, commit_id: &str, dest: &Path) -> Result<()> {
        let repo = self.repo.to_string_lossy().into_owned();
        let dest_str = dest.to_string_lossy().into_owned();
        self.git(
            dest,
            &["clone", "--quiet", "--shared", "--no-checkout", &repo, &dest_str],
        )
        .await
        .map_err(|e| GateError::CheckoutFailure(format!("{commit_id}: {e}")))?;

        self.git(
            dest,
            &[
                "-c",
                "advice.detachedHead=false",
                "checkout",
                "--quiet",
                "--detach",
                commit_id,
            ],
        )
        .await
        .map_err(|e| GateError::CheckoutFailure(format!("{commit_id}: {e}")))?;
        Ok(())
    }

    async fn read_blob(&self, commit_id: &str, path: &str) -> Result<Vec<u8>> {
        let object = format!("{commit_id}:{path}");
        self.git(&self.repo, &["cat-file", "blob", &object]).await
    }
}

/// Capture the HEAD commit SHA from a git repository.
///
/// Runs `git rev-parse HEAD` in the given directory. Returns an error if the
/// directory is not inside a git repository or if git is not available.
pub fn capture_head_sha(repo_dir: &Path) -> Result<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(repo_dir)
        .output()
        .map_err(|e| GateError::Git(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(GateError::Git(format!("git rev-parse HEAD failed: {stderr}")));
    }

    let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if sha.is_empty() {
        return Err(GateError::Git(
            "git rev-parse HEAD returned empty output".to_string(),
        ));
    }

    Ok(sha)
}

/// Check whether a directory is inside a git work tree.
pub fn is_git_repo(dir: &Path) -> bool {
    Command::new("git")
        .args(["rev-parse", "--is-inside-work-tree"])
        .current_dir(dir)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Top-level directory of the work tree containing `dir`.
pub fn repo_toplevel(dir: &Path) -> Result<PathBuf> {
    let output = Command::new("git")
        .args(["rev-parse", "--show-toplevel"])
        .current_dir(dir)
        .output()
        .map_err(|e| GateError::Git(format!("failed to run git: {e}")))?;
    if !output.status.success() {
        return Err(GateError::Git(format!(
            "{} is not inside a git work tree",
            dir.display()
        )));
    }
    Ok(PathBuf::from(
        String::from_utf8_lossy(&output.stdout).trim().to_string(),
    ))
}
