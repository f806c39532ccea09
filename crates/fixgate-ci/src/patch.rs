//! Strict hunk application onto a checked-out tree.
//!
//! Every context and removed line must match the file at the hunk's stated
//! old range. There is no fuzz and no offset search: a mismatch is a
//! [`GateError::PatchConflict`] naming the file. Files are compared and
//! written as bytes, so their encoding never matters.

use std::path::{Component, Path, PathBuf};

use fixgate_core::{ChangeKind, FileChange, GateError, Hunk, LineKind, Result};

/// Lines of a file plus its final-newline state.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TextFile {
    lines: Vec<Vec<u8>>,
    missing_newline: bool,
}

impl TextFile {
    fn empty() -> Self {
        Self {
            lines: Vec::new(),
            missing_newline: false,
        }
    }

    fn parse(bytes: &[u8]) -> Self {
        if bytes.is_empty() {
            return Self::empty();
        }
        let (body, missing_newline) = match bytes.strip_suffix(b"\n") {
            Some(body) => (body, false),
            None => (bytes, true),
        };
        Self {
            lines: body.split(|&b| b == b'\n').map(<[u8]>::to_vec).collect(),
            missing_newline,
        }
    }

    fn render(&self) -> Vec<u8> {
        if self.lines.is_empty() {
            return Vec::new();
        }
        let mut out = self.lines.join(&b'\n');
        if !self.missing_newline {
            out.push(b'\n');
        }
        out
    }
}

fn conflict(path: &str, detail: impl Into<String>) -> GateError {
    GateError::PatchConflict {
        path: path.to_string(),
        detail: detail.into(),
    }
}

/// Resolve a repository-relative path inside `root`, refusing escapes.
fn resolve(root: &Path, path: &str) -> Result<PathBuf> {
    let rel = Path::new(path);
    let escapes = rel
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if path.is_empty() || escapes {
        return Err(conflict(path, "path escapes the workspace"));
    }
    Ok(root.join(rel))
}

/// Resolve `path`, which must be a regular file in the parent tree.
fn existing(root: &Path, path: &str) -> Result<PathBuf> {
    let full = resolve(root, path)?;
    if !full.is_file() {
        return Err(conflict(path, "file does not exist in the parent tree"));
    }
    Ok(full)
}

/// Resolve `path` and create its parent directories.
fn prepare(root: &Path, path: &str) -> Result<PathBuf> {
    let full = resolve(root, path)?;
    if let Some(parent) = full.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(full)
}

fn read_file(root: &Path, path: &str) -> Result<TextFile> {
    let full = existing(root, path)?;
    Ok(TextFile::parse(&std::fs::read(full)?))
}

fn write_file(root: &Path, path: &str, file: &TextFile) -> Result<()> {
    std::fs::write(prepare(root, path)?, file.render())?;
    Ok(())
}

fn ensure_absent(root: &Path, path: &str) -> Result<()> {
    if resolve(root, path)?.symlink_metadata().is_ok() {
        return Err(conflict(path, "file already exists in the parent tree"));
    }
    Ok(())
}

/// Apply `hunks` to `original`, returning the patched file.
fn apply_hunks(path: &str, original: &TextFile, hunks: &[Hunk]) -> Result<TextFile> {
    let old = &original.lines;
    let mut out: Vec<Vec<u8>> = Vec::with_capacity(old.len());
    let mut cursor = 0usize;
    let mut reached_eof = None;

    for hunk in hunks {
        // an empty old range names the line after which insertion happens
        let start = if hunk.old_len == 0 {
            hunk.old_start as usize
        } else {
            (hunk.old_start as usize).saturating_sub(1)
        };
        if start < cursor {
            return Err(conflict(
                path,
                format!("hunk '{}' overlaps the previous hunk", hunk.header_text()),
            ));
        }
        if start > old.len() {
            return Err(conflict(
                path,
                format!(
                    "hunk '{}' starts past the end of the file ({} lines)",
                    hunk.header_text(),
                    old.len()
                ),
            ));
        }
        out.extend_from_slice(&old[cursor..start]);
        cursor = start;

        for line in &hunk.lines {
            match line.kind {
                LineKind::Added => out.push(line.content.clone()),
                LineKind::Context | LineKind::Removed => {
                    match old.get(cursor) {
                        Some(actual) if *actual == line.content => {}
                        Some(actual) => {
                            return Err(conflict(
                                path,
                                format!(
                                    "context mismatch at line {}: expected {:?}, found {:?}",
                                    cursor + 1,
                                    line.text(),
                                    String::from_utf8_lossy(actual)
                                ),
                            ))
                        }
                        None => {
                            return Err(conflict(
                                path,
                                format!(
                                    "hunk '{}' runs past the end of the file",
                                    hunk.header_text()
                                ),
                            ))
                        }
                    }
                    if line.kind == LineKind::Context {
                        out.push(line.content.clone());
                    }
                    cursor += 1;
                }
            }
        }

        if cursor == old.len() {
            if hunk.old_len > 0 && hunk.old_missing_newline() != original.missing_newline {
                return Err(conflict(
                    path,
                    "end-of-file newline does not match the parent tree",
                ));
            }
            reached_eof = Some(hunk.new_missing_newline());
        } else {
            reached_eof = None;
        }
    }
    out.extend_from_slice(&old[cursor..]);

    Ok(TextFile {
        lines: out,
        missing_newline: reached_eof.unwrap_or(original.missing_newline),
    })
}

/// File mode requested by the extended header, if any.
fn requested_mode(change: &FileChange) -> Option<u32> {
    change.header_lines().find_map(|line| {
        let mode = line
            .strip_prefix("new file mode ")
            .or_else(|| line.strip_prefix("new mode "))?;
        u32::from_str_radix(mode.trim(), 8).ok()
    })
}

#[cfg(unix)]
fn set_mode(full: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(full, std::fs::Permissions::from_mode(mode & 0o777))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_full: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

/// Apply a change without hunks: an empty file added or deleted, a pure
/// rename or copy, or a mode change. Contents move untouched.
fn apply_without_hunks(root: &Path, change: &FileChange) -> Result<()> {
    let path = change.path.as_str();
    match (change.kind, change.old_path.as_deref()) {
        (ChangeKind::Added, None) => {
            ensure_absent(root, path)?;
            std::fs::write(prepare(root, path)?, b"")?;
        }
        (ChangeKind::Added, Some(source)) => {
            let from = existing(root, source)?;
            ensure_absent(root, path)?;
            std::fs::copy(from, prepare(root, path)?)?;
        }
        (ChangeKind::Deleted, _) => std::fs::remove_file(existing(root, path)?)?,
        (ChangeKind::Renamed, source) => {
            let source = source.unwrap_or(path);
            let from = existing(root, source)?;
            if source != path {
                ensure_absent(root, path)?;
                std::fs::rename(from, prepare(root, path)?)?;
            }
        }
        (ChangeKind::Modified, _) => {
            existing(root, path)?;
        }
    }
    Ok(())
}

/// Apply one non-binary file change under `root`.
///
/// Binary changes are rejected here; the materializer copies their blobs.
pub fn apply_change(root: &Path, change: &FileChange) -> Result<()> {
    let path = change.path.as_str();
    if change.binary {
        return Err(conflict(path, "binary change cannot be applied as text"));
    }
    let mode = requested_mode(change);
    if mode.is_some_and(|m| m & 0o170000 == 0o120000) {
        return Err(conflict(path, "symbolic link changes are not supported"));
    }

    if change.hunks.is_empty() {
        apply_without_hunks(root, change)?;
        if change.kind == ChangeKind::Deleted {
            return Ok(());
        }
    } else {
        match (change.kind, change.old_path.as_deref()) {
            (ChangeKind::Added, None) => {
                ensure_absent(root, path)?;
                let patched = apply_hunks(path, &TextFile::empty(), &change.hunks)?;
                write_file(root, path, &patched)?;
            }
            (ChangeKind::Added, Some(source)) => {
                // copy
                ensure_absent(root, path)?;
                let original = read_file(root, source)?;
                let patched = apply_hunks(path, &original, &change.hunks)?;
                write_file(root, path, &patched)?;
            }
            (ChangeKind::Deleted, _) => {
                let original = read_file(root, path)?;
                let patched = apply_hunks(path, &original, &change.hunks)?;
                if !patched.lines.is_empty() {
                    return Err(conflict(path, "deletion leaves content behind"));
                }
                std::fs::remove_file(resolve(root, path)?)?;
                return Ok(());
            }
            (ChangeKind::Renamed, source) => {
                let source = source.unwrap_or(path);
                let original = read_file(root, source)?;
                if source != path {
                    ensure_absent(root, path)?;
                }
                let patched = apply_hunks(path, &original, &change.hunks)?;
                std::fs::remove_file(resolve(root, source)?)?;
                write_file(root, path, &patched)?;
            }
            (ChangeKind::Modified, _) => {
                let original = read_file(root, path)?;
                let patched = apply_hunks(path, &original, &change.hunks)?;
                write_file(root, path, &patched)?;
            }
        }
    }

    if let Some(mode) = mode {
        set_mode(&resolve(root, path)?, mode)?;
    }
    Ok(())
}

/// Write a blob for a binary change, removing the rename source if any.
pub fn write_blob(root: &Path, change: &FileChange, contents: &[u8]) -> Result<()> {
    std::fs::write(prepare(root, &change.path)?, contents)?;
    if let (ChangeKind::Renamed, Some(source)) = (change.kind, change.old_path.as_deref()) {
        if source != change.path {
            let source = resolve(root, source)?;
            if source.exists() {
                std::fs::remove_file(source)?;
            }
        }
    }
    Ok(())
}

/// Remove a deleted binary file.
pub fn remove_file(root: &Path, path: &str) -> Result<()> {
    std::fs::remove_file(existing(root, path)?)?;
    Ok(())
}
