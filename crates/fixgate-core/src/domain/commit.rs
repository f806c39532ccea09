//! Commits, file-level changes and hunks as read from version control.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Identity and message of a commit, read before its diff.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitMeta {
    /// Full commit hash.
    pub id: String,

    /// First parent (`None` for a root commit).
    pub parent: Option<String>,

    /// Full commit message.
    pub message: String,
}

impl CommitMeta {
    /// Abbreviated hash for logs and directory names.
    pub fn short_id(&self) -> &str {
        short_sha(&self.id)
    }
}

/// A commit together with its full diff against the first parent.
///
/// Immutable once read: nothing in the gate mutates a commit after the
/// version-control collaborator produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Commit {
    pub id: String,
    pub parent: Option<String>,
    pub message: String,
    /// File-level changes in diff order.
    pub changes: Vec<FileChange>,
}

impl Commit {
    pub fn new(meta: CommitMeta, changes: Vec<FileChange>) -> Self {
        Self {
            id: meta.id,
            parent: meta.parent,
            message: meta.message,
            changes,
        }
    }

    pub fn short_id(&self) -> &str {
        short_sha(&self.id)
    }

    /// Render the full diff back into the exact bytes it was parsed from.
    pub fn render_diff(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for change in &self.changes {
            change.render(&mut out);
        }
        out
    }
}

/// First 12 characters of a hash (or the whole string if shorter).
pub fn short_sha(id: &str) -> &str {
    &id[..12.min(id.len())]
}

/// Kind of file-level change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed,
}

/// One file's section of a unified diff.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileChange {
    /// Destination path (the removed path for deletions).
    pub path: String,

    /// Source path, when it differs from `path` (renames).
    pub old_path: Option<String>,

    pub kind: ChangeKind,

    /// Raw header lines preceding the first hunk (`diff --git`, `index`,
    /// `---`/`+++`, rename and mode lines, binary markers).
    pub header: Vec<Vec<u8>>,

    /// Whether git reported the file as binary (no textual hunks).
    pub binary: bool,

    /// Position of this file in the original diff.
    pub index: usize,

    pub hunks: Vec<Hunk>,
}

impl FileChange {
    /// Path the change reads from in the parent tree.
    pub fn source_path(&self) -> &str {
        self.old_path.as_deref().unwrap_or(&self.path)
    }

    /// Whether any hunk adds or removes a line.
    pub fn has_line_changes(&self) -> bool {
        self.hunks.iter().any(Hunk::has_changes)
    }

    /// Copy of this change carrying only the given hunks.
    pub fn with_hunks(&self, hunks: Vec<Hunk>) -> Self {
        Self {
            path: self.path.clone(),
            old_path: self.old_path.clone(),
            kind: self.kind,
            header: self.header.clone(),
            binary: self.binary,
            index: self.index,
            hunks,
        }
    }

    /// Header lines as text, for inspection.
    pub fn header_lines(&self) -> impl Iterator<Item = Cow<'_, str>> {
        self.header.iter().map(|l| String::from_utf8_lossy(l))
    }

    /// Append this file's section of the diff to `out`.
    pub fn render(&self, out: &mut Vec<u8>) {
        for line in &self.header {
            out.extend_from_slice(line);
            out.push(b'\n');
        }
        for hunk in &self.hunks {
            hunk.render(out);
        }
    }
}

/// Kind of a line inside a hunk.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LineKind {
    Context,
    Added,
    Removed,
}

impl LineKind {
    fn prefix(&self) -> u8 {
        match self {
            LineKind::Context => b' ',
            LineKind::Added => b'+',
            LineKind::Removed => b'-',
        }
    }
}

/// One line of a hunk body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HunkLine {
    pub kind: LineKind,

    /// Line content without the diff prefix and without the trailing `\n`.
    /// Kept as raw bytes: files need not be UTF-8.
    pub content: Vec<u8>,

    /// The `\ No newline at end of file` line that followed this one, verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eof_marker: Option<String>,
}

impl HunkLine {
    pub fn new(kind: LineKind, content: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            content: content.into(),
            eof_marker: None,
        }
    }

    /// Content decoded for display and marker matching.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }

    pub fn missing_newline(&self) -> bool {
        self.eof_marker.is_some()
    }
}

/// A contiguous block of changes within one file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Hunk {
    /// 1-based first line of the origin range (0 when the range is empty).
    pub old_start: u32,
    pub old_len: u32,
    /// 1-based first line of the destination range (0 when the range is empty).
    pub new_start: u32,
    pub new_len: u32,

    /// Text after the closing `@@` (the enclosing function/item heading).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,

    /// The `@@ ... @@` line, verbatim.
    pub header: Vec<u8>,

    pub lines: Vec<HunkLine>,
}

impl Hunk {
    /// Whether the hunk adds or removes anything.
    pub fn has_changes(&self) -> bool {
        self.lines.iter().any(|l| l.kind != LineKind::Context)
    }

    /// Lines the hunk expects to find in the origin file, in order.
    pub fn old_lines(&self) -> impl Iterator<Item = &HunkLine> {
        self.lines.iter().filter(|l| l.kind != LineKind::Added)
    }

    /// Lines the hunk leaves in the destination file, in order.
    pub fn new_lines(&self) -> impl Iterator<Item = &HunkLine> {
        self.lines.iter().filter(|l| l.kind != LineKind::Removed)
    }

    /// Whether the origin side ends without a trailing newline.
    pub fn old_missing_newline(&self) -> bool {
        self.old_lines().last().is_some_and(HunkLine::missing_newline)
    }

    /// Whether the destination side ends without a trailing newline.
    pub fn new_missing_newline(&self) -> bool {
        self.new_lines().last().is_some_and(HunkLine::missing_newline)
    }

    /// Last origin line covered by the hunk (inclusive), or `old_start` when empty.
    pub fn old_end(&self) -> u32 {
        if self.old_len == 0 {
            self.old_start
        } else {
            self.old_start + self.old_len - 1
        }
    }

    /// The `@@ ... @@` line decoded for messages.
    pub fn header_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.header)
    }

    fn render(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.header);
        out.push(b'\n');
        for line in &self.lines {
            out.push(line.kind.prefix());
            out.extend_from_slice(&line.content);
            out.push(b'\n');
            if let Some(marker) = &line.eof_marker {
                out.extend_from_slice(marker.as_bytes());
                out.push(b'\n');
            }
        }
    }
}
