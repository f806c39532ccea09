//! Unified diff parsing.
//!
//! Parses `git diff` output into [`FileChange`]s. The input is handled as
//! bytes and every byte is kept (raw header lines, hunk headers,
//! `\ No newline at end of file` markers, carriage returns, content in any
//! encoding) so that [`FileChange::render`] reproduces it exactly.

use std::sync::OnceLock;

use regex::bytes::Regex;

use crate::domain::commit::{ChangeKind, FileChange, Hunk, HunkLine, LineKind};
use crate::domain::error::{GateError, Result};

fn hunk_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?-u)^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@(.*)$").expect("static regex")
    })
}

/// Parse the raw output of `git diff` into file changes, in diff order.
///
/// # Errors
///
/// Returns [`GateError::MalformedDiff`] when a hunk header cannot be parsed,
/// a hunk body does not match its stated line ranges, or text appears outside
/// any file section.
pub fn parse_unified_diff(diff: impl AsRef<[u8]>) -> Result<Vec<FileChange>> {
    let mut lines: Vec<&[u8]> = diff.as_ref().split(|&b| b == b'\n').collect();
    if lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }

    let mut files = Vec::new();
    let mut pos = 0;
    while pos < lines.len() {
        let line = lines[pos];
        if !line.starts_with(b"diff --git ") {
            return Err(GateError::MalformedDiff(format!(
                "line {}: expected 'diff --git' header, found '{}'",
                pos + 1,
                truncate(line)
            )));
        }
        let (file, next) = parse_file(&lines, pos, files.len())?;
        files.push(file);
        pos = next;
    }
    Ok(files)
}

/// Parse one file section starting at `start` (the `diff --git` line).
fn parse_file(lines: &[&[u8]], start: usize, index: usize) -> Result<(FileChange, usize)> {
    let (git_old, git_new) =
        split_git_header(&String::from_utf8_lossy(&lines[start][b"diff --git ".len()..]));

    let mut header = vec![lines[start].to_vec()];
    let mut kind = ChangeKind::Modified;
    let mut minus_path: Option<String> = None;
    let mut plus_path: Option<String> = None;
    let mut rename_from: Option<String> = None;
    let mut rename_to: Option<String> = None;
    let mut copy_from: Option<String> = None;
    let mut binary = false;

    let mut pos = start + 1;
    while pos < lines.len() {
        let raw = lines[pos];
        if raw.starts_with(b"diff --git ") || raw.starts_with(b"@@") {
            break;
        }
        let line = String::from_utf8_lossy(raw);
        if line.starts_with("new file mode") {
            kind = ChangeKind::Added;
        } else if line.starts_with("deleted file mode") {
            kind = ChangeKind::Deleted;
        } else if let Some(p) = line.strip_prefix("rename from ") {
            rename_from = Some(unquote_path(p));
        } else if let Some(p) = line.strip_prefix("rename to ") {
            rename_to = Some(unquote_path(p));
        } else if let Some(p) = line.strip_prefix("copy from ") {
            copy_from = Some(unquote_path(p));
        } else if let Some(p) = line.strip_prefix("copy to ") {
            rename_to = Some(unquote_path(p));
        } else if let Some(p) = line.strip_prefix("--- ") {
            minus_path = side_path(p, "a/");
        } else if let Some(p) = line.strip_prefix("+++ ") {
            plus_path = side_path(p, "b/");
        } else if line.starts_with("Binary files ") || line.starts_with("GIT binary patch") {
            binary = true;
        }
        header.push(raw.to_vec());
        pos += 1;
    }

    let mut old_path = None;
    let path = if let Some(from) = copy_from {
        kind = ChangeKind::Added;
        old_path = Some(from);
        rename_to.or(plus_path).or(git_new)
    } else if let (Some(from), Some(to)) = (rename_from, rename_to) {
        kind = ChangeKind::Renamed;
        old_path = Some(from);
        Some(to)
    } else if kind == ChangeKind::Deleted {
        minus_path.or(git_old)
    } else {
        plus_path.or(git_new)
    };
    let path = path.ok_or_else(|| {
        GateError::MalformedDiff(format!(
            "line {}: cannot determine file path from '{}'",
            start + 1,
            truncate(lines[start])
        ))
    })?;

    let mut hunks = Vec::new();
    while pos < lines.len() && lines[pos].starts_with(b"@@") {
        let (hunk, next) = parse_hunk(lines, pos, &path)?;
        hunks.push(hunk);
        pos = next;
    }
    if pos < lines.len() && !lines[pos].starts_with(b"diff --git ") {
        return Err(GateError::MalformedDiff(format!(
            "{path}: line {}: unexpected content after hunk: '{}'",
            pos + 1,
            truncate(lines[pos])
        )));
    }

    Ok((
        FileChange {
            path,
            old_path,
            kind,
            header,
            binary,
            index,
            hunks,
        },
        pos,
    ))
}

/// Parse one hunk starting at `start` (the `@@` line).
fn parse_hunk(lines: &[&[u8]], start: usize, path: &str) -> Result<(Hunk, usize)> {
    let header = lines[start];
    let caps = hunk_header_re().captures(header).ok_or_else(|| {
        GateError::MalformedDiff(format!(
            "{path}: line {}: malformed hunk header '{}'",
            start + 1,
            truncate(header)
        ))
    })?;

    let num = |i: usize, default: u32| -> Result<u32> {
        match caps.get(i) {
            Some(m) => std::str::from_utf8(m.as_bytes())
                .ok()
                .and_then(|digits| digits.parse().ok())
                .ok_or_else(|| {
                    GateError::MalformedDiff(format!(
                        "{path}: hunk range out of bounds in '{}'",
                        truncate(header)
                    ))
                }),
            None => Ok(default),
        }
    };
    let old_start = num(1, 0)?;
    let old_len = num(2, 1)?;
    let new_start = num(3, 0)?;
    let new_len = num(4, 1)?;
    let section = caps
        .get(5)
        .map(|m| m.as_bytes().strip_prefix(b" ").unwrap_or(m.as_bytes()))
        .filter(|s| !s.is_empty())
        .map(|s| String::from_utf8_lossy(s).into_owned());

    let mut old_left = old_len;
    let mut new_left = new_len;
    let mut body: Vec<HunkLine> = Vec::new();
    let mut pos = start + 1;

    while pos < lines.len() {
        let line = lines[pos];
        if line.starts_with(b"\\") {
            let last = body.last_mut().ok_or_else(|| {
                GateError::MalformedDiff(format!(
                    "{path}: line {}: end-of-file marker without a preceding line",
                    pos + 1
                ))
            })?;
            last.eof_marker = Some(String::from_utf8_lossy(line).into_owned());
            pos += 1;
            continue;
        }
        if old_left == 0 && new_left == 0 {
            break;
        }
        let (kind, content) = match line.first() {
            Some(b' ') => (LineKind::Context, &line[1..]),
            Some(b'+') => (LineKind::Added, &line[1..]),
            Some(b'-') => (LineKind::Removed, &line[1..]),
            _ => break,
        };
        match kind {
            LineKind::Context if old_left > 0 && new_left > 0 => {
                old_left -= 1;
                new_left -= 1;
            }
            LineKind::Added if new_left > 0 => new_left -= 1,
            LineKind::Removed if old_left > 0 => old_left -= 1,
            _ => {
                return Err(GateError::MalformedDiff(format!(
                    "{path}: line {}: hunk '{}' has more lines than its ranges allow",
                    pos + 1,
                    truncate(header)
                )))
            }
        }
        body.push(HunkLine::new(kind, content));
        pos += 1;
    }

    if old_left > 0 || new_left > 0 {
        return Err(GateError::MalformedDiff(format!(
            "{path}: hunk '{}' is short by {old_left} origin and {new_left} destination line(s)",
            truncate(header)
        )));
    }

    Ok((
        Hunk {
            old_start,
            old_len,
            new_start,
            new_len,
            section,
            header: header.to_vec(),
            lines: body,
        },
        pos,
    ))
}

/// Split the `a/<old> b/<new>` part of a `diff --git` line.
///
/// Unambiguous only when the path contains no ` b/`; the `---`/`+++` and
/// rename lines take precedence when present.
fn split_git_header(rest: &str) -> (Option<String>, Option<String>) {
    if rest.starts_with('"') {
        // Quoted paths: "a/x y" "b/x y"
        let parts: Vec<&str> = rest.splitn(2, "\" \"").collect();
        if parts.len() == 2 {
            let old = unquote_path(&format!("{}\"", parts[0]));
            let new = unquote_path(&format!("\"{}", parts[1]));
            return (strip(&old, "a/"), strip(&new, "b/"));
        }
        return (None, None);
    }
    match rest.rfind(" b/") {
        Some(idx) => (
            strip(&rest[..idx], "a/"),
            Some(rest[idx + 3..].to_string()),
        ),
        None => (None, None),
    }
}

fn strip(path: &str, prefix: &str) -> Option<String> {
    Some(path.strip_prefix(prefix).unwrap_or(path).to_string())
}

/// Path from a `---`/`+++` line; `None` for `/dev/null`.
fn side_path(raw: &str, prefix: &str) -> Option<String> {
    // git appends a tab when the name contains spaces
    let raw = raw.strip_suffix('\t').unwrap_or(raw);
    let path = unquote_path(raw);
    if path == "/dev/null" {
        return None;
    }
    strip(&path, prefix)
}

/// Undo git's C-style quoting of unusual path names.
pub fn unquote_path(raw: &str) -> String {
    let Some(inner) = raw.strip_prefix('"').and_then(|s| s.strip_suffix('"')) else {
        return raw.to_string();
    };

    let mut bytes = Vec::with_capacity(inner.len());
    let mut chars = inner.bytes().peekable();
    while let Some(b) = chars.next() {
        if b != b'\\' {
            bytes.push(b);
            continue;
        }
        match chars.next() {
            Some(b'n') => bytes.push(b'\n'),
            Some(b't') => bytes.push(b'\t'),
            Some(b'"') => bytes.push(b'"'),
            Some(b'\\') => bytes.push(b'\\'),
            Some(d @ b'0'..=b'7') => {
                let mut value = u32::from(d - b'0');
                for _ in 0..2 {
                    match chars.peek() {
                        Some(&o @ b'0'..=b'7') => {
                            value = value * 8 + u32::from(o - b'0');
                            chars.next();
                        }
                        _ => break,
                    }
                }
                bytes.push(value as u8);
            }
            Some(other) => {
                bytes.push(b'\\');
                bytes.push(other);
            }
            None => bytes.push(b'\\'),
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

fn truncate(line: &[u8]) -> String {
    const MAX: usize = 80;
    let line = String::from_utf8_lossy(line);
    if line.chars().count() <= MAX {
        line.to_string()
    } else {
        let cut: String = line.chars().take(MAX).collect();
        format!("{cut}...")
    }
}
