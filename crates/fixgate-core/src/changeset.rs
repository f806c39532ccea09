//! Change-set extraction: partition a commit's diff into test and non-test changes.
//!
//! Routing is by path through an injected [`TestPathPredicate`]. An optional
//! [`HunkClassifier`] may split non-test-path files whose hunks belong to
//! inline test code (e.g. a Rust `mod tests` block); everything else about the
//! partition stays path-driven.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::commit::{Commit, FileChange, Hunk, LineKind};
use crate::domain::error::{GateError, Result};

// ---------------------------------------------------------------------------
// Path predicate
// ---------------------------------------------------------------------------

/// Decides whether a repository-relative path is test code.
pub trait TestPathPredicate: Send + Sync {
    fn is_test_path(&self, path: &str) -> bool;
}

impl<F> TestPathPredicate for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_test_path(&self, path: &str) -> bool {
        self(path)
    }
}

/// Glob-based test path predicate (`**`, `*` and `?` wildcards).
#[derive(Debug, Clone)]
pub struct GlobTestPaths {
    patterns: Vec<Regex>,
}

impl GlobTestPaths {
    pub fn new(globs: &[String]) -> Result<Self> {
        let patterns = globs
            .iter()
            .map(|g| {
                Regex::new(&glob_to_regex(g))
                    .map_err(|e| GateError::Config(format!("invalid test path glob '{g}': {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }
}

impl TestPathPredicate for GlobTestPaths {
    fn is_test_path(&self, path: &str) -> bool {
        let path = path.replace('\\', "/");
        self.patterns.iter().any(|re| re.is_match(&path))
    }
}

/// Translate a path glob into an anchored regex.
///
/// `**/` matches zero or more directories, `**` anything, `*` and `?` stay
/// within one path segment.
pub fn glob_to_regex(glob: &str) -> String {
    let mut re = String::from("^");
    let chars: Vec<char> = glob.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if chars.get(i + 2) == Some(&'/') {
                    re.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    re.push_str(".*");
                    i += 2;
                }
                continue;
            }
            '*' => re.push_str("[^/]*"),
            '?' => re.push_str("[^/]"),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }
    re.push('$');
    re
}

// ---------------------------------------------------------------------------
// Hunk classification
// ---------------------------------------------------------------------------

/// Role of one hunk inside a non-test-path file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HunkRole {
    Test,
    Production,
    /// Test and production edits share the hunk; cannot be split safely.
    Interleaved,
}

/// Optional hunk-level classifier for test code living in production files.
pub trait HunkClassifier: Send + Sync {
    fn classify_hunk(&self, path: &str, hunk: &Hunk) -> HunkRole;
}

/// Classifies hunks by inline test markers such as `mod tests` or `#[cfg(test)]`.
///
/// A hunk is test code when its section heading names a marker, or when a
/// marker line precedes all of its edits. Edits on both sides of a marker
/// make the hunk interleaved.
#[derive(Debug, Clone)]
pub struct InlineTestSections {
    markers: Vec<String>,
}

impl InlineTestSections {
    pub fn new(markers: Vec<String>) -> Self {
        Self { markers }
    }

    fn is_marker(&self, text: &str) -> bool {
        self.markers.iter().any(|m| text.contains(m.as_str()))
    }
}

impl HunkClassifier for InlineTestSections {
    fn classify_hunk(&self, _path: &str, hunk: &Hunk) -> HunkRole {
        if hunk.section.as_deref().is_some_and(|s| self.is_marker(s)) {
            return HunkRole::Test;
        }
        let Some(marker_at) = hunk.lines.iter().position(|l| self.is_marker(&l.text())) else {
            return HunkRole::Production;
        };

        let mut before = false;
        let mut after = false;
        for (i, line) in hunk.lines.iter().enumerate() {
            if line.kind == LineKind::Context {
                continue;
            }
            if i < marker_at {
                before = true;
            } else {
                after = true;
            }
        }
        match (before, after) {
            (true, true) => HunkRole::Interleaved,
            (false, true) => HunkRole::Test,
            _ => HunkRole::Production,
        }
    }
}

// ---------------------------------------------------------------------------
// ChangeSet
// ---------------------------------------------------------------------------

/// A commit's diff partitioned into test and non-test changes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub test_changes: Vec<FileChange>,
    pub non_test_changes: Vec<FileChange>,

    /// Paths holding a hunk that mixes test and production edits. Such hunks
    /// stay in `test_changes`; the materializer refuses to apply them.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub interleaved: BTreeSet<String>,
}

impl ChangeSet {
    pub fn has_test_changes(&self) -> bool {
        !self.test_changes.is_empty()
    }

    pub fn test_paths(&self) -> Vec<&str> {
        self.test_changes.iter().map(|c| c.path.as_str()).collect()
    }

    /// Total hunks across both partitions.
    pub fn hunk_count(&self) -> usize {
        self.test_changes
            .iter()
            .chain(&self.non_test_changes)
            .map(|c| c.hunks.len())
            .sum()
    }

    /// Merge both partitions back into the original diff order.
    ///
    /// Files split by a hunk classifier are rejoined, their hunks ordered by
    /// origin line.
    pub fn reassemble(&self) -> Vec<FileChange> {
        let mut by_index: BTreeMap<usize, FileChange> = BTreeMap::new();
        for change in self.test_changes.iter().chain(&self.non_test_changes) {
            match by_index.get_mut(&change.index) {
                Some(existing) => {
                    existing.hunks.extend(change.hunks.iter().cloned());
                    existing.hunks.sort_by_key(|h| (h.old_start, h.new_start));
                }
                None => {
                    by_index.insert(change.index, change.clone());
                }
            }
        }
        by_index.into_values().collect()
    }

    /// Render the reassembled diff as raw unified-diff bytes.
    pub fn render(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for change in self.reassemble() {
            change.render(&mut out);
        }
        out
    }
}

/// Partitions commits with an injected path predicate and optional hunk classifier.
#[derive(Clone)]
pub struct ChangeSetExtractor {
    paths: Arc<dyn TestPathPredicate>,
    hunks: Option<Arc<dyn HunkClassifier>>,
}

impl std::fmt::Debug for ChangeSetExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeSetExtractor")
            .field("hunk_classifier", &self.hunks.is_some())
            .finish()
    }
}

impl ChangeSetExtractor {
    pub fn new(paths: Arc<dyn TestPathPredicate>) -> Self {
        Self { paths, hunks: None }
    }

    pub fn with_hunk_classifier(mut self, hunks: Arc<dyn HunkClassifier>) -> Self {
        self.hunks = Some(hunks);
        self
    }

    /// Build from configured globs and inline markers.
    pub fn from_config(config: &crate::config::GateConfig) -> Result<Self> {
        let extractor = Self::new(Arc::new(GlobTestPaths::new(&config.test_path_globs)?));
        if config.inline_test_markers.is_empty() {
            Ok(extractor)
        } else {
            Ok(extractor.with_hunk_classifier(Arc::new(InlineTestSections::new(
                config.inline_test_markers.clone(),
            ))))
        }
    }

    pub fn extract(&self, commit: &Commit) -> Result<ChangeSet> {
        self.extract_changes(&commit.changes)
    }

    /// Route each file change, in diff order, into exactly one partition.
    ///
    /// # Errors
    ///
    /// [`GateError::MalformedDiff`] when a hunk's body disagrees with its
    /// stated line ranges or hunks within a file overlap.
    pub fn extract_changes(&self, changes: &[FileChange]) -> Result<ChangeSet> {
        let mut set = ChangeSet::default();

        for change in changes {
            validate_hunks(change)?;

            if self.paths.is_test_path(&change.path) {
                set.test_changes.push(change.clone());
                continue;
            }

            let Some(hunks) = &self.hunks else {
                set.non_test_changes.push(change.clone());
                continue;
            };

            let mut test_hunks = Vec::new();
            let mut prod_hunks = Vec::new();
            for hunk in &change.hunks {
                match hunks.classify_hunk(&change.path, hunk) {
                    HunkRole::Test => test_hunks.push(hunk.clone()),
                    HunkRole::Interleaved => {
                        set.interleaved.insert(change.path.clone());
                        test_hunks.push(hunk.clone());
                    }
                    HunkRole::Production => prod_hunks.push(hunk.clone()),
                }
            }

            match (test_hunks.is_empty(), prod_hunks.is_empty()) {
                (true, _) => set.non_test_changes.push(change.clone()),
                (false, true) => set.test_changes.push(change.clone()),
                (false, false) => {
                    set.test_changes.push(change.with_hunks(test_hunks));
                    set.non_test_changes.push(change.with_hunks(prod_hunks));
                }
            }
        }

        Ok(set)
    }
}

/// Check that every hunk's body matches its ranges and hunks are ordered.
fn validate_hunks(change: &FileChange) -> Result<()> {
    let mut prev_end: Option<u32> = None;
    for hunk in &change.hunks {
        let old = hunk.old_lines().count() as u32;
        let new = hunk.new_lines().count() as u32;
        if old != hunk.old_len || new != hunk.new_len {
            return Err(GateError::MalformedDiff(format!(
                "{}: hunk '{}' declares {}/{} lines but carries {old}/{new}",
                change.path,
                hunk.header_text(),
                hunk.old_len,
                hunk.new_len
            )));
        }
        if let Some(end) = prev_end {
            if hunk.old_start <= end && hunk.old_len > 0 {
                return Err(GateError::MalformedDiff(format!(
                    "{}: hunk '{}' overlaps the previous hunk",
                    change.path,
                    hunk.header_text()
                )));
            }
        }
        if hunk.old_len > 0 {
            prev_end = Some(hunk.old_end());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_test_path_globs;
    use crate::diff::parse_unified_diff;

    fn default_paths() -> GlobTestPaths {
        GlobTestPaths::new(&default_test_path_globs()).unwrap()
    }

    const SCENARIO_A: &str = "\
diff --git a/parser.go b/parser.go
index 1111111..2222222 100644
--- a/parser.go
+++ b/parser.go
@@ -1,3 +1,6 @@
 func First(xs []int) int {
+\tif len(xs) == 0 {
+\t\treturn 0
+\t}
 \treturn xs[0]
 }
diff --git a/parser_test.go b/parser_test.go
index 3333333..4444444 100644
--- a/parser_test.go
+++ b/parser_test.go
@@ -1,2 +1,5 @@
 package parser
\x20
+func TestFirstEmpty(t *testing.T) {
+\tFirst(nil)
+}
";

    #[test]
    fn test_glob_to_regex() {
        assert_eq!(glob_to_regex("*.rs"), r"^[^/]*\.rs$");
        assert_eq!(glob_to_regex("**/tests/**"), r"^(?:.*/)?tests/.*$");
    }

    #[test]
    fn test_default_globs() {
        let p = default_paths();
        assert!(p.is_test_path("parser_test.go"));
        assert!(p.is_test_path("pkg/parser_test.go"));
        assert!(p.is_test_path("tests/integration.rs"));
        assert!(p.is_test_path("crates/a/tests/it.rs"));
        assert!(p.is_test_path("src/__tests__/app.js"));
        assert!(p.is_test_path("web/app.test.ts"));
        assert!(p.is_test_path("pkg/test_parser.py"));
        assert!(!p.is_test_path("parser.go"));
        assert!(!p.is_test_path("src/testing.rs"));
        assert!(!p.is_test_path("src/contest/main.rs"));
    }

    #[test]
    fn test_closure_predicate() {
        let extractor = ChangeSetExtractor::new(Arc::new(|p: &str| p.ends_with("_test.go")));
        let changes = parse_unified_diff(SCENARIO_A).unwrap();
        let set = extractor.extract_changes(&changes).unwrap();
        assert_eq!(set.test_paths(), vec!["parser_test.go"]);
    }

    #[test]
    fn test_partition_by_path() {
        let extractor = ChangeSetExtractor::new(Arc::new(default_paths()));
        let changes = parse_unified_diff(SCENARIO_A).unwrap();
        let set = extractor.extract_changes(&changes).unwrap();

        assert_eq!(set.test_changes.len(), 1);
        assert_eq!(set.non_test_changes.len(), 1);
        assert_eq!(set.test_changes[0].path, "parser_test.go");
        assert_eq!(set.non_test_changes[0].path, "parser.go");
        assert!(set.has_test_changes());
        assert!(set.interleaved.is_empty());
    }

    #[test]
    fn test_partition_is_lossless() {
        let extractor = ChangeSetExtractor::new(Arc::new(default_paths()));
        let changes = parse_unified_diff(SCENARIO_A).unwrap();
        let set = extractor.extract_changes(&changes).unwrap();

        assert_eq!(set.reassemble(), changes);
        assert_eq!(set.render(), SCENARIO_A.as_bytes());
        let original_hunks: usize = changes.iter().map(|c| c.hunks.len()).sum();
        assert_eq!(set.hunk_count(), original_hunks);
    }

    #[test]
    fn test_rename_classified_by_destination() {
        let diff = "\
diff --git a/src/helpers.rs b/tests/helpers.rs
similarity index 100%
rename from src/helpers.rs
rename to tests/helpers.rs
";
        let extractor = ChangeSetExtractor::new(Arc::new(default_paths()));
        let set = extractor
            .extract_changes(&parse_unified_diff(diff).unwrap())
            .unwrap();
        assert_eq!(set.test_changes.len(), 1);
        assert!(set.non_test_changes.is_empty());
    }

    #[test]
    fn test_deleted_test_file_is_test_change() {
        let diff = "\
diff --git a/tests/old.rs b/tests/old.rs
deleted file mode 100644
index 1111111..0000000
--- a/tests/old.rs
+++ /dev/null
@@ -1 +0,0 @@
-fn old() {}
";
        let extractor = ChangeSetExtractor::new(Arc::new(default_paths()));
        let set = extractor
            .extract_changes(&parse_unified_diff(diff).unwrap())
            .unwrap();
        assert_eq!(set.test_paths(), vec!["tests/old.rs"]);
    }

    #[test]
    fn test_context_only_test_file_still_test_change() {
        let diff = "\
diff --git a/tests/noop.rs b/tests/noop.rs
index 1111111..2222222 100644
--- a/tests/noop.rs
+++ b/tests/noop.rs
@@ -1,2 +1,2 @@
-fn x() {}\x20
+fn x() {}
 fn y() {}
";
        let extractor = ChangeSetExtractor::new(Arc::new(default_paths()));
        let set = extractor
            .extract_changes(&parse_unified_diff(diff).unwrap())
            .unwrap();
        assert_eq!(set.test_paths(), vec!["tests/noop.rs"]);
    }

    #[test]
    fn test_inconsistent_hunk_is_malformed() {
        let mut changes = parse_unified_diff(SCENARIO_A).unwrap();
        changes[0].hunks[0].new_len = 99;
        let extractor = ChangeSetExtractor::new(Arc::new(default_paths()));
        let err = extractor.extract_changes(&changes).unwrap_err();
        assert!(matches!(err, GateError::MalformedDiff(_)));
        assert!(err.to_string().contains("parser.go"));
    }

    const INLINE: &str = "\
diff --git a/src/lib.rs b/src/lib.rs
index 1111111..2222222 100644
--- a/src/lib.rs
+++ b/src/lib.rs
@@ -1,3 +1,3 @@
 pub fn first(xs: &[i32]) -> i32 {
-    xs[0]
+    xs.first().copied().unwrap_or(0)
 }
@@ -20,2 +20,5 @@ mod tests {
     fn existing() {}
+
+    #[test]
+    fn empty_slice() { assert_eq!(first(&[]), 0); }
 }
";

    #[test]
    fn test_inline_tests_split_file() {
        let extractor = ChangeSetExtractor::new(Arc::new(default_paths())).with_hunk_classifier(
            Arc::new(InlineTestSections::new(vec!["mod tests".to_string()])),
        );
        let changes = parse_unified_diff(INLINE).unwrap();
        let set = extractor.extract_changes(&changes).unwrap();

        assert_eq!(set.test_changes.len(), 1);
        assert_eq!(set.non_test_changes.len(), 1);
        assert_eq!(set.test_changes[0].hunks.len(), 1);
        assert_eq!(set.test_changes[0].hunks[0].old_start, 20);
        assert_eq!(set.non_test_changes[0].hunks[0].old_start, 1);
        assert!(set.interleaved.is_empty());
        assert_eq!(set.reassemble(), changes);
        assert_eq!(set.render(), INLINE.as_bytes());
    }

    #[test]
    fn test_interleaved_hunk_detected() {
        let diff = "\
diff --git a/src/lib.rs b/src/lib.rs
index 1111111..2222222 100644
--- a/src/lib.rs
+++ b/src/lib.rs
@@ -1,5 +1,6 @@
-pub fn f() -> i32 { 1 }
+pub fn f() -> i32 { 2 }
 #[cfg(test)]
 mod tests {
+    #[test] fn two() { assert_eq!(super::f(), 2); }
     fn other() {}
 }
";
        let classifier = InlineTestSections::new(vec!["#[cfg(test)]".to_string()]);
        let changes = parse_unified_diff(diff).unwrap();
        assert_eq!(
            classifier.classify_hunk("src/lib.rs", &changes[0].hunks[0]),
            HunkRole::Interleaved
        );

        let extractor = ChangeSetExtractor::new(Arc::new(default_paths()))
            .with_hunk_classifier(Arc::new(classifier));
        let set = extractor.extract_changes(&changes).unwrap();
        assert!(set.interleaved.contains("src/lib.rs"));
        assert_eq!(set.test_paths(), vec!["src/lib.rs"]);
    }

    #[test]
    fn test_hunk_classifier_ignores_test_paths() {
        struct Never;
        impl HunkClassifier for Never {
            fn classify_hunk(&self, _: &str, _: &Hunk) -> HunkRole {
                HunkRole::Production
            }
        }
        let extractor =
            ChangeSetExtractor::new(Arc::new(default_paths())).with_hunk_classifier(Arc::new(Never));
        let set = extractor
            .extract_changes(&parse_unified_diff(SCENARIO_A).unwrap())
            .unwrap();
        assert_eq!(set.test_paths(), vec!["parser_test.go"]);
    }
}
