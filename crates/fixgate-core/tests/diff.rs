//! Change-set extraction over diffs produced by a real git repository.

use std::path::Path;
use std::process::Command;

use fixgate_core::{
    ChangeKind, ChangeSetExtractor, Commit, GateConfig, GitCli, LineKind, VersionControl,
};
use tempfile::TempDir;

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?}: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn repo() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    git(dir.path(), &["init", "--quiet"]);
    git(dir.path(), &["config", "user.name", "test-user"]);
    git(dir.path(), &["config", "user.email", "test@example.com"]);
    git(dir.path(), &["config", "commit.gpgsign", "false"]);
    dir
}

fn write(dir: &Path, path: &str, content: &[u8]) {
    let full = dir.join(path);
    std::fs::create_dir_all(full.parent().unwrap()).unwrap();
    std::fs::write(full, content).unwrap();
}

fn commit_all(dir: &Path, message: &str) -> String {
    git(dir, &["add", "-A"]);
    git(dir, &["commit", "--quiet", "-m", message]);
    git(dir, &["rev-parse", "HEAD"]).trim().to_string()
}

async fn read(dir: &Path, rev: &str) -> Commit {
    let git = GitCli::new(dir);
    let meta = git.read_meta(rev).await.unwrap();
    git.read_commit(&meta).await.unwrap()
}

const PARSER: &str = "pub fn parse(input: &str) -> Vec<u32> {\n    input\n        .split(',')\n        .map(|s| s.parse().unwrap())\n        .collect()\n}\n";

const PARSER_FIXED: &str = "pub fn parse(input: &str) -> Vec<u32> {\n    input\n        .split(',')\n        .filter(|s| !s.is_empty())\n        .map(|s| s.parse().unwrap())\n        .collect()\n}\n";

#[tokio::test]
async fn fix_with_new_test_partitions_by_path() {
    let dir = repo();
    write(dir.path(), "src/parser.rs", PARSER.as_bytes());
    write(dir.path(), "README.md", b"parser\n");
    commit_all(dir.path(), "initial");

    write(dir.path(), "src/parser.rs", PARSER_FIXED.as_bytes());
    write(
        dir.path(),
        "tests/parser_test.rs",
        b"#[test]\nfn empty_segments() {\n    assert_eq!(parse(\"1,,2\"), vec![1, 2]);\n}\n",
    );
    let id = commit_all(dir.path(), "fix: skip empty segments (Fixes #12)");

    let commit = read(dir.path(), &id).await;
    let extractor = ChangeSetExtractor::from_config(&GateConfig::default()).unwrap();
    let set = extractor.extract(&commit).unwrap();

    assert_eq!(set.test_paths(), vec!["tests/parser_test.rs"]);
    assert_eq!(set.non_test_changes.len(), 1);
    assert_eq!(set.non_test_changes[0].path, "src/parser.rs");
    assert_eq!(set.test_changes[0].kind, ChangeKind::Added);
    assert!(set.interleaved.is_empty());
    assert_eq!(set.reassemble(), commit.changes);
}

#[tokio::test]
async fn rendered_diff_matches_git_output() {
    let dir = repo();
    write(dir.path(), "src/parser.rs", PARSER.as_bytes());
    write(dir.path(), "notes.txt", b"no trailing newline");
    write(dir.path(), "tests/old_test.rs", b"#[test]\nfn t() {}\n");
    let parent = commit_all(dir.path(), "initial");

    write(dir.path(), "src/parser.rs", PARSER_FIXED.as_bytes());
    write(dir.path(), "notes.txt", b"still no trailing newline");
    git(dir.path(), &["mv", "tests/old_test.rs", "tests/parser_test.rs"]);
    let id = commit_all(dir.path(), "fix: parser");

    let raw = git(
        dir.path(),
        &[
            "-c",
            "core.quotepath=on",
            "diff",
            "--no-color",
            "--no-ext-diff",
            "-M",
            "--full-index",
            "--src-prefix=a/",
            "--dst-prefix=b/",
            &parent,
            &id,
        ],
    );

    let commit = read(dir.path(), &id).await;
    assert_eq!(commit.render_diff(), raw.as_bytes());

    let set = ChangeSetExtractor::from_config(&GateConfig::default())
        .unwrap()
        .extract(&commit)
        .unwrap();
    assert_eq!(set.render(), raw.as_bytes());

    let renamed = &set.test_changes[0];
    assert_eq!(renamed.kind, ChangeKind::Renamed);
    assert_eq!(renamed.old_path.as_deref(), Some("tests/old_test.rs"));
    assert_eq!(renamed.path, "tests/parser_test.rs");
}

#[tokio::test]
async fn missing_final_newline_is_preserved() {
    let dir = repo();
    write(dir.path(), "tests/value_test.sh", b"exit 1");
    commit_all(dir.path(), "initial");
    write(dir.path(), "tests/value_test.sh", b"exit 0");
    let id = commit_all(dir.path(), "fix: value");

    let commit = read(dir.path(), &id).await;
    let hunk = &commit.changes[0].hunks[0];
    assert!(hunk.old_missing_newline());
    assert!(hunk.new_missing_newline());
    assert_eq!(
        hunk.lines
            .iter()
            .filter(|l| l.kind != LineKind::Context)
            .count(),
        2
    );
}

#[tokio::test]
async fn binary_test_fixture_is_a_test_change() {
    let dir = repo();
    write(dir.path(), "src/lib.rs", b"pub fn f() {}\n");
    commit_all(dir.path(), "initial");
    write(dir.path(), "tests/fixtures/sample.bin", &[0u8, 159, 146, 150, 0, 1]);
    write(dir.path(), "src/lib.rs", b"pub fn f() { let _ = 1; }\n");
    let id = commit_all(dir.path(), "fix: handle sample");

    let commit = read(dir.path(), &id).await;
    let set = ChangeSetExtractor::from_config(&GateConfig::default())
        .unwrap()
        .extract(&commit)
        .unwrap();

    assert_eq!(set.test_paths(), vec!["tests/fixtures/sample.bin"]);
    assert!(set.test_changes[0].binary);
    assert!(set.test_changes[0].hunks.is_empty());
}

#[tokio::test]
async fn root_commit_diffs_against_empty_tree() {
    let dir = repo();
    write(dir.path(), "src/lib.rs", b"pub fn f() {}\n");
    write(dir.path(), "tests/lib_test.rs", b"#[test]\nfn t() {}\n");
    let id = commit_all(dir.path(), "fix: first");

    let commit = read(dir.path(), &id).await;
    assert!(commit.parent.is_none());
    assert!(commit.changes.iter().all(|c| c.kind == ChangeKind::Added));
    assert_eq!(commit.changes.len(), 2);
}

#[tokio::test]
async fn non_utf8_test_file_renders_losslessly() {
    let dir = repo();
    write(dir.path(), "tests/value_test.sh", b"# caf\xe9\nexit 1\n");
    let parent = commit_all(dir.path(), "initial");
    write(dir.path(), "tests/value_test.sh", b"# caf\xe9\nexit 0\n");
    let id = commit_all(dir.path(), "fix: value");

    let output = Command::new("git")
        .args(["diff", "--no-color", "--full-index", &parent, &id])
        .current_dir(dir.path())
        .output()
        .unwrap();

    let commit = read(dir.path(), &id).await;
    assert_eq!(commit.render_diff(), output.stdout);
    assert_eq!(commit.changes[0].hunks[0].lines[0].content, b"# caf\xe9");
}
