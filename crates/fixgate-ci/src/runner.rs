//! Test command execution inside a workspace.

use std::collections::{BTreeMap, VecDeque};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use fixgate_core::metrics::METRICS;
use fixgate_core::{GateConfig, GateError, Result, TestRunResult, TestRunStatus};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cancel::CancelSignal;
use crate::workspace::Workspace;

/// How long output pipes may stay open after the command itself ended.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Wall-clock and output bounds for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLimits {
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            output_limit_bytes: 256 * 1024,
        }
    }
}

/// Ability to terminate a spawned command together with its descendants.
#[async_trait]
pub trait ProcessTree: Send + Sync {
    /// Arrange for the command's descendants to be reachable as one unit.
    fn prepare(&self, cmd: &mut Command);

    /// Forcibly terminate everything started by the command with leader `pid`.
    async fn terminate(&self, pid: Option<u32>, child: &mut Child);
}

/// Places the command in its own process group and kills the group.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessGroupTree;

#[async_trait]
impl ProcessTree for ProcessGroupTree {
    fn prepare(&self, cmd: &mut Command) {
        #[cfg(unix)]
        cmd.process_group(0);
        #[cfg(not(unix))]
        let _ = cmd;
    }

    async fn terminate(&self, pid: Option<u32>, child: &mut Child) {
        #[cfg(unix)]
        if let Some(pid) = pid {
            let group = format!("-{pid}");
            match Command::new("kill")
                .args(["-KILL", "--", &group])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await
            {
                Ok(status) if status.success() => debug!(pgid = pid, "process group killed"),
                Ok(_) => debug!(pgid = pid, "process group already gone"),
                Err(e) => warn!(pgid = pid, error = %e, "could not signal process group"),
            }
        }
        #[cfg(not(unix))]
        let _ = pid;
        // leader fallback; harmless once it has exited
        let _ = child.start_kill();
    }
}

/// Byte buffer that keeps only the last `limit` bytes.
#[derive(Debug)]
struct TailBuffer {
    limit: usize,
    data: VecDeque<u8>,
    dropped: u64,
}

impl TailBuffer {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            data: VecDeque::with_capacity(limit.min(64 * 1024)),
            dropped: 0,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        self.data.extend(chunk);
        let excess = self.data.len().saturating_sub(self.limit);
        if excess > 0 {
            self.data.drain(..excess);
            self.dropped += excess as u64;
        }
    }

    /// Captured text, with a marker line when earlier output was dropped.
    fn finish(&mut self) -> (String, bool) {
        let bytes: Vec<u8> = self.data.drain(..).collect();
        let text = String::from_utf8_lossy(&bytes);
        if self.dropped == 0 {
            return (text.into_owned(), false);
        }
        (
            format!(
                "[fixgate: output truncated, {} earlier bytes dropped]\n{text}",
                self.dropped
            ),
            true,
        )
    }
}

async fn pump<R>(mut reader: R, buffer: Arc<Mutex<TailBuffer>>)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buffer
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .push(&chunk[..n]),
        }
    }
}

fn status_from_exit(status: ExitStatus) -> TestRunStatus {
    match status.code() {
        Some(0) => TestRunStatus::Passed,
        Some(exit_code) => TestRunStatus::Failed { exit_code },
        None => TestRunStatus::Crashed {
            signal: exit_signal(status),
        },
    }
}

#[cfg(unix)]
fn exit_signal(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: ExitStatus) -> Option<i32> {
    None
}

enum Ending {
    Exited(ExitStatus),
    TimedOut,
    Cancelled(String),
}

/// Runs the configured test command in a workspace.
#[derive(Clone)]
pub struct TestRunner {
    command: Vec<String>,
    env: BTreeMap<String, String>,
    limits: RunLimits,
    tree: Arc<dyn ProcessTree>,
}

impl std::fmt::Debug for TestRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestRunner")
            .field("command", &self.command)
            .field("limits", &self.limits)
            .finish()
    }
}

impl TestRunner {
    pub fn new(command: Vec<String>, limits: RunLimits) -> Self {
        Self {
            command,
            env: BTreeMap::new(),
            limits,
            tree: Arc::new(ProcessGroupTree),
        }
    }

    pub fn from_config(config: &GateConfig) -> Self {
        Self::new(
            config.command.clone(),
            RunLimits {
                timeout: Duration::from_secs(config.timeout_secs),
                output_limit_bytes: config.output_limit_bytes,
            },
        )
        .with_env(config.env.clone())
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_process_tree(mut self, tree: Arc<dyn ProcessTree>) -> Self {
        self.tree = tree;
        self
    }

    pub fn limits(&self) -> RunLimits {
        self.limits
    }

    /// Execute the command with the workspace as working directory.
    ///
    /// # Errors
    ///
    /// - [`GateError::ToolingFailure`] when the command cannot be launched
    /// - [`GateError::Cancelled`] when `cancel` fires; the process tree is
    ///   killed first
    ///
    /// A timeout is not an error: it yields [`TestRunStatus::TimedOut`].
    pub async fn run(
        &self,
        workspace: &Workspace,
        commit_id: &str,
        cancel: &CancelSignal,
    ) -> Result<TestRunResult> {
        cancel.check()?;
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| GateError::Config("test command must not be empty".to_string()))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(workspace.path())
            .envs(&self.env)
            .env("FIXGATE_STAGE", workspace.stage().as_str())
            .env("FIXGATE_COMMIT", commit_id)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        self.tree.prepare(&mut cmd);

        let start = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| GateError::ToolingFailure(format!("{program}: {e}")))?;
        let pid = child.id();
        METRICS.inc_test_runs();
        debug!(
            workspace = %workspace.id().label,
            pid = ?pid,
            command = ?self.command,
            "test command started"
        );

        let buffer = Arc::new(Mutex::new(TailBuffer::new(self.limits.output_limit_bytes)));
        let mut pumps: Vec<JoinHandle<()>> = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            pumps.push(tokio::spawn(pump(stdout, Arc::clone(&buffer))));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(tokio::spawn(pump(stderr, Arc::clone(&buffer))));
        }

        let ending = tokio::select! {
            status = child.wait() => status.map(Ending::Exited),
            _ = tokio::time::sleep(self.limits.timeout) => Ok(Ending::TimedOut),
            reason = cancel.cancelled() => Ok(Ending::Cancelled(reason)),
        };
        let ending = match ending {
            Ok(ending) => ending,
            Err(e) => {
                self.tree.terminate(pid, &mut child).await;
                abort_all(&pumps);
                return Err(GateError::ToolingFailure(format!("{program}: {e}")));
            }
        };

        if !matches!(ending, Ending::Exited(_)) {
            self.tree.terminate(pid, &mut child).await;
            let _ = child.wait().await;
        }
        if !drain(&mut pumps).await {
            // a descendant still holds the pipes open
            self.tree.terminate(pid, &mut child).await;
            if !drain(&mut pumps).await {
                abort_all(&pumps);
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        let (output, truncated) = buffer.lock().unwrap_or_else(|p| p.into_inner()).finish();

        let status = match ending {
            Ending::Cancelled(reason) => return Err(GateError::Cancelled(reason)),
            Ending::TimedOut => {
                METRICS.inc_timeouts();
                TestRunStatus::TimedOut
            }
            Ending::Exited(status) => status_from_exit(status),
        };

        Ok(TestRunResult {
            status,
            duration_ms,
            output,
            truncated,
            workspace: workspace.id().clone(),
        })
    }
}

/// Wait up to [`DRAIN_GRACE`] for all pumps; `true` when they finished.
async fn drain(pumps: &mut [JoinHandle<()>]) -> bool {
    let all = async {
        for pump in pumps.iter_mut() {
            if !pump.is_finished() {
                let _ = pump.await;
            }
        }
    };
    tokio::time::timeout(DRAIN_GRACE, all).await.is_ok()
}

fn abort_all(pumps: &[JoinHandle<()>]) {
    for pump in pumps {
        pump.abort();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::workspace::WorkspaceArena;
    use fixgate_core::{PatchKind, Stage};
    use uuid::Uuid;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    fn runner(script: &str, timeout: Duration) -> TestRunner {
        TestRunner::new(
            sh(script),
            RunLimits {
                timeout,
                output_limit_bytes: 4096,
            },
        )
    }

    fn workspace(arena: &WorkspaceArena) -> Workspace {
        arena
            .allocate("c0ffee", Stage::PreFix, "parent", PatchKind::TestOnly)
            .unwrap()
    }

    #[test]
    fn test_tail_buffer_keeps_tail() {
        let mut buf = TailBuffer::new(4);
        buf.push(b"abcdef");
        buf.push(b"gh");
        let (text, truncated) = buf.finish();
        assert!(truncated);
        assert!(text.starts_with("[fixgate: output truncated, 4 earlier bytes dropped]"));
        assert!(text.ends_with("efgh"));
    }

    #[tokio::test]
    async fn test_passing_command() {
        let arena = WorkspaceArena::new(None, Uuid::new_v4()).unwrap();
        let ws = workspace(&arena);
        let result = runner("echo hello; echo oops >&2", Duration::from_secs(30))
            .run(&ws, "c0ffee", &CancelSignal::new())
            .await
            .unwrap();
        assert_eq!(result.status, TestRunStatus::Passed);
        assert!(result.output.contains("hello"));
        assert!(result.output.contains("oops"));
        assert!(!result.truncated);
        assert_eq!(result.workspace.stage, Stage::PreFix);
    }

    #[tokio::test]
    async fn test_failing_command() {
        let arena = WorkspaceArena::new(None, Uuid::new_v4()).unwrap();
        let ws = workspace(&arena);
        let result = runner("exit 3", Duration::from_secs(30))
            .run(&ws, "c0ffee", &CancelSignal::new())
            .await
            .unwrap();
        assert_eq!(result.status, TestRunStatus::Failed { exit_code: 3 });
    }

    #[tokio::test]
    async fn test_signal_is_crash() {
        let arena = WorkspaceArena::new(None, Uuid::new_v4()).unwrap();
        let ws = workspace(&arena);
        let result = runner("kill -SEGV $$", Duration::from_secs(30))
            .run(&ws, "c0ffee", &CancelSignal::new())
            .await
            .unwrap();
        assert_eq!(result.status, TestRunStatus::Crashed { signal: Some(11) });
        assert!(result.status.failed());
    }

    #[tokio::test]
    async fn test_runs_in_workspace_with_stage_env() {
        let arena = WorkspaceArena::new(None, Uuid::new_v4()).unwrap();
        let ws = workspace(&arena);
        std::fs::write(ws.path().join("marker.txt"), "here").unwrap();
        let mut env = BTreeMap::new();
        env.insert("EXTRA".to_string(), "yes".to_string());
        let result = runner(
            "cat marker.txt; echo \" $FIXGATE_STAGE $FIXGATE_COMMIT $EXTRA\"",
            Duration::from_secs(30),
        )
        .with_env(env)
        .run(&ws, "c0ffee", &CancelSignal::new())
        .await
        .unwrap();
        assert!(result.output.contains("here pre-fix c0ffee yes"), "{}", result.output);
    }

    #[tokio::test]
    async fn test_missing_program_is_tooling_failure() {
        let arena = WorkspaceArena::new(None, Uuid::new_v4()).unwrap();
        let ws = workspace(&arena);
        let err = TestRunner::new(
            vec!["fixgate-no-such-program".to_string()],
            RunLimits::default(),
        )
        .run(&ws, "c0ffee", &CancelSignal::new())
        .await
        .unwrap_err();
        assert!(matches!(err, GateError::ToolingFailure(ref m) if m.contains("fixgate-no-such-program")));
    }

    #[tokio::test]
    async fn test_timeout_kills_process_tree() {
        let arena = WorkspaceArena::new(None, Uuid::new_v4()).unwrap();
        let ws = workspace(&arena);
        let started = Instant::now();
        let result = runner("sleep 60 & sleep 60", Duration::from_millis(300))
            .run(&ws, "c0ffee", &CancelSignal::new())
            .await
            .unwrap();
        assert_eq!(result.status, TestRunStatus::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(20));
    }

    #[tokio::test]
    async fn test_output_truncated_with_marker() {
        let arena = WorkspaceArena::new(None, Uuid::new_v4()).unwrap();
        let ws = workspace(&arena);
        let result = runner(
            "i=0; while [ $i -lt 2000 ]; do echo line-$i; i=$((i+1)); done",
            Duration::from_secs(30),
        )
        .run(&ws, "c0ffee", &CancelSignal::new())
        .await
        .unwrap();
        assert!(result.truncated);
        assert!(result.output.contains("earlier bytes dropped"));
        assert!(result.output.trim_end().ends_with("line-1999"));
        assert!(result.output.len() < 4096 + 100);
    }

    #[tokio::test]
    async fn test_cancel_kills_and_errors() {
        let arena = WorkspaceArena::new(None, Uuid::new_v4()).unwrap();
        let ws = workspace(&arena);
        let cancel = CancelSignal::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel("job timeout");
        });
        let err = runner("sleep 60", Duration::from_secs(120))
            .run(&ws, "c0ffee", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::Cancelled(ref r) if r == "job timeout"));
    }

    #[tokio::test]
    async fn test_already_cancelled_does_not_spawn() {
        let arena = WorkspaceArena::new(None, Uuid::new_v4()).unwrap();
        let ws = workspace(&arena);
        let cancel = CancelSignal::new();
        cancel.cancel("early");
        std::fs::write(ws.path().join("marker"), "").unwrap();
        let err = runner("rm marker", Duration::from_secs(30))
            .run(&ws, "c0ffee", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::Cancelled(_)));
        assert!(ws.path().join("marker").exists());
    }
}
