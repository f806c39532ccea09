//! fixgate - bug-fix regression-validation gate
//!
//! The `fixgate` command evaluates commits that claim to fix a defect and
//! blocks those whose tests do not demonstrate the fix.
//!
//! ## Commands
//!
//! - `check`: Evaluate one or more revisions (default: HEAD)
//! - `range`: Evaluate every commit in `<base>..<head>`
//! - `classify`: Show how a commit message would be classified
//! - `config`: Print the effective configuration

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use fixgate_ci::{BatchEvaluator, CancelSignal, CommitPipeline, WorkspaceArena};
use fixgate_core::{
    capture_head_sha, is_git_repo, repo_toplevel, short_sha, CommitClassifier, GateConfig,
    GateReport, GateSpec, GitCli, VerdictTag, VersionControl, EXIT_USAGE,
};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "fixgate")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Bug-fix regression-validation gate", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Repository to evaluate (default: current directory)
    #[arg(long, global = true, env = "FIXGATE_REPO", default_value = ".")]
    repo: PathBuf,

    /// Configuration file (default: <repo>/fixgate.toml when present)
    #[arg(long, global = true, env = "FIXGATE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate specific revisions
    Check {
        /// Revisions to evaluate (default: HEAD)
        revs: Vec<String>,

        #[command(flatten)]
        eval: EvalArgs,
    },

    /// Evaluate every commit in a revision range
    Range {
        /// Range in `<base>..<head>` form
        range: String,

        #[command(flatten)]
        eval: EvalArgs,
    },

    /// Classify a commit message without evaluating anything
    Classify {
        /// Commit message, or `-` to read it from stdin
        message: String,
    },

    /// Print the effective configuration as TOML
    Config {
        #[command(flatten)]
        eval: EvalArgs,
    },
}

/// Overrides applied on top of the configuration file.
#[derive(Args, Debug, Default)]
struct EvalArgs {
    /// Write the gate report as JSON to this path
    #[arg(long, env = "FIXGATE_REPORT")]
    report: Option<PathBuf>,

    /// Cancel all outstanding evaluations after this many seconds
    #[arg(long, env = "FIXGATE_DEADLINE_SECS")]
    deadline_secs: Option<u64>,

    /// Maximum number of commits evaluated concurrently
    #[arg(long, env = "FIXGATE_MAX_CONCURRENCY")]
    max_concurrency: Option<usize>,

    /// Per-stage test command timeout in seconds
    #[arg(long, env = "FIXGATE_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    /// Directory under which workspaces are created
    #[arg(long, env = "FIXGATE_WORKSPACE_ROOT")]
    workspace_root: Option<PathBuf>,

    /// Test command, given after `--` (e.g. `-- cargo test`)
    #[arg(last = true)]
    command: Vec<String>,
}

impl EvalArgs {
    fn apply(&self, config: &mut GateConfig) {
        if let Some(n) = self.max_concurrency {
            config.max_concurrency = n;
        }
        if let Some(secs) = self.timeout_secs {
            config.timeout_secs = secs;
        }
        if let Some(root) = &self.workspace_root {
            config.workspace_root = Some(root.clone());
        }
        if !self.command.is_empty() {
            config.command = self.command.clone();
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    fixgate_core::init_tracing(cli.json, level);

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(EXIT_USAGE);
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Check { revs, eval } => {
            let repo = resolve_repo(&cli.repo)?;
            let config = load_config(&repo, cli.config.as_deref(), &eval)?;
            let revs = if revs.is_empty() {
                vec![capture_head_sha(&repo).context("failed to resolve HEAD")?]
            } else {
                revs
            };
            cmd_evaluate(repo, config, revs, &eval).await
        }
        Commands::Range { range, eval } => {
            let repo = resolve_repo(&cli.repo)?;
            let config = load_config(&repo, cli.config.as_deref(), &eval)?;
            validate_range(&range)?;
            let revs = GitCli::new(&repo)
                .list_commits(&range)
                .await
                .with_context(|| format!("failed to list commits in {range}"))?;
            if revs.is_empty() {
                println!("No commits in {range}");
                return Ok(fixgate_core::EXIT_PASS);
            }
            cmd_evaluate(repo, config, revs, &eval).await
        }
        Commands::Classify { message } => {
            let config = match &cli.config {
                Some(path) => load_config(Path::new("."), Some(path), &EvalArgs::default())?,
                None => {
                    let repo = resolve_repo(&cli.repo).unwrap_or_else(|_| cli.repo.clone());
                    load_config(&repo, None, &EvalArgs::default())?
                }
            };
            cmd_classify(&config, &message)
        }
        Commands::Config { eval } => {
            let repo = resolve_repo(&cli.repo).unwrap_or_else(|_| cli.repo.clone());
            let config = load_config(&repo, cli.config.as_deref(), &eval)?;
            print!(
                "{}",
                toml::to_string(&config).context("failed to render configuration")?
            );
            Ok(fixgate_core::EXIT_PASS)
        }
    }
}

fn resolve_repo(path: &Path) -> Result<PathBuf> {
    if !path.is_dir() || !is_git_repo(path) {
        bail!("{} is not a git repository", path.display());
    }
    repo_toplevel(path).with_context(|| format!("{} is not a git repository", path.display()))
}

/// Config file (explicit, or `<repo>/fixgate.toml`, or defaults) plus flags.
fn load_config(repo: &Path, explicit: Option<&Path>, eval: &EvalArgs) -> Result<GateConfig> {
    let mut config = match explicit {
        Some(path) => GateConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => GateConfig::load_or_default(repo)
            .with_context(|| format!("failed to load config for {}", repo.display()))?,
    };
    eval.apply(&mut config);
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn validate_range(range: &str) -> Result<()> {
    match range.split_once("..") {
        Some((base, head)) if !base.is_empty() && !head.trim_start_matches('.').is_empty() => {
            Ok(())
        }
        _ => bail!("range must have the form <base>..<head>, got {range:?}"),
    }
}

fn cmd_classify(config: &GateConfig, message: &str) -> Result<i32> {
    let message = if message == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read message from stdin")?;
        buf
    } else {
        message.to_string()
    };
    let classifier = CommitClassifier::from_config(config).context("invalid fix patterns")?;
    println!("{}", classifier.classify(&message));
    Ok(fixgate_core::EXIT_PASS)
}

async fn cmd_evaluate(
    repo: PathBuf,
    config: GateConfig,
    revs: Vec<String>,
    eval: &EvalArgs,
) -> Result<i32> {
    let spec = GateSpec::new(repo.clone(), &config)?;
    let arena = Arc::new(
        WorkspaceArena::new(config.workspace_root.as_deref(), Uuid::new_v4())
            .context("failed to create workspace root")?,
    );
    let vcs: Arc<dyn VersionControl> = Arc::new(GitCli::new(&repo));
    let pipeline = Arc::new(
        CommitPipeline::new(&config, vcs, Arc::clone(&arena))
            .context("failed to set up evaluation")?,
    );

    let cancel = CancelSignal::new();
    let mut watchers = Vec::new();
    if let Some(secs) = eval.deadline_secs {
        watchers.push(cancel.cancel_after(Duration::from_secs(secs)));
    }
    let interrupt = cancel.clone();
    watchers.push(tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling outstanding evaluations");
            interrupt.cancel("interrupted");
        }
    }));

    info!(
        repo = %repo.display(),
        run_id = %arena.run_id(),
        commits = revs.len(),
        "evaluating commits"
    );
    let report = BatchEvaluator::new(pipeline, config.max_concurrency)
        .evaluate_all(&revs, &cancel)
        .await
        .with_spec(spec);
    for watcher in watchers {
        watcher.abort();
    }

    print_summary(&report);

    if let Some(path) = &eval.report {
        report
            .write_json(path)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        println!("Report: {}", path.display());
    }

    Ok(report.exit_code())
}

fn print_summary(report: &GateReport) {
    println!("Run ID: {}", report.run_id);
    if let Some(spec) = &report.spec {
        println!("Repository: {}", spec.repo_path.display());
        println!(
            "fixgate {} (command {}, config {})",
            spec.version,
            short_sha(&spec.command_digest),
            short_sha(&spec.config_digest)
        );
    }
    println!();

    for verdict in report.verdicts.values() {
        let status = if verdict.is_passing() { "✓" } else { "✗" };
        let mut lines = verdict.diagnostic().lines();
        let headline = lines.next().unwrap_or_default();
        println!(
            "  {} {} {:<24} {}",
            status,
            short_sha(verdict.commit_id()),
            verdict.tag(),
            headline
        );
        if !verdict.is_passing() {
            for line in lines {
                println!("      {}", line);
            }
        }
    }

    println!();
    let counts = report.counts();
    let breakdown: Vec<String> = VerdictTag::ALL
        .iter()
        .filter_map(|tag| counts.get(tag).map(|n| format!("{tag}: {n}")))
        .collect();
    println!(
        "Summary: {} commits, {} blocking ({})",
        report.len(),
        report.blocking().count(),
        breakdown.join(", ")
    );
    println!(
        "Gate: {}",
        if report.is_passing() {
            "✓ PASSED"
        } else {
            "✗ FAILED"
        }
    );
}
