#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use healthgate_core::manifest::{Manifest, DEFAULT_MANIFEST};
use healthgate_core::{ConfigError, IssueKey};
use healthgate_runner::report::{render_human, render_json};
use healthgate_runner::{CommandRuntime, RunContext, RunOptions, StateStore};
use tracing_subscriber::EnvFilter;

const EXIT_ISSUES: u8 = 1;
const EXIT_CONFIG: u8 = 2;

/// Validate, diagnose and optionally repair a running multi-service deployment.
#[derive(Parser, Debug)]
#[command(name = "healthgate", version)]
struct Args {
    /// Deployment manifest.
    #[arg(long, default_value = DEFAULT_MANIFEST)]
    manifest: PathBuf,

    /// Print the run as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Retry health endpoints until healthy or the wait budget runs out.
    #[arg(long)]
    wait: bool,

    /// Wait budget in seconds (implies --wait).
    #[arg(long, value_name = "SECS")]
    max_wait: Option<u64>,

    /// Re-probe only the services behind the last run's errors.
    #[arg(long)]
    retest: bool,

    /// Retest only this issue key (service:kind:target). Repeatable; implies --retest.
    #[arg(long = "only", value_name = "KEY")]
    only: Vec<IssueKey>,

    /// Rediscover and probe everything, even with --retest.
    #[arg(long)]
    full: bool,

    /// Run safe remediations for auto-fixable issues.
    #[arg(long)]
    autofix: bool,

    /// Print remediation commands without running them.
    #[arg(long)]
    dry_run: bool,

    /// Probe in dependency layers and stop at the first failing layer.
    #[arg(long)]
    progressive: bool,

    /// Compare with the previous run.
    #[arg(long)]
    diff: bool,

    /// Per-request probe timeout.
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Maximum concurrent probes.
    #[arg(long, value_name = "N")]
    concurrency: Option<usize>,

    /// Where latest.json and previous.json are kept.
    #[arg(long, value_name = "DIR")]
    state_dir: Option<PathBuf>,

    /// Debug logging (RUST_LOG still wins).
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match run(args).await {
        Ok(code) => code,
        Err(err) if err.downcast_ref::<ConfigError>().is_some() => {
            eprintln!("configuration error: {err:#}");
            ExitCode::from(EXIT_CONFIG)
        }
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(EXIT_ISSUES)
        }
    }
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    let mut manifest = Manifest::load(&args.manifest)
        .with_context(|| format!("load manifest {}", args.manifest.display()))?;
    if let Some(timeout_ms) = args.timeout_ms {
        manifest.probe.timeout_ms = timeout_ms;
    }
    if let Some(concurrency) = args.concurrency {
        manifest.probe.concurrency = concurrency;
    }
    manifest.validate()?;

    let options = RunOptions {
        wait: args.wait || args.max_wait.is_some(),
        max_wait: args.max_wait.map(Duration::from_secs),
        retest: args.retest || !args.only.is_empty(),
        only: args.only,
        full: args.full,
        autofix: args.autofix,
        dry_run: args.dry_run,
        progressive: args.progressive,
        diff: args.diff,
    };

    let store = StateStore::from_manifest(&manifest, args.state_dir.as_deref());
    let runtime = Arc::new(CommandRuntime::new(&manifest.runtime));
    let ctx = RunContext::new(manifest, runtime, store, options)?;

    let outcome = healthgate_runner::run(&ctx).await?;
    if args.json {
        println!("{}", render_json(&outcome).context("serialize report")?);
    } else {
        print!("{}", render_human(&outcome));
    }

    Ok(if outcome.run.has_errors() {
        ExitCode::from(EXIT_ISSUES)
    } else {
        ExitCode::SUCCESS
    })
}
