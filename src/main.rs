//! `segment-forge` -- generate and assemble segment audio against a remote TTS pool.
//!
//! - `segment-forge run <DIR>` -- synthesize every segment in `DIR/manifest.json`
//!   and assemble them into one file plus `timeline.json`.
//! - `segment-forge status` -- print the remote queue.
//! - `segment-forge clear-queue [--worker N]` -- cancel queued remote jobs.
//! - `segment-forge jobs` -- list the jobs the remote is tracking.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use segment_forge::kernel::gate::QueuePolicy;
use segment_forge::services::tts::{HttpRemoteClient, RemoteClient};
use segment_forge::{Catalog, ForgeConfig, Orchestrator, RunError};

#[derive(Parser)]
#[command(name = "segment-forge", about = "Segment audio orchestrator", version)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate missing segments and assemble the episode.
    Run(RunArgs),

    /// Show the remote queue.
    Status {
        /// Remote base URL (overrides config).
        #[arg(long)]
        remote: Option<String>,
    },

    /// Cancel queued (not yet running) jobs on the remote.
    ClearQueue {
        /// Only this worker; default is every worker the remote reports.
        #[arg(long)]
        worker: Option<u32>,

        /// Remote base URL (overrides config).
        #[arg(long)]
        remote: Option<String>,
    },

    /// List jobs tracked by the remote.
    Jobs {
        /// Remote base URL (overrides config).
        #[arg(long)]
        remote: Option<String>,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Directory holding manifest.json and one {name}.txt per segment.
    dir: PathBuf,

    /// Output directory for artifacts (default: DIR/audio).
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Dispatch even if the remote queue is not empty.
    #[arg(long, conflicts_with = "wait")]
    force: bool,

    /// Wait for the remote queue to drain before dispatching.
    #[arg(long)]
    wait: bool,

    /// Remote base URL (overrides config).
    #[arg(long)]
    remote: Option<String>,

    /// Maximum simultaneous synthesis calls (overrides config).
    #[arg(long)]
    concurrency: Option<usize>,
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "segment_forge=debug"
    } else {
        "segment_forge=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("tracing subscriber already installed");
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<ForgeConfig> {
    match path {
        Some(path) => ForgeConfig::load(path).with_context(|| format!("loading {}", path.display())),
        None => Ok(ForgeConfig::default()),
    }
}

fn http_client(config: &ForgeConfig, remote: Option<String>) -> Result<HttpRemoteClient> {
    let mut remote_config = config.remote.clone();
    if let Some(remote) = remote {
        remote_config.base_url = remote;
    }
    HttpRemoteClient::new(&remote_config, config.validity_rule()).context("building HTTP client")
}

fn client_for(config: &ForgeConfig) -> Result<Arc<dyn RemoteClient>> {
    Ok(Arc::new(http_client(config, None)?))
}

async fn run(mut config: ForgeConfig, args: RunArgs) -> Result<ExitCode> {
    if let Some(remote) = args.remote {
        config.remote.base_url = remote;
    }
    if let Some(n) = args.concurrency {
        config.dispatch.max_concurrency = n;
    }
    if args.force {
        config.dispatch.queue_policy = QueuePolicy::Proceed;
    } else if args.wait {
        config.dispatch.queue_policy = QueuePolicy::Wait;
    }
    config.validate()?;

    let catalog = Catalog::load_manifest(&args.dir)
        .with_context(|| format!("loading catalog from {}", args.dir.display()))?;
    tracing::info!(
        "Loaded {} segments (~{:.1} min estimated)",
        catalog.len(),
        catalog.estimated_total_duration() / 60.0
    );

    let output = args.output.unwrap_or_else(|| args.dir.join("audio"));
    let client = client_for(&config)?;
    let orchestrator = Orchestrator::new(&output, config, client);

    match orchestrator.run(&catalog).await {
        Ok(report) => {
            println!("Output:   {}", report.timeline.output().display());
            println!("Timeline: {}", report.timeline_path.display());
            println!(
                "Segments: {} ({} existing, {} submitted, {} retries, {} recovered)",
                report.timeline.entries().len(),
                report.existing.len(),
                report.submitted,
                report.retries_used,
                report.recovered.len()
            );
            for chapter in report.timeline.chapters() {
                println!(
                    "  {:>8.1}s  {}",
                    chapter.start.as_secs_f64(),
                    chapter.title
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            report_failure(&e);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn report_failure(e: &RunError) {
    eprintln!("error [{}]: {}", e.category(), e);
    if let RunError::Exhausted { failures, .. } = e {
        for f in failures {
            eprintln!("  {}: {}", f.name, f.reason);
        }
    } else {
        for name in e.failed_segments() {
            eprintln!("  {name}");
        }
    }
}

async fn status(config: ForgeConfig, remote: Option<String>) -> Result<ExitCode> {
    let client = http_client(&config, remote)?;
    let status = client
        .poll_status()
        .await
        .with_context(|| format!("querying {}", client.base_url()))?;

    println!(
        "{} active, {} queued, {} completed",
        status.active_count, status.queued_count, status.completed_counter
    );
    for worker in &status.workers {
        let active = worker.active.as_deref().unwrap_or("idle");
        println!("  worker {}: {} queued, {}", worker.id, worker.queued, active);
    }
    Ok(ExitCode::SUCCESS)
}

async fn clear_queue(config: ForgeConfig, worker: Option<u32>, remote: Option<String>) -> Result<ExitCode> {
    let client = http_client(&config, remote)?;
    let results = match worker {
        Some(id) => vec![(id, client.clear_worker_queue(id).await)],
        None => client
            .clear_all_queues()
            .await
            .with_context(|| format!("querying {}", client.base_url()))?,
    };

    let mut cleared_any = false;
    for (id, result) in results {
        match result {
            Ok(cancelled) => {
                cleared_any = true;
                println!("  worker {id}: cleared {cancelled} queued jobs");
            }
            Err(e) => eprintln!("  worker {id}: {e}"),
        }
    }
    if !cleared_any {
        println!("No queues were cleared. They may already be empty.");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

async fn jobs(config: ForgeConfig, remote: Option<String>) -> Result<ExitCode> {
    let client = http_client(&config, remote)?;
    let jobs = client
        .list_jobs()
        .await
        .with_context(|| format!("listing jobs on {}", client.base_url()))?;

    if jobs.is_empty() {
        println!("No jobs tracked.");
        return Ok(ExitCode::SUCCESS);
    }
    println!("{:<10} {:<12} {:<7} {:<10} Text", "ID", "Status", "Worker", "Submitted");
    for job in &jobs {
        let worker = job.worker_id.map_or_else(|| "-".to_string(), |w| w.to_string());
        let submitted = job
            .submitted_at
            .and_then(|secs| chrono::DateTime::from_timestamp(secs as i64, 0))
            .map_or_else(String::new, |t| t.format("%H:%M:%S").to_string());
        let preview: String = job.text_preview.chars().take(50).collect();
        println!(
            "{:<10} {:<12} {:<7} {:<10} {}",
            job.job_id, job.status, worker, submitted, preview
        );
    }
    println!("Total: {} jobs", jobs.len());
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(cli.config.as_ref())?;
    match cli.command {
        Command::Run(args) => run(config, args).await,
        Command::Status { remote } => status(config, remote).await,
        Command::ClearQueue { worker, remote } => clear_queue(config, worker, remote).await,
        Command::Jobs { remote } => jobs(config, remote).await,
    }
}
