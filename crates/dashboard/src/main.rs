//! `engage-dashboard` -- terminal front end for the engagement-analysis
//! service.
//!
//! Submits brand-matching jobs, follows them over both the status-polling
//! loop and the push channel, and renders the shared log stream. Also
//! wraps the file-selection and result-browsing endpoints.
//!
//! # Environment variables
//!
//! | Variable               | Required | Default                 | Description                      |
//! |------------------------|----------|-------------------------|----------------------------------|
//! | `ENGAGE_API_URL`       | no       | `http://127.0.0.1:8000` | HTTP base URL of the service     |
//! | `ENGAGE_WS_URL`        | no       | derived from API URL    | WebSocket base URL               |
//! | `POLL_INTERVAL_SECS`   | no       | `10`                    | Seconds between status polls     |
//! | `HEALTH_INTERVAL_SECS` | no       | `10`                    | Seconds between health probes    |
//! | `REQUEST_TIMEOUT_SECS` | no       | `30`                    | HTTP request timeout             |

use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use engage_client::api::JobApi;
use engage_client::config::ClientConfig;
use engage_client::dashboard::{Dashboard, LeaveDecision};
use engage_client::events::MonitorEvent;
use engage_core::job::{Job, JobStatus};
use engage_core::log::LogEntry;
use engage_core::request::{
    JobRequest, DEFAULT_CONTENT_WEIGHT, DEFAULT_OUTPUT_FILENAME, DEFAULT_POSTS_FILE,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "engage-dashboard")]
#[command(about = "Submit and monitor brand engagement analysis jobs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a job and follow it until it finishes.
    Run(RunArgs),
    /// Follow an existing job.
    Watch { job_id: String },
    /// Check whether the service is reachable.
    Health,
    /// List posts files available as job input.
    Files,
    /// Upload a local `.txt` posts file.
    Upload { path: PathBuf },
    /// List result files, or show one page of a result file.
    Results(ResultsArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Comma-separated brand values, e.g. "eco-friendly, playful".
    #[arg(long)]
    brand_values: String,

    /// Weight of content similarity against engagement, in [0, 1].
    #[arg(long, default_value_t = DEFAULT_CONTENT_WEIGHT)]
    content_weight: f64,

    #[arg(long, default_value = DEFAULT_POSTS_FILE)]
    posts_file: String,

    #[arg(long, default_value = DEFAULT_OUTPUT_FILENAME)]
    output_filename: String,

    #[arg(long)]
    no_cache: bool,

    #[arg(long)]
    no_checkpoint: bool,

    /// Save the result file into this directory once the job completes.
    #[arg(long)]
    download: Option<PathBuf>,
}

#[derive(Args)]
struct ResultsArgs {
    /// Result file to page through. Lists all result files when omitted.
    file: Option<String>,

    #[arg(long, default_value_t = 1)]
    page: u32,

    #[arg(long, default_value_t = 10)]
    limit: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "engage_dashboard=info,engage_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = ClientConfig::from_env().context("Invalid configuration")?;

    tracing::info!(
        api_url = %config.api_url,
        ws_url = %config.ws_url,
        poll_interval_secs = config.monitor.poll_interval.as_secs(),
        "Starting engage-dashboard",
    );

    match cli.command {
        Commands::Run(args) => run_job(&config, args).await,
        Commands::Watch { job_id } => watch_job(&config, job_id).await,
        Commands::Health => check_health(&config).await,
        Commands::Files => list_files(&config).await,
        Commands::Upload { path } => upload(&config, path).await,
        Commands::Results(args) => show_results(&config, args).await,
    }
}

// ---------------------------------------------------------------------------
// Job commands
// ---------------------------------------------------------------------------

async fn run_job(config: &ClientConfig, args: RunArgs) -> Result<()> {
    let dashboard = Dashboard::new(config)?;
    let printer = spawn_printer(dashboard.subscribe());

    let mut request = JobRequest::new(args.brand_values);
    request.content_weight = args.content_weight;
    request.posts_file = args.posts_file;
    request.output_filename = args.output_filename;
    request.use_cache = !args.no_cache;
    request.use_checkpoint = !args.no_checkpoint;

    let job = dashboard
        .submit_job(&request)
        .await
        .context("Failed to submit job")?;
    println!("Submitted job {}", job.id);

    let result = follow(&dashboard).await;

    if let (Ok(Some(job)), Some(dir)) = (&result, &args.download) {
        if job.status == JobStatus::Completed {
            let path = dashboard
                .download_result(dir)
                .await
                .context("Failed to download result")?;
            println!("Saved result to {}", path.display());
        }
    }

    dashboard.shutdown().await;
    printer.abort();
    report(result?)
}

async fn watch_job(config: &ClientConfig, job_id: String) -> Result<()> {
    let dashboard = Dashboard::new(config)?;
    let printer = spawn_printer(dashboard.subscribe());

    dashboard.watch_job(job_id);
    let result = follow(&dashboard).await;

    dashboard.shutdown().await;
    printer.abort();
    report(result?)
}

/// Block until the monitored job stops. Ctrl-C goes through the leave
/// guard; returns `None` when the user chose to terminate and leave.
async fn follow(dashboard: &Dashboard) -> Result<Option<Job>> {
    loop {
        tokio::select! {
            _ = dashboard.monitor().wait_until_stopped() => break,
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                match dashboard.request_leave(confirm_leave).await {
                    LeaveDecision::Stay => println!("Continuing to monitor"),
                    LeaveDecision::Leave => return Ok(None),
                }
            }
        }
    }

    Ok(dashboard.store().current())
}

async fn confirm_leave(job: Job) -> bool {
    let prompt = format!(
        "Job {} is {} ({:.0}%). Terminate it and leave? [y/N] ",
        job.id, job.status, job.progress
    );

    let answer = tokio::task::spawn_blocking(move || {
        print!("{prompt}");
        std::io::stdout().flush().ok();
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).map(|_| line)
    })
    .await;

    matches!(answer, Ok(Ok(line)) if line.trim().eq_ignore_ascii_case("y"))
}

fn report(job: Option<Job>) -> Result<()> {
    let Some(job) = job else {
        println!("Job terminated");
        return Ok(());
    };

    println!("{}", job.status_line());
    match job.status {
        JobStatus::Failed => bail!(
            "Job {} failed: {}",
            job.id,
            job.error_message.as_deref().unwrap_or("unknown error")
        ),
        _ => Ok(()),
    }
}

fn spawn_printer(mut events: broadcast::Receiver<MonitorEvent>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(MonitorEvent::LogAppended(entry)) => print_entry(&entry),
                Ok(MonitorEvent::ConnectivityChanged { connected: false }) => {
                    println!("(service unreachable)");
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Log output fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn print_entry(entry: &LogEntry) {
    println!(
        "[{}] {:<7} {}",
        entry.timestamp,
        entry.level.as_str().to_uppercase(),
        entry.message
    );
}

// ---------------------------------------------------------------------------
// Collaborator commands
// ---------------------------------------------------------------------------

fn api(config: &ClientConfig) -> Result<JobApi> {
    JobApi::new(config.api_url.clone(), config.request_timeout())
        .context("Failed to build HTTP client")
}

async fn check_health(config: &ClientConfig) -> Result<()> {
    api(config)?
        .health()
        .await
        .with_context(|| format!("Service at {} is unreachable", config.api_url))?;
    println!("Service at {} is reachable", config.api_url);
    Ok(())
}

async fn list_files(config: &ClientConfig) -> Result<()> {
    let files = api(config)?.list_files().await?;
    if files.is_empty() {
        println!("No posts files found");
    }
    for file in files {
        println!(
            "{:<40} {:>10} bytes  {}",
            file.path,
            file.size,
            file.modified.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

async fn upload(config: &ClientConfig, path: PathBuf) -> Result<()> {
    let uploaded = api(config)?
        .upload_file(&path)
        .await
        .with_context(|| format!("Failed to upload {}", path.display()))?;
    println!("Uploaded {} ({} bytes) as {}", uploaded.filename, uploaded.size, uploaded.path);
    Ok(())
}

async fn show_results(config: &ClientConfig, args: ResultsArgs) -> Result<()> {
    let api = api(config)?;

    let Some(file) = args.file else {
        for file in api.list_result_files().await? {
            println!("{:<40} {:>10} bytes", file.filename, file.size);
        }
        return Ok(());
    };

    let page = api.result_page(&file, args.page, args.limit).await?;
    for row in &page.results {
        println!("{}", serde_json::to_string(row)?);
    }
    let p = &page.pagination;
    println!(
        "Page {}/{} ({} rows total)",
        p.current_page, p.total_pages, p.total_items
    );
    Ok(())
}
