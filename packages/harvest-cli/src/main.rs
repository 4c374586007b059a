//! Command-line runner for extraction jobs.
//!
//! Runs one or more job profiles against a SPARQL endpoint, one after the
//! other with a cool-down between them. Ctrl+C stops the current job, which
//! saves its partial artifact, and skips the remaining ones.

mod config;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use harvest::clients::{QueryClientExt, SparqlQueryClient};
use harvest::export::{coverage, export_csv};
use harvest::profiles::{builtin, builtin_names};
use harvest::{
    ExtractionJob, HarvestConfig, HarvestError, JobParams, JobProfile, PipelineOrchestrator,
    QueryClient, RunOutcome, RunReport,
};
use sparql_client::SparqlClient;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

/// Conventional exit status after SIGINT.
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser)]
#[command(name = "harvest")]
#[command(about = "Resilient paginated extraction from a SPARQL endpoint")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one or more extraction jobs
    Run(RunArgs),

    /// List built-in job profiles
    Profiles,
}

#[derive(Args)]
struct RunArgs {
    /// Built-in profile to run (repeatable)
    #[arg(long = "profile", short = 'p')]
    profiles: Vec<String>,

    /// JSON profile file to run (repeatable)
    #[arg(long = "profile-file")]
    profile_files: Vec<PathBuf>,

    /// First batch number
    #[arg(long, default_value_t = 0)]
    start_batch: usize,

    /// Entities requested per page
    #[arg(long, default_value_t = 10)]
    batch_size: usize,

    /// Stop before this batch number
    #[arg(long, default_value_t = 3)]
    max_batches: usize,

    /// Continue from each job's checkpoint
    #[arg(long)]
    resume: bool,

    /// Entities enriched at once
    #[arg(long, default_value_t = 1)]
    concurrency: usize,

    /// Pause between two jobs
    #[arg(long, default_value_t = 30)]
    cooldown_secs: u64,

    /// Skip the CSV export
    #[arg(long)]
    no_export: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,harvest=debug,sparql_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Profiles => {
            list_profiles();
            Ok(())
        }
        Commands::Run(args) => {
            let config = Config::from_env().context("Failed to load configuration")?;
            let outcome = run(args, config).await?;
            if outcome == RunOutcome::Interrupted {
                std::process::exit(EXIT_INTERRUPTED);
            }
            Ok(())
        }
    }
}

fn list_profiles() {
    for name in builtin_names() {
        if let Some(profile) = builtin(name) {
            println!(
                "{:<24} {} ({} branches, {} detail queries)",
                profile.name,
                profile.description,
                profile.branches.len(),
                profile.details.len()
            );
        }
    }
}

fn load_profiles(args: &RunArgs) -> Result<Vec<JobProfile>> {
    let mut profiles = Vec::new();
    for name in &args.profiles {
        let profile = builtin(name).with_context(|| {
            format!(
                "Unknown profile '{}' (available: {})",
                name,
                builtin_names().join(", ")
            )
        })?;
        profiles.push(profile);
    }
    for path in &args.profile_files {
        let profile = JobProfile::from_json_file(path)
            .with_context(|| format!("Failed to load profile {}", path.display()))?;
        profiles.push(profile);
    }
    if profiles.is_empty() {
        bail!("No profile given; use --profile or --profile-file (see `harvest profiles`)");
    }
    Ok(profiles)
}

fn build_client(config: &Config) -> Arc<dyn QueryClient> {
    let client = SparqlQueryClient::new(SparqlClient::new(
        &config.sparql_endpoint,
        &config.user_agent,
    ));
    match config.requests_per_minute {
        Some(rpm) => {
            tracing::info!(requests_per_minute = rpm, "Request budget enabled");
            Arc::new(client.rate_limited(rpm))
        }
        None => Arc::new(client),
    }
}

/// Run every requested job; returns the outcome of the last one started.
async fn run(args: RunArgs, config: Config) -> Result<RunOutcome> {
    let profiles = load_profiles(&args)?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::warn!("Received interrupt, stopping after the current unit of work");
        shutdown.cancel();
    });

    tracing::info!(
        endpoint = %config.sparql_endpoint,
        output_dir = %config.output_dir.display(),
        jobs = profiles.len(),
        "Configuration loaded"
    );

    let harvest_config = HarvestConfig::new()
        .with_output_dir(&config.output_dir)
        .with_concurrency(args.concurrency);
    let orchestrator = PipelineOrchestrator::new(build_client(&config), harvest_config)
        .with_cancel(cancel.clone());

    let params = JobParams {
        start_batch: args.start_batch,
        batch_size: args.batch_size,
        max_batches: args.max_batches,
    };

    let mut last = RunOutcome::Completed;
    for (i, profile) in profiles.into_iter().enumerate() {
        if i > 0 && args.cooldown_secs > 0 {
            tracing::info!(secs = args.cooldown_secs, "Cooling down before next job");
            tokio::select! {
                _ = cancel.cancelled() => return Ok(RunOutcome::Interrupted),
                _ = tokio::time::sleep(Duration::from_secs(args.cooldown_secs)) => {}
            }
        }

        let job = ExtractionJob::new(Arc::new(profile), params)
            .context("Invalid job parameters")?;
        let name = job.name().to_string();

        let result = if args.resume {
            orchestrator.resume(job).await
        } else {
            orchestrator.run(job).await
        };

        let report = match result {
            Ok(report) => report,
            Err(HarvestError::Fatal { reason, artifact }) => {
                let saved = artifact
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "nothing".to_string());
                bail!("Job '{}' failed: {} (saved: {})", name, reason, saved);
            }
            Err(e) => return Err(e).with_context(|| format!("Job '{}' failed", name)),
        };

        print_summary(&report);

        if !args.no_export && !report.data.is_empty() {
            let path = config.output_dir.join(format!("{}.csv", report.job));
            if let Err(e) = export_csv(&report.data, &path).await {
                tracing::warn!(path = %path.display(), error = %e, "CSV export failed");
            }
        }

        last = report.outcome;
        if last == RunOutcome::Interrupted {
            break;
        }
    }

    Ok(last)
}

fn print_summary(report: &RunReport) {
    println!();
    println!("Job:      {}", report.job);
    println!("Outcome:  {:?}", report.outcome);
    println!("Batches:  {}", report.batches);
    println!("Records:  {}", report.records);
    if let Some(path) = &report.artifact {
        println!("Saved to: {}", path.display());
    }

    let stats = coverage(&report.data);
    if !stats.is_empty() {
        println!("Coverage:");
        for field in stats {
            println!(
                "  {:<24} {:>6}/{:<6} ({:.1}%)",
                field.field,
                field.populated,
                field.total,
                field.percent()
            );
        }
    }
}
