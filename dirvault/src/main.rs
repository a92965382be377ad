//! dirvault - Main entry point
//!
//! Runs the jobs of a JSON job file against the backup engine.

use anyhow::{bail, Context, Result};
use clap::Parser;
use dirvault::{config::Config, daemon::shutdown::ShutdownCoordinator, job, utils, Engine};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the JSON job file
    #[arg(value_name = "JOBS")]
    jobs: PathBuf,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Write an example job file to JOBS and exit
    #[arg(long)]
    write_example: bool,

    /// Environment variable holding the archive password
    #[arg(long, default_value = "DIRVAULT_PASSWORD")]
    password_env: String,

    /// Write the JSON run report to this file
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,
}

fn read_password(env_var: &str) -> Result<String> {
    match std::env::var(env_var) {
        Ok(password) => Ok(password),
        Err(_) => rpassword::prompt_password("Archive password: ").context("Failed to read password"),
    }
}

fn write_example(jobs: &Path) -> Result<()> {
    let base = match jobs.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    job::write_example(jobs, &base)?;
    tracing::info!("Example job file written to {}", jobs.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = if let Some(config_path) = &args.config {
        Config::from_file(config_path)?
    } else {
        Config::default()
    };

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    if args.write_example {
        return write_example(&args.jobs);
    }

    tracing::info!("Starting dirvault v{}", env!("CARGO_PKG_VERSION"));

    let jobs = job::load_jobs(&args.jobs)
        .with_context(|| format!("Failed to load job file {}", args.jobs.display()))?;
    let password = read_password(&args.password_env)?;

    let shutdown_coordinator = std::sync::Arc::new(ShutdownCoordinator::new());
    let engine = Engine::new(&config)?.with_cancel(shutdown_coordinator.token());

    let signal_waiter = shutdown_coordinator.clone();
    let signal_handle = tokio::spawn(async move {
        signal_waiter.wait_for_signal().await;
    });

    let reports = tokio::task::spawn_blocking(move || job::run_jobs(&engine, &jobs, &password))
        .await
        .context("Job runner panicked")?;
    signal_handle.abort();

    if let Some(report_path) = &args.report {
        let json = serde_json::to_string_pretty(&reports)?;
        std::fs::write(report_path, json)
            .with_context(|| format!("Failed to write report {}", report_path.display()))?;
    }

    let failed = reports.iter().filter(|report| !report.is_clean()).count();
    tracing::info!(jobs = reports.len(), failed, "All jobs finished");

    if shutdown_coordinator.token().is_cancelled() {
        bail!("Cancelled");
    }
    if failed > 0 {
        bail!("{failed} job(s) reported errors");
    }
    Ok(())
}
