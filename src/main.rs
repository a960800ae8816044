use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use fantasy_slots::config::Config;
use fantasy_slots::db::SqliteSlotStore;
use fantasy_slots::{CleanupReport, Mode, Resolver};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const EXIT_INCOMPLETE: u8 = 1;
const EXIT_FATAL: u8 = 2;

#[derive(Parser)]
#[command(name = "cleanup_slots")]
#[command(
    about = "Find and remove duplicate slots that share a normalized code",
    long_about = None
)]
struct Cli {
    /// Report duplicates without deleting anything (default)
    #[arg(long, conflicts_with = "apply")]
    dry_run: bool,
    /// Delete every duplicate except the oldest slot per code
    #[arg(long)]
    apply: bool,
    /// Overrides DATABASE_URL
    #[arg(long)]
    database_url: Option<String>,
    /// Maximum deletions in flight; overrides CLEANUP_CONCURRENCY
    #[arg(long)]
    concurrency: Option<usize>,
    /// Time budget for the whole run; overrides CLEANUP_TIMEOUT_SECS
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,
    /// Load this file instead of looking up .env
    #[arg(long)]
    env_file: Option<PathBuf>,
    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr so the report on stdout stays machine-readable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = match Config::load(cli.env_file.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!("Invalid configuration: {err}");
            return ExitCode::from(EXIT_FATAL);
        }
    };

    let database_url = cli.database_url.unwrap_or(config.database_url);
    tracing::info!("Connecting to database at: {}", database_url);

    let store = match SqliteSlotStore::connect(&database_url).await {
        Ok(store) => store,
        Err(err) => {
            tracing::error!("{err}");
            return ExitCode::from(EXIT_FATAL);
        }
    };

    let mode = if cli.apply && !cli.dry_run { Mode::Apply } else { Mode::DryRun };
    let mut builder = Resolver::builder()
        .mode(mode)
        .concurrency(cli.concurrency.unwrap_or(config.concurrency));
    if let Some(timeout) = cli.timeout.map(Duration::from_secs).or(config.timeout) {
        builder = builder.deadline(timeout);
    }
    let resolver = builder.build();

    let cancel = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    let report = match resolver.run_until(Arc::new(store), cancel).await {
        Ok(report) => report,
        Err(err) => {
            tracing::error!("Slot cleanup aborted: {err}");
            return ExitCode::from(EXIT_FATAL);
        }
    };

    if let Err(err) = print_report(&report, cli.json) {
        tracing::error!("Failed to render report: {err}");
        return ExitCode::from(EXIT_FATAL);
    }

    if report.is_complete() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_INCOMPLETE)
    }
}

fn print_report(report: &CleanupReport, json: bool) -> Result<(), serde_json::Error> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        println!("{}", report);
    }
    Ok(())
}
