//! users-migrate CLI - batched user-account migration.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use users_migrate::{Config, MigrateError, MigrationResult, Orchestrator, RunStatus};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "users-migrate")]
#[command(about = "Batched, resumable user-account migration")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Path to state file for resume capability
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Print progress updates as JSON lines to stderr
    #[arg(long)]
    progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new migration
    Run {
        /// Override documents requested per source page
        #[arg(long)]
        page_size: Option<usize>,

        /// Override records per bulk upsert
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Resume a previously interrupted migration
    Resume {
        /// Override documents requested per source page
        #[arg(long)]
        page_size: Option<usize>,

        /// Override records per bulk upsert
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Compare source document and destination record counts
    Validate,

    /// Test source and destination connections
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(|e| MigrateError::Config(e.to_string()))?;

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Run {
            page_size,
            batch_size,
        } => {
            apply_overrides(&mut config, page_size, batch_size)?;
            let cancel_token = setup_signal_handler()?;

            let mut orchestrator = Orchestrator::new(config.with_auto_tuning())
                .await?
                .with_progress(cli.progress);
            if let Some(ref path) = cli.state_file {
                orchestrator = orchestrator.with_state_file(path.clone());
            }

            let result = orchestrator.run(cancel_token).await?;
            report(&result, cli.output_json)?;
        }

        Commands::Resume {
            page_size,
            batch_size,
        } => {
            let state_file = cli.state_file.ok_or_else(|| {
                MigrateError::Config("--state-file is required for resume".to_string())
            })?;
            if !state_file.exists() {
                return Err(MigrateError::Config(format!(
                    "State file not found: {:?}",
                    state_file
                )));
            }
            apply_overrides(&mut config, page_size, batch_size)?;
            let cancel_token = setup_signal_handler()?;

            let orchestrator = Orchestrator::new(config.with_auto_tuning())
                .await?
                .with_state_file(state_file)
                .with_progress(cli.progress)
                .resume()?;

            info!("Resuming from previous state");
            let result = orchestrator.run(cancel_token).await?;
            report(&result, cli.output_json)?;
        }

        Commands::Validate => {
            let orchestrator = Orchestrator::new(config).await?;
            let counts = orchestrator.validate().await?;
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&counts)?);
            } else {
                match counts.source_count {
                    Some(source) => println!("  Source documents: {}", source),
                    None => println!("  Source documents: unknown"),
                }
                println!("  Destination users: {}", counts.destination_count);
                println!(
                    "  Counts: {}",
                    if counts.matches { "MATCH" } else { "MISMATCH" }
                );
            }
            println!("Validation completed successfully");
        }

        Commands::HealthCheck => {
            let orchestrator = Orchestrator::new(config).await?;
            let result = orchestrator.health_check().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source ({}): {} ({}ms)",
                    result.source_type,
                    if result.source_connected { "OK" } else { "FAILED" },
                    result.source_latency_ms
                );
                if let Some(ref err) = result.source_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "  Destination ({}): {} ({}ms)",
                    result.destination_type,
                    if result.destination_connected { "OK" } else { "FAILED" },
                    result.destination_latency_ms
                );
                if let Some(ref err) = result.destination_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.source_connected {
                return Err(MigrateError::SourceUnavailable(
                    "Health check failed".to_string(),
                ));
            }
            if !result.destination_connected {
                return Err(MigrateError::DestinationUnavailable(
                    "Health check failed".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn apply_overrides(
    config: &mut Config,
    page_size: Option<usize>,
    batch_size: Option<usize>,
) -> Result<(), MigrateError> {
    if let Some(size) = page_size {
        config.migration.page_size = size;
    }
    if let Some(size) = batch_size {
        config.migration.batch_size = size;
    }
    config.validate()
}

/// Print the run summary; a cancelled run still reports, then fails.
fn report(result: &MigrationResult, output_json: bool) -> Result<(), MigrateError> {
    if output_json {
        println!("{}", result.to_json()?);
    } else {
        let status_msg = match result.status {
            RunStatus::Cancelled => "Migration cancelled.",
            _ => "Migration completed!",
        };
        println!("\n{}", status_msg);
        println!("  Run ID: {}", result.run_id);
        println!("  Duration: {:.2}s", result.duration_seconds);
        println!("  Pages: {}", result.pages_fetched);
        println!("  Processed: {}", result.processed);
        println!("  Inserted: {}", result.inserted);
        println!("  Updated: {}", result.updated);
        println!("  Invalid: {}", result.validation_failed);
        println!("  Write failures: {}", result.write_failed);
        println!(
            "  Batches: {} ({} failed)",
            result.batches_written, result.batches_failed
        );
        println!("  Throughput: {:.0} records/sec", result.records_per_second);
    }

    if result.status == RunStatus::Cancelled {
        return Err(MigrateError::Cancelled);
    }
    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token_int = cancel_token.clone();
    tokio::spawn(async move {
        sigint.recv().await;
        eprintln!("\nReceived SIGINT. Finishing the current page...");
        token_int.cancel();
    });

    let token_term = cancel_token.clone();
    tokio::spawn(async move {
        sigterm.recv().await;
        eprintln!("\nReceived SIGTERM. Finishing the current page...");
        token_term.cancel();
    });

    Ok(cancel_token)
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Finishing the current page...");
            token.cancel();
        }
    });

    Ok(cancel_token)
}
