mod app;
mod check_commands;
mod command_job;
mod jobs_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "cadence", about = "Cadence: recurring background jobs", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file to use instead of the discovered `cadence.{toml,yaml,json}`.
    #[arg(long, global = true, env = "CADENCE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until Ctrl-C (default when no subcommand is provided).
    Run,
    /// List configured jobs and their next fire times.
    Jobs {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Validate the configuration file and report errors/warnings.
    Check {
        /// Show informational diagnostics in addition to errors and warnings.
        #[arg(long)]
        verbose: bool,
    },
}

/// Logs go to stderr so `jobs --json` output stays parseable.
fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = app::load_config(cli.config.as_deref())?;
    if config.jobs.is_empty() {
        warn!("no jobs configured");
    }

    let service = app::build_service(&config).await?;
    service.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    service.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "cadence starting");

    match cli.command {
        None | Some(Commands::Run) => run(&cli).await,
        Some(Commands::Jobs { json }) => {
            let config = app::load_config(cli.config.as_deref())?;
            jobs_commands::list_jobs(&config, json)
        },
        Some(Commands::Check { verbose }) => check_commands::check(cli.config.as_deref(), verbose),
    }
}
