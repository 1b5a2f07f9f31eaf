mod daemon;
mod status;

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use updated_config::{TelemetryConfig, UpdaterConfig};

const DEFAULT_CONFIG_PATH: &str = "/data/updated/updated.toml";

#[derive(Debug, Parser)]
#[command(
    name = "updated",
    version,
    about = "Stages software updates in an overlay and finalizes them for the next boot"
)]
struct Cli {
    /// TOML config file.  Missing file means built-in defaults.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the update loop until SIGTERM/SIGINT (default).
    Run {
        /// Skip the root check.  Mounting will still need privileges.
        #[arg(long)]
        allow_unprivileged: bool,
    },
    /// Show published status and staging state.
    Status,
    /// Print the effective configuration.
    Config {
        /// Print the config file path instead.
        #[arg(long)]
        path: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = UpdaterConfig::load_from(&cli.config)?;

    match cli.command.unwrap_or(Commands::Run {
        allow_unprivileged: false,
    }) {
        Commands::Run { allow_unprivileged } => {
            let _guard = init_tracing(&config.telemetry);
            daemon::run_daemon(config, allow_unprivileged).await?;
        }
        Commands::Status => {
            init_console_tracing(&config.telemetry);
            print!("{}", status::render(&config)?);
        }
        Commands::Config { path } => {
            if path {
                println!("{}", cli.config.display());
            } else {
                print!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }
    Ok(())
}

fn env_filter(telemetry: &TelemetryConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&telemetry.log_level))
}

fn init_console_tracing(telemetry: &TelemetryConfig) {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(telemetry))
        .with_writer(std::io::stderr)
        .init();
}

/// Console logging, plus a daily rolling file when `log_dir` is set.  The
/// returned guard flushes the file writer and must outlive the daemon.
fn init_tracing(telemetry: &TelemetryConfig) -> Option<WorkerGuard> {
    if telemetry.log_dir.is_empty() {
        init_console_tracing(telemetry);
        return None;
    }

    let file_appender = tracing_appender::rolling::daily(Path::new(&telemetry.log_dir), "updated");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(env_filter(telemetry))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .init();
    Some(guard)
}
