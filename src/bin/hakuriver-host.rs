//! HakuRiver Host daemon — the cluster Coordinator.

use anyhow::Result;
use clap::Parser;
use tracing::error;

use hakuriver::cmd;

#[derive(Parser)]
#[command(name = "hakuriver-host")]
#[command(about = "HakuRiver Host coordinator daemon")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<cmd::Commands>,

    /// Path to configuration file
    #[arg(short, long, default_value = "host.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("hakuriver_host={log_level}").into()),
        )
        .init();

    tracing::info!("starting hakuriver-host v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Some(cmd::Commands::Diagnostics) => {
            cmd::diagnostics::run().await?;
        }
        None => {
            if let Err(e) = cmd::host::run(&cli.config).await {
                error!("host daemon error: {e}");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
