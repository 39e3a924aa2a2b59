//! HakuRiver Runner daemon — executes tasks on one cluster node.

use anyhow::Result;
use clap::Parser;
use tracing::error;

use hakuriver::cmd;

#[derive(Parser)]
#[command(name = "hakuriver-runner")]
#[command(about = "HakuRiver Runner agent daemon")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<cmd::Commands>,

    /// Path to configuration file
    #[arg(short, long, default_value = "runner.toml")]
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
                .unwrap_or_else(|_| format!("hakuriver_runner={log_level}").into()),
        )
        .init();

    tracing::info!("starting hakuriver-runner v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Some(cmd::Commands::Diagnostics) => {
            cmd::diagnostics::run().await?;
        }
        None => {
            if let Err(e) = cmd::runner::run(&cli.config).await {
                error!("runner daemon error: {e}");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
