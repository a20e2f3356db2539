mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Version => commands::version::run(),
        Commands::Check => commands::check::run().await?,
        Commands::Policies => commands::policies::run().await?,
        Commands::Crd { action } => commands::crd::run(action).await?,
        Commands::Run {
            gc_interval,
            max_deletions_per_second,
            batch_size,
            cache_sync_timeout,
            error_recovery_successes,
            max_concurrent_evaluations,
            metrics_addr,
        } => {
            commands::run::run(commands::run::RunArgs {
                gc_interval,
                max_deletions_per_second,
                batch_size,
                cache_sync_timeout,
                error_recovery_successes,
                max_concurrent_evaluations,
                metrics_addr,
            })
            .await?
        }
    }

    Ok(())
}
