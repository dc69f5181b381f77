use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use opps_sync::{AppConfig, SyncRunner, SyncService};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "opps-cli")]
#[command(about = "Opportunity platform sync service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP server with the trigger endpoints.
    Serve,
    /// Refresh the search index and edge cache once.
    Earn,
    /// Pull the job board and reconcile it into the records store once.
    Getro,
    /// Re-publish the edge cache once.
    Index,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env();
    let runner = SyncRunner::from_config(&config)?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let state = opps_web::AppState::new(Arc::new(runner), config.auth_token.clone());
            opps_web::serve(state, config.port).await?;
        }
        Commands::Earn => {
            let message = runner.update_index().await?;
            println!("{message}");
        }
        Commands::Getro => {
            let message = runner.sync_board_jobs().await?;
            println!("{message}");
        }
        Commands::Index => {
            let message = runner.publish_cache_index().await?;
            println!("{message}");
        }
    }

    Ok(())
}
