use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use roster_sync::SyncConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "roster-cli")]
#[command(about = "Leaguepedia player roster sync")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one sync over every enabled source.
    Sync,
    /// Apply database migrations.
    Migrate,
    /// Serve the HTTP API.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("roster=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let result = roster_sync::run_sync_once_from_env().await?;
            println!(
                "sync complete: created={} updated={} skipped={} rejected={} total={}",
                result.created, result.updated, result.skipped, result.rejected, result.total
            );
        }
        Commands::Migrate => {
            let config = SyncConfig::from_env();
            let pool = roster_storage::connect_pool(&config.database_url)
                .await
                .context("connecting to database")?;
            roster_storage::run_migrations(&pool)
                .await
                .context("applying migrations")?;
            info!("migrations applied");
        }
        Commands::Serve => {
            roster_web::serve_from_env().await?;
        }
    }

    Ok(())
}
