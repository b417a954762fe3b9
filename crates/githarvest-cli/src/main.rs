use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod commands;

use cli::{Cli, Commands};
use githarvest_core::Settings;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "githarvest=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let settings = Settings::from_env()?;

    match cli.command {
        Commands::InitDb => commands::init_db(settings).await,
        Commands::Collect {
            since,
            until,
            stars_min,
            stars_max,
        } => {
            let app = commands::build(settings).await?;
            commands::collect(&app, since, until, stars_min, stars_max).await
        }
        Commands::Archive { since, until } => {
            let app = commands::build(settings).await?;
            commands::archive(&app, since, until).await
        }
        Commands::Enrich => {
            let app = commands::build(settings).await?;
            commands::enrich(&app).await
        }
        Commands::Status { phase } => {
            let app = commands::build(settings).await?;
            commands::status(&app, &phase).await
        }
    }
}
