use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use fundamentals_etl::api::AlphaVantageClient;
use fundamentals_etl::database::DatabaseManager;
use fundamentals_etl::models::{Config, RunStatus};
use fundamentals_etl::pipeline::EtlPipeline;
use fundamentals_etl::server::{self, AppState};

#[derive(Parser)]
#[command(name = "fundamentals-etl", about = "Financial statement ETL pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one pipeline invocation and exit
    Run,
    /// Start the HTTP control surface
    Serve,
    /// Insert the default company universe
    Seed,
}

#[actix_web::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load configuration: {}", e);
            eprintln!("Configuration error: {}", e);
            eprintln!("Make sure a .env file provides the provider API key.");
            std::process::exit(1);
        }
    };

    let db = DatabaseManager::new(&config.database_url).await?;

    match cli.command {
        Command::Seed => {
            let seeded = db.seed_default_companies().await?;
            info!("seeded {} companies", seeded);
        }
        Command::Run => {
            let client = AlphaVantageClient::new(&config)?;
            let pipeline = EtlPipeline::new(client, db, config);
            let summary = pipeline.run().await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            if summary.status != RunStatus::Success {
                std::process::exit(1);
            }
        }
        Command::Serve => {
            let client = AlphaVantageClient::new(&config)?;
            let bind_address = config.bind_address.clone();
            let pipeline = EtlPipeline::new(client, db, config);
            server::serve(AppState::new(pipeline), &bind_address).await?;
        }
    }

    Ok(())
}
