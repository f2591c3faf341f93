use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use otp_wallet::repositories::{LedgerStore, MemoryStore, PostgresStore};
use otp_wallet::services;
use otp_wallet::settings::{Settings, StorageBackend};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config.toml")]
    config: String,
    #[arg(long, default_value = "log4rs.yaml")]
    log4rs: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    init_logging(&args.log4rs)?;
    let settings = Settings::new(&args.config)?;
    log::info!("Starting OTP wallet.");

    let store: Arc<dyn LedgerStore> = match settings.storage.backend {
        StorageBackend::Memory => {
            log::warn!("Using in-memory storage; data is lost on restart.");
            Arc::new(MemoryStore::new())
        }
        StorageBackend::Postgres => {
            log::info!("Connecting to Postgres.");
            Arc::new(PostgresStore::connect(&settings.postgres).await?)
        }
    };

    let channels = services::start_services(store, &settings).await?;
    services::http::start_http_server(channels, &settings.server).await?;

    Ok(())
}

fn init_logging(path: &str) -> Result<(), anyhow::Error> {
    if !Path::new("logs").exists() {
        fs::create_dir("logs")?;
    }

    match log4rs::init_file(path, Default::default()) {
        Ok(_) => {
            println!("[*] Logging initialized successfully.");
            Ok(())
        }
        Err(e) => {
            println!("[ERROR] Failed to initialize logging: {}", e);
            Err(anyhow::anyhow!("Could not initialize logging: {}", e))
        }
    }
}
