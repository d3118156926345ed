use std::sync::Arc;

use tracing::{error, info};

use filegate::admin::{AdminService, PauseToggle};
use filegate::db::Database;
use filegate::file::FileStorage;
use filegate::rate_limit::RateLimiters;
use filegate::reminder::{LogNotifier, ReminderService};
use filegate::sweeper::ExpirySweeper;
use filegate::Config;

/// Seconds between reminder passes.
const REMINDER_INTERVAL_SECS: u64 = 3600;

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "filegate.toml".to_string());

    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {config_path}: {e}");
            eprintln!("Using default configuration.");
            Config::default()
        }
    };

    if let Err(e) = filegate::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        filegate::logging::init_console_only(&config.logging.level);
    }

    if let Err(e) = run(config).await {
        error!("Fatal: {e}");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> filegate::Result<()> {
    info!("filegate starting");

    let db = Database::open(&config.database.path).await?;
    let storage = FileStorage::new(&config.storage.upload_dir)?;
    let limiters = Arc::new(RateLimiters::new(&config.rate_limits));

    let admin = AdminService::new(db.pool().clone(), limiters.clone(), PauseToggle::default());
    if admin.load_paused().await? {
        info!("Starting in paused state");
    }

    let sweeper = ExpirySweeper::new(db.pool().clone(), storage.clone(), config.sweeper.clone());
    tokio::spawn(sweeper.run());

    let reminder = ReminderService::new(db.pool().clone(), REMINDER_INTERVAL_SECS);
    tokio::spawn(reminder.run(LogNotifier));

    info!(
        "filegate ready (uploads in {}, database {})",
        config.storage.upload_dir, config.database.path
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    Ok(())
}
