mod bot;
mod config;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::prelude::*;

use bot::{BotSession, DomainGateway, StateMachine, Store, TgClient, UserDirectory};
use config::Config;

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "goalbot.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("goalbot.log"))
        .expect("Failed to open log file");
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .init();

    info!("🚀 Starting goalbot...");
    info!("Loaded config from {config_path}");

    let store = match Store::open(&config.data_dir.join("goalbot.db")) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!("failed to open database: {e}");
            std::process::exit(1);
        }
    };

    let directory = UserDirectory::new(store.clone());
    let gateway = DomainGateway::new(store);
    let machine = StateMachine::new(directory, gateway, config.site_base_url.clone());

    let client = match TgClient::new(&config.telegram_bot_token) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("failed to build telegram client: {e}");
            std::process::exit(1);
        }
    };

    let mut session = BotSession::new(client, machine, config.poll_timeout_secs);
    session.run().await;
}
