use rocketbot::events::Bot;
use rocketbot::logging::{FileLogger, setup_logging};
use rocketbot::{AppState, api, load_config};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8888";
const DEFAULT_CONFIG_PATH: &str = "rocketbot.toml";

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let bind_address =
        std::env::var("BIND_ADDRESS").unwrap_or_else(|_| DEFAULT_BIND_ADDRESS.to_string());
    let config_path = PathBuf::from(
        std::env::var("ROCKETBOT_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string()),
    );

    let config = match load_config(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let file_logger = config.log_directory.clone().map(FileLogger::new);
    // Dropping the guard stops the file writer.
    let _log_guard = match setup_logging(file_logger.as_ref(), config.debug) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to set up logging: {}", e);
            std::process::exit(1);
        }
    };

    let bot = match Bot::from_config(&config) {
        Ok(bot) => bot,
        Err(e) => {
            error!("Failed to create API clients: {}", e);
            std::process::exit(1);
        }
    };
    let webhook_secret = config.github.webhook_secret().map(str::to_string);
    if webhook_secret.is_none() {
        info!("No webhook secret configured, signatures are not verified");
    }

    let state = Arc::new(AppState {
        bot,
        webhook_secret,
    });
    let app = api::app(state);

    info!("Listening on {}", bind_address);
    info!("Using config at {:?}", config_path);
    let listener = match tokio::net::TcpListener::bind(&bind_address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", bind_address, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}
