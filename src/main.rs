mod app;
mod config;
mod core;
mod gateways;
mod interfaces;

use tracing::error;

use crate::config::{Config, Secrets};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = match Config::load("hireflow.toml").await {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };
    let secrets = Secrets::from_env();

    if let Err(e) = app::run(config, secrets).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
