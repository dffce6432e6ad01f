use anyhow::Result;
use colored::Colorize;
use log_sage::{config, server};
use std::path::Path;
use tracing::info;

/// Execute the serve command
pub async fn execute(config_path: Option<&Path>) -> Result<()> {
    println!("{}", "Starting log-sage ingestion server...".green());

    let cfg = config::load_config(config_path)?;
    info!("Configuration loaded");

    // Blocks until shutdown
    server::start_server(cfg).await
}
