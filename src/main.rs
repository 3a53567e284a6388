// src/main.rs

//! The main entry point for the IoliteDB master node.

use anyhow::Result;
use iolitedb::config::Config;
use iolitedb::server;
use std::env;
use tracing_subscriber::{filter::EnvFilter, prelude::*};

#[tokio::main]
async fn main() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("IoliteDB version {VERSION}");
        return Ok(());
    }

    // Determine the configuration path. It can be provided via a --config
    // flag; otherwise, it defaults to "config.toml".
    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or("config.toml");

    // Load the server configuration; a missing file falls back to defaults so
    // a bare master node can start without any on-disk configuration.
    let config = match Config::from_file(config_path) {
        Ok(cfg) => cfg,
        Err(e) if !std::path::Path::new(config_path).exists() => {
            eprintln!("No config file at \"{config_path}\" ({e}); starting with defaults");
            Config::default()
        }
        Err(e) => {
            eprintln!("Failed to load configuration from \"{config_path}\": {e}");
            std::process::exit(1);
        }
    };

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::registry()
        .with(EnvFilter::new(log_level))
        .with(
            tracing_subscriber::fmt::layer()
                .compact() // Use the compact, single-line format.
                .with_ansi(true), // Enable ANSI color codes for log levels.
        )
        .init();

    server::run(config).await
}
