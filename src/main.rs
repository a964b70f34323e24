// src/main.rs

//! The main entry point for the Slipstream notification server.

use anyhow::{Result, anyhow};
use slipstream::config::Config;
use slipstream::server;
use std::env;
use tracing::{error, info};
use tracing_subscriber::{filter::EnvFilter, prelude::*};

const VERSION: &str = env!("CARGO_PKG_VERSION");

const USAGE: &str = "Usage: slipstream [--config <path>] [--port <port>] [--version] [--help]";

/// What the command line asked for.
#[derive(Debug)]
struct CliOptions {
    config_path: String,
    port: Option<u16>,
    show_version: bool,
    show_help: bool,
}

fn parse_args(args: &[String]) -> Result<CliOptions> {
    let mut opts = CliOptions {
        config_path: "config.toml".to_string(),
        port: None,
        show_version: false,
        show_help: false,
    };

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--version" | "-V" => opts.show_version = true,
            "--help" | "-h" => opts.show_help = true,
            "--config" => {
                opts.config_path = iter
                    .next()
                    .ok_or_else(|| anyhow!("--config flag requires a value"))?
                    .clone();
            }
            "--port" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow!("--port flag requires a value"))?;
                match value.parse::<u16>() {
                    Ok(port) if port != 0 => opts.port = Some(port),
                    _ => return Err(anyhow!("Invalid port number: {value}")),
                }
            }
            other => return Err(anyhow!("Unknown argument: {other}")),
        }
    }
    Ok(opts)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let opts = match parse_args(&args) {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("{e}\n{USAGE}");
            std::process::exit(2);
        }
    };

    if opts.show_help {
        println!("{USAGE}");
        return Ok(());
    }
    if opts.show_version {
        println!("Slipstream version {VERSION}");
        return Ok(());
    }

    // The server cannot run without a valid configuration.
    let mut config = match Config::from_file(&opts.config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!(
                "Failed to load configuration from \"{}\": {e:#}",
                opts.config_path
            );
            std::process::exit(1);
        }
    };
    if let Some(port) = opts.port {
        config.port = port;
        if let Err(e) = config.validate() {
            eprintln!("Invalid configuration after --port override: {e:#}");
            std::process::exit(1);
        }
    }

    // RUST_LOG wins over the configured level.
    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::registry()
        .with(EnvFilter::new(log_level))
        .with(tracing_subscriber::fmt::layer().compact().with_ansi(true))
        .init();

    info!("Starting Slipstream {VERSION}.");

    if let Err(e) = server::run(config).await {
        error!("Server runtime error: {:#}", e);
        return Err(e);
    }

    Ok(())
}
