//! slicehub -- multi-channel control hub for autonomous amateur-radio
//! digital-mode operation.
//!
//! Usage:
//!
//!   slicehub [--config <path>]
//!
//! The JSON-RPC tool surface runs on stdin/stdout, so all logging goes to
//! stderr. Exit code 0 on clean shutdown; nonzero on unrecoverable
//! startup failure (invalid config, missing decoder, ports in use).

mod app;
mod config;
mod mcp;
mod qso;
mod supervisor;

use config::Config;

#[tokio::main]
async fn main() {
    // stdout belongs to the JSON-RPC channel; log to stderr only.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let mut config_path: Option<String> = None;
    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                config_path = args.get(i).cloned();
                if config_path.is_none() {
                    eprintln!("--config requires a path");
                    std::process::exit(2);
                }
            }
            "--help" | "-h" => {
                eprintln!("usage: slicehub [--config <path>]");
                std::process::exit(0);
            }
            other => {
                eprintln!("unknown argument: {other}");
                std::process::exit(2);
            }
        }
        i += 1;
    }

    let config = match &config_path {
        Some(path) => match Config::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(error = %e, "configuration is invalid");
                std::process::exit(2);
            }
        },
        None => {
            tracing::warn!("no --config given, using defaults");
            Config::default()
        }
    };

    if let Err(e) = app::run(config).await {
        tracing::error!(error = %e, "fatal startup error");
        std::process::exit(1);
    }
}
