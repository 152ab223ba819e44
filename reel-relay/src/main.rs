//! Development relay for reel collaboration sessions.
//!
//! # Usage
//!
//! ```bash
//! RUST_LOG=info cargo run -p reel-relay -- --bind 0.0.0.0:9090
//!
//! # Settings from a JSON file, flags win
//! cargo run -p reel-relay -- --config relay.json --capacity 512
//! ```

use clap::Parser;
use reel_collab::relay::{RelayConfig, RelayServer};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

/// WebSocket relay that fans session events out to every viewer of a session.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(short, long)]
    bind: Option<String>,

    /// Frames buffered per connection before it starts dropping
    #[arg(long)]
    capacity: Option<usize>,

    /// JSON file with relay settings
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn load_config(args: &Args) -> Result<RelayConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => RelayConfig::default(),
    };
    if let Some(bind) = &args.bind {
        config.bind_addr = bind.clone();
    }
    if let Some(capacity) = args.capacity {
        config.broadcast_capacity = capacity;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            log::error!("Invalid relay configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Received Ctrl+C");
            on_signal.cancel();
        }
    });

    log::info!("Starting reel relay on {}...", config.bind_addr);
    let server = RelayServer::new(config);
    match server.run_until(shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("Relay failed: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_defaults() {
        let args = Args::parse_from(["reel-relay", "--bind", "0.0.0.0:7000", "--capacity", "32"]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:7000");
        assert_eq!(config.broadcast_capacity, 32);
    }

    #[test]
    fn test_missing_config_file() {
        let args = Args::parse_from(["reel-relay", "--config", "/no/such/relay.json"]);
        assert!(load_config(&args).is_err());
    }
}
