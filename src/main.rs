// src/main.rs

//! A minimal command-line probe for the client: connects, sends PING, and
//! reports the round trip.

use anyhow::{Context, Result};
use spineldb_client::{Client, ClientOptions};
use std::env;
use std::net::SocketAddr;
use tracing::{debug, info};
use tracing_subscriber::filter::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("spineldb-client version {VERSION}");
        return Ok(());
    }

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .compact()
        .with_ansi(true)
        .init();

    // Options can be provided via a --config flag; otherwise defaults apply.
    let config_flag = args.iter().position(|arg| arg == "--config");
    let options = match config_flag {
        Some(i) => {
            let path = args
                .get(i + 1)
                .context("--config requires a file path argument")?;
            ClientOptions::from_file(path)?
        }
        None => ClientOptions::default(),
    };

    // The server address is the first positional argument.
    let config_value = config_flag.map(|i| i + 1);
    let addr: SocketAddr = args
        .iter()
        .enumerate()
        .skip(1)
        .find(|(i, arg)| !arg.starts_with("--") && Some(*i) != config_value)
        .map(|(_, arg)| arg.as_str())
        .unwrap_or("127.0.0.1:7878")
        .parse()
        .context("invalid server address")?;

    info!("Connecting to {addr}...");
    let client = Client::connect(addr, options).await?;
    debug!("Connection active, sending PING");

    if client.ping().await? {
        info!("PONG received from {addr}");
    } else {
        info!("Server answered PING with an unexpected reply");
    }

    client.close().await;
    Ok(())
}
