//! memkv - An In-Memory Key-Value Store
//!
//! This is the main entry point for the memkv server.
//! It sets up the TCP listener, storage engine, and handles incoming connections.

use memkv::commands::CommandHandler;
use memkv::connection::{handle_connection, ConnectionStats};
use memkv::storage::{LockConfig, StorageEngine};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Server configuration
struct Config {
    /// Host to bind to
    host: String,
    /// Port to listen on
    port: u16,
    /// Per-key lock timing
    locks: LockConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: memkv::DEFAULT_HOST.to_string(),
            port: memkv::DEFAULT_PORT,
            locks: LockConfig::default(),
        }
    }
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--host" | "-h" => {
                    config.host = required_value(&args, i, "--host").to_string();
                    i += 2;
                }
                "--port" | "-p" => {
                    config.port = required_value(&args, i, "--port")
                        .parse()
                        .unwrap_or_else(|_| {
                            eprintln!("Error: invalid port number");
                            std::process::exit(1);
                        });
                    i += 2;
                }
                "--lock-timeout-ms" => {
                    let ms = parse_millis(required_value(&args, i, "--lock-timeout-ms"));
                    config.locks = config.locks.with_acquire_timeout(ms);
                    i += 2;
                }
                "--max-lock-hold-ms" => {
                    let ms = parse_millis(required_value(&args, i, "--max-lock-hold-ms"));
                    config.locks = config.locks.with_max_hold(ms);
                    i += 2;
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("memkv version {}", memkv::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        config
    }

    /// Returns the bind address as a string
    fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn required_value<'a>(args: &'a [String], i: usize, flag: &str) -> &'a str {
    match args.get(i + 1) {
        Some(value) => value.as_str(),
        None => {
            eprintln!("Error: {} requires a value", flag);
            std::process::exit(1);
        }
    }
}

fn parse_millis(value: &str) -> Duration {
    match value.parse::<u64>() {
        Ok(ms) => Duration::from_millis(ms),
        Err(_) => {
            eprintln!("Error: invalid duration '{}' (expected milliseconds)", value);
            std::process::exit(1);
        }
    }
}

fn print_help() {
    println!(
        r#"
memkv - An In-Memory Key-Value Store

USAGE:
    memkv [OPTIONS]

OPTIONS:
    -h, --host <HOST>              Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>              Port to listen on (default: 3333)
        --lock-timeout-ms <MS>     How long a STORE waits for a busy key (default: 5000)
        --max-lock-hold-ms <MS>    Age after which a key lock is taken over (default: 10000)
    -v, --version                  Print version information
        --help                     Print this help message

Set RUST_LOG to control log output (default: info).

CONNECTING:
    Send one command per line:
    $ nc 127.0.0.1 3333
    STORE name Ariz EX 60
    +OK
    RETRIEVE name
    $4
    Ariz
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_args();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // Create the storage engine (shared across all connections)
    let storage = Arc::new(StorageEngine::with_config(config.locks));
    info!(
        acquire_timeout_ms = config.locks.acquire_timeout.as_millis() as u64,
        max_hold_ms = config.locks.max_hold.as_millis() as u64,
        "Storage engine initialized"
    );

    let stats = Arc::new(ConnectionStats::new());

    // Bind the TCP listener
    let listener = TcpListener::bind(config.bind_address()).await?;
    info!("memkv v{} listening on {}", memkv::VERSION, config.bind_address());

    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received, stopping server...");
    };

    tokio::select! {
        _ = accept_loop(listener, Arc::clone(&storage), stats) => {}
        _ = shutdown => {}
    }

    let engine_stats = storage.stats();
    info!(
        keys = engine_stats.keys,
        stores = engine_stats.store_ops,
        retrieves = engine_stats.retrieve_ops,
        skipped = engine_stats.skipped_stores,
        expired = engine_stats.expired,
        lock_timeouts = engine_stats.lock_timeouts,
        forced_releases = engine_stats.forced_releases,
        "Server shutdown complete"
    );
    Ok(())
}

/// Main loop that accepts incoming connections
async fn accept_loop(
    listener: TcpListener,
    storage: Arc<StorageEngine>,
    stats: Arc<ConnectionStats>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let handler = CommandHandler::new(Arc::clone(&storage));
                let stats = Arc::clone(&stats);

                tokio::spawn(async move {
                    handle_connection(stream, addr, handler, stats).await;
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
