//! Cable Hub - Entry Point
//!
//! Starts the TCP listener and the CableServer dispatcher, accepting
//! connections until Ctrl-C, then drains every room before exiting.

use std::env;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use cable_hub::{handle_connection, CableServer, Config, Hooks};

/// Default server address
const DEFAULT_ADDR: &str = "127.0.0.1:8080";

/// Environment variable naming an optional JSON config file
const CONFIG_ENV: &str = "CABLE_CONFIG";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=cable_hub=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cable_hub=info")),
        )
        .init();

    // Get bind address from command line or use default
    let addr = env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_ADDR.to_string());

    let config = match env::var(CONFIG_ENV) {
        Ok(path) => {
            info!("Loading configuration from {}", path);
            Config::from_file(path)?
        }
        Err(_) => Config::default(),
    };

    let hooks = Hooks::new()
        .on_room_ready(|room| info!("Room {} ready", room))
        .on_room_close(|room| info!("Room {} closed", room))
        .on_conn_close(|client, err| match err {
            Some(e) => debug!("Client {} closed: {}", client.id, e),
            None => debug!("Client {} closed", client.id),
        })
        .on_server_close(|| info!("All rooms drained"));

    // Start TCP listener
    let listener = TcpListener::bind(&addr).await?;
    info!("Cable hub listening on {}", addr);

    // Create the dispatcher and start it
    let (server, handle) = CableServer::new(config, hooks)?;
    let shutdown = CancellationToken::new();
    let server_task = tokio::spawn(server.run(shutdown.clone()));

    info!("CableServer actor started");

    // Connection accept loop
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    debug!("New connection from {}", addr);
                    let handle = handle.clone();

                    // Spawn handler task for each connection
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, handle).await {
                            error!("Connection handler error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    shutdown.cancel();
    server_task.await?;
    info!("Cable hub stopped");

    Ok(())
}
