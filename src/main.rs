//! bet-server: a sequential bet submission receiver
//!
//! Accepts one TCP connection at a time, reads a single length-prefixed frame
//! holding one bet or a newline-separated batch, appends the bets to a CSV
//! file and answers `OK` or `ERROR SAVING BET`.
//!
//! Features:
//! - Text (`<len> <payload>`) or binary (u32 length header) framing
//! - Batches are stored all-or-nothing
//! - `--list-winners` reports the stored bets on the winning number
//! - Tolerates short reads and short writes
//! - SIGTERM / Ctrl-C stop the accept loop and close the in-flight connection
//! - Configuration via CLI arguments, environment variables or TOML file

mod bet;
mod config;
mod connection;
mod protocol;
mod server;
mod storage;

use config::Config;
use server::{Server, ShutdownHandle};
use std::sync::Arc;
use storage::CsvStore;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let store = Arc::new(CsvStore::new(config.bets_file.clone()));

    if config.list_winners {
        return list_winners(&store);
    }

    info!(
        host = %config.host,
        port = config.port,
        listen_backlog = config.listen_backlog,
        framing = ?config.framing,
        max_payload_size = config.max_payload_size,
        bets_file = %store.path().display(),
        "Starting bet-server"
    );

    let server = match Server::bind(&config, store) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "Failed to bind server socket");
            return Err(e.into());
        }
    };

    tokio::spawn(shutdown_on_signal(server.shutdown_handle()));
    server.run().await;

    Ok(())
}

/// Log every stored bet on the winning number.
fn list_winners(store: &CsvStore) -> Result<(), Box<dyn std::error::Error>> {
    let winners = match store.winners() {
        Ok(winners) => winners,
        Err(e) => {
            error!(error = %e, "Failed to load bets");
            return Err(e.into());
        }
    };

    for bet in &winners {
        info!(agency = %bet.agency, document = %bet.document, number = %bet.number, "Winner");
    }
    info!(
        winners = winners.len(),
        winning_number = bet::LOTTERY_WINNER_NUMBER,
        bets_file = %store.path().display(),
        "Draw complete"
    );

    Ok(())
}

/// Wait for SIGTERM or Ctrl-C, then stop the server.
async fn shutdown_on_signal(handle: ShutdownHandle) {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "Failed to listen for Ctrl-C");
                return;
            }
            info!("Received Ctrl-C");
        }
        _ = terminate => info!("Received SIGTERM"),
    }

    handle.shutdown();
}
