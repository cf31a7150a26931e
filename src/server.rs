//! Sequential TCP server for bet submissions.
//!
//! Accepts one connection at a time and runs its whole
//! read/parse/store/respond cycle before accepting the next. Per-connection
//! failures are logged and never stop the accept loop; only a bind failure or
//! a shutdown request does.

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::connection::{ConnState, Connection, ConnectionError};
use crate::protocol::{parse_bets, Framing, Response};
use crate::storage::BetStore;

/// Server instance
pub struct Server {
    listener: TcpListener,
    store: Arc<dyn BetStore>,
    framing: Framing,
    max_payload_size: usize,
    shutdown: Arc<watch::Sender<bool>>,
}

/// Requests that a running [`Server`] stop.
///
/// The accept loop exits and a connection that is still being handled is
/// dropped, which closes its socket and aborts any pending read or write.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }
}

impl Server {
    /// Bind the listening socket with the configured backlog.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn bind(config: &Config, store: Arc<dyn BetStore>) -> io::Result<Self> {
        let addr = (config.host.as_str(), config.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("'{}' did not resolve to an address", config.host),
                )
            })?;

        let listener = TcpListener::from_std(create_listener(addr, config.listen_backlog)?)?;
        info!(
            address = %listener.local_addr()?,
            backlog = config.listen_backlog,
            framing = ?config.framing,
            "Server listening"
        );

        let (tx, _) = watch::channel(false);

        Ok(Server {
            listener,
            store,
            framing: config.framing,
            max_payload_size: config.max_payload_size,
            shutdown: Arc::new(tx),
        })
    }

    #[cfg(test)]
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown),
        }
    }

    /// Accept and handle connections one at a time until shutdown.
    pub async fn run(&self) {
        let mut shutdown = self.shutdown.subscribe();

        loop {
            let stopping = *shutdown.borrow_and_update();
            if stopping {
                break;
            }

            debug!("Waiting for connection");
            let (stream, peer) = tokio::select! {
                _ = shutdown.changed() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        continue;
                    }
                },
            };
            info!(peer = %peer, "Accepted connection");

            let conn = Connection::new(stream, Some(peer), self.framing, self.max_payload_size);

            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    warn!(peer = %peer, "Shutdown requested, closing in-flight connection");
                    break;
                }
                _ = handle_connection(conn, &*self.store) => {}
            }
        }

        info!("Server stopped");
    }
}

/// Run one request/response cycle and close the connection.
///
/// Returns the response that was delivered, or `None` when the connection was
/// aborted (read error, malformed frame or payload, failed write).
pub async fn handle_connection<S>(
    mut conn: Connection<S>,
    store: &dyn BetStore,
) -> Option<Response>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let delivered = match serve(&mut conn, store).await {
        Ok(response) => Some(response),
        Err(e) => {
            error!(peer = ?conn.peer(), state = ?conn.state(), error = %e, "Connection aborted");
            None
        }
    };

    conn.close().await;
    delivered
}

/// Read one frame, store every bet it carries and reply.
///
/// A batch is stored in a single call, so it is either saved whole or not at
/// all, and gets one reply either way.
async fn serve<S>(
    conn: &mut Connection<S>,
    store: &dyn BetStore,
) -> Result<Response, ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let payload = conn.read_frame().await?;
    debug!(peer = ?conn.peer(), bytes = payload.len(), "Frame received");

    let bets = match parse_bets(&payload) {
        Ok(bets) => bets,
        Err(e) => {
            conn.transition(ConnState::Malformed);
            return Err(e.into());
        }
    };
    conn.transition(ConnState::Parsed);

    let response = match store.store(&bets) {
        Ok(()) => {
            for bet in &bets {
                info!(document = %bet.document, number = %bet.number, "Bet stored");
            }
            conn.transition(ConnState::Stored);
            Response::Ok
        }
        Err(e) => {
            warn!(count = bets.len(), error = %e, "Failed to store bets");
            conn.transition(ConnState::StoreFailed);
            Response::StoreFailed
        }
    };

    conn.respond(response).await?;
    Ok(response)
}

fn create_listener(addr: SocketAddr, backlog: i32) -> io::Result<std::net::TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    Ok(socket.into())
}
