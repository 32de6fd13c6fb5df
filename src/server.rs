//! TCP listener for incoming file transfers.
//!
//! Accepts connections forever and hands each one to its own session task.
//! The accept loop never waits on a transfer.

use crate::config::ServerConfig;
use crate::session;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// Listen backlog
const BACKLOG: i32 = 1024;

/// Server instance
pub struct Server {
    listener: TcpListener,
    folder: Arc<PathBuf>,
    accept_backoff: Duration,
}

impl Server {
    /// Bind the listening socket described by `config`.
    pub async fn bind(config: &ServerConfig) -> io::Result<Self> {
        let addr = tokio::net::lookup_host((config.host.as_str(), config.port))
            .await?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("cannot resolve {}:{}", config.host, config.port),
                )
            })?;

        let listener = TcpListener::from_std(create_listener(addr)?)?;

        Ok(Server {
            listener,
            folder: Arc::new(config.folder.clone()),
            accept_backoff: config.accept_backoff,
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the task is dropped.
    pub async fn serve(&self) {
        info!(
            address = %self.local_addr().map_or_else(|_| "unknown".to_string(), |a| a.to_string()),
            folder = %self.folder.display(),
            "Server listening"
        );

        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "New connection");

                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                    }

                    let folder = Arc::clone(&self.folder);
                    tokio::spawn(async move {
                        // Outcome is logged by the session
                        let _ = session::handle_connection(stream, peer, &folder).await;
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(self.accept_backoff).await;
                }
            }
        }
    }
}

/// Create a non-blocking listener with SO_REUSEADDR.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    Ok(socket.into())
}
