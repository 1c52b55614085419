//! # Marten server
//!
//! Async DNS listener infrastructure: the [`QueryHandler`] interface the
//! resolver engine implements, UDP and TCP listener loops, and a
//! [`DnsServer`] runner that drives every configured listener until
//! shutdown.
//!
//! Each UDP datagram and each TCP connection is served on its own tokio
//! task; a handler failure degrades to SERVFAIL for that one client and
//! never disturbs other in-flight queries.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::broadcast;

pub mod handler;
pub mod tcp;
pub mod udp;

pub use handler::{QueryContext, QueryHandler};
pub use tcp::TcpServer;
pub use udp::UdpServer;

/// Server error types.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// DNS transport protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Plain UDP.
    Udp,
    /// Plain TCP.
    Tcp,
}

impl Protocol {
    /// Returns the protocol name.
    pub const fn name(&self) -> &'static str {
        match self {
            Protocol::Udp => "UDP",
            Protocol::Tcp => "TCP",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// DNS server instance: one handler shared across every listener.
pub struct DnsServer {
    handler: Arc<dyn QueryHandler>,
    shutdown_tx: broadcast::Sender<()>,
}

impl DnsServer {
    /// Creates a new DNS server around a handler.
    pub fn new(handler: Arc<dyn QueryHandler>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            handler,
            shutdown_tx,
        }
    }

    /// Binds every listen endpoint and serves until shutdown. Bind failures
    /// are fatal; they surface before any listener starts serving.
    pub async fn run(&self, listens: &[(Protocol, SocketAddr)]) -> Result<()> {
        let mut handles = Vec::new();

        for &(protocol, addr) in listens {
            match protocol {
                Protocol::Udp => {
                    let server = UdpServer::bind(addr, self.handler.clone()).await?;
                    let mut shutdown_rx = self.shutdown_tx.subscribe();
                    handles.push(tokio::spawn(async move {
                        tokio::select! {
                            result = server.run() => result,
                            _ = shutdown_rx.recv() => Ok(()),
                        }
                    }));
                }
                Protocol::Tcp => {
                    let server = TcpServer::bind(addr, self.handler.clone()).await?;
                    let mut shutdown_rx = self.shutdown_tx.subscribe();
                    handles.push(tokio::spawn(async move {
                        tokio::select! {
                            result = server.run() => result,
                            _ = shutdown_rx.recv() => Ok(()),
                        }
                    }));
                }
            }
        }

        for handle in handles {
            handle
                .await
                .map_err(|e| ServerError::Io(std::io::Error::other(e)))??;
        }

        Ok(())
    }

    /// Initiates graceful shutdown of every listener.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
