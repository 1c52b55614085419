//! TCP listener.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use hickory_proto::op::{Message, ResponseCode};
use socket2::{Domain, Socket, Type};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, error, info, trace};

use super::handler::{QueryContext, QueryHandler};
use super::{Protocol, Result};

static CONNECTION_ID: AtomicU64 = AtomicU64::new(0);

/// TCP DNS listener.
pub struct TcpServer {
    listener: TcpListener,
    handler: Arc<dyn QueryHandler>,
    local_addr: SocketAddr,
    idle_timeout: Duration,
}

impl TcpServer {
    /// Binds a TCP listener to the given address.
    pub async fn bind(addr: SocketAddr, handler: Arc<dyn QueryHandler>) -> Result<Self> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::STREAM, None)?;
        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        socket.set_reuse_port(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(1024)?;

        let std_listener: std::net::TcpListener = socket.into();
        let listener = TcpListener::from_std(std_listener)?;
        let local_addr = listener.local_addr()?;

        info!(addr = %local_addr, "TCP listener bound");

        Ok(Self {
            listener,
            handler,
            local_addr,
            idle_timeout: Duration::from_secs(10),
        })
    }

    /// Returns the bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Runs the accept loop, serving each connection on its own task.
    pub async fn run(&self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let handler = self.handler.clone();
                    let idle_timeout = self.idle_timeout;
                    let conn_id = CONNECTION_ID.fetch_add(1, Ordering::Relaxed);

                    tokio::spawn(async move {
                        if let Err(err) =
                            serve_connection(stream, peer, handler, idle_timeout, conn_id).await
                        {
                            debug!(error = %err, client = %peer, "TCP connection error");
                        }
                    });
                }
                Err(err) => {
                    error!(error = %err, "error accepting TCP connection");
                }
            }
        }
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<dyn QueryHandler>,
    idle_timeout: Duration,
    conn_id: u64,
) -> Result<()> {
    trace!(client = %peer, conn_id, "new TCP connection");

    let mut buf = BytesMut::with_capacity(4096);

    loop {
        match timeout(idle_timeout, read_frame(&mut stream, &mut buf)).await {
            Ok(Ok(frame)) => {
                let query = match Message::from_vec(&frame) {
                    Ok(message) => message,
                    Err(err) => {
                        debug!(error = %err, client = %peer, "dropping malformed TCP query");
                        continue;
                    }
                };

                let ctx = QueryContext::new(peer, Protocol::Tcp);
                let response = handler.handle(query, ctx).await;

                let wire = match response.to_vec() {
                    Ok(wire) => wire,
                    Err(err) => {
                        debug!(error = %err, client = %peer, "failed to encode response, sending SERVFAIL");
                        Message::error_msg(response.id(), response.op_code(), ResponseCode::ServFail)
                            .to_vec()
                            .unwrap_or_default()
                    }
                };
                if wire.is_empty() {
                    continue;
                }
                write_frame(&mut stream, &wire).await?;
            }
            Ok(Err(err)) => {
                if err.kind() == std::io::ErrorKind::UnexpectedEof {
                    trace!(client = %peer, conn_id, "TCP connection closed by client");
                } else {
                    debug!(error = %err, client = %peer, "TCP read error");
                }
                break;
            }
            Err(_) => {
                trace!(client = %peer, conn_id, "TCP connection idle timeout");
                break;
            }
        }
    }

    Ok(())
}

/// Reads one 2-byte length-prefixed DNS message.
async fn read_frame(stream: &mut TcpStream, buf: &mut BytesMut) -> std::io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 2];
    stream.read_exact(&mut len_buf).await?;
    let len = u16::from_be_bytes(len_buf) as usize;

    if len == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "zero-length TCP message",
        ));
    }

    buf.clear();
    buf.resize(len, 0);
    stream.read_exact(buf).await?;

    Ok(buf.to_vec())
}

/// Writes one 2-byte length-prefixed DNS message.
async fn write_frame(stream: &mut TcpStream, data: &[u8]) -> std::io::Result<()> {
    let len = data.len() as u16;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(data).await?;
    Ok(())
}
