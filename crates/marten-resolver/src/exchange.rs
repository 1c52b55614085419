//! Upstream exchange primitive.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use hickory_proto::op::Message;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, trace};

use super::{ResolverError, Result};

/// Largest reply accepted over UDP.
const MAX_UDP_PAYLOAD: usize = 4096;

/// Sends one query to one upstream endpoint and awaits the reply.
///
/// The exchange carries its own transport timeout, independent of the
/// racer's per-step timeout, so an exchange the racer abandons still
/// terminates and frees its socket on its own. The expected configuration
/// is per-step timeout < exchange timeout.
#[derive(Debug, Clone)]
pub struct Exchanger {
    timeout: Duration,
    retries: u32,
}

impl Default for Exchanger {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            retries: 2,
        }
    }
}

impl Exchanger {
    /// Creates an exchanger with the given transport timeout and attempt
    /// count (clamped to at least one).
    pub fn new(timeout: Duration, retries: u32) -> Self {
        Self {
            timeout,
            retries: retries.max(1),
        }
    }

    /// Exchanges `query` with `upstream` over UDP, falling back to TCP when
    /// the reply comes back truncated. Transport failures are retried up to
    /// the configured attempt count.
    pub async fn exchange(&self, query: &Message, upstream: SocketAddr) -> Result<Message> {
        let wire = query
            .to_vec()
            .map_err(|e| ResolverError::Protocol(e.to_string()))?;

        let mut last_error = None;
        for attempt in 0..self.retries {
            match self.exchange_udp(&wire, query.id(), upstream).await {
                Ok(reply) if reply.truncated() => {
                    trace!(upstream = %upstream, "reply truncated, retrying over TCP");
                    return self.exchange_tcp(&wire, query.id(), upstream).await;
                }
                Ok(reply) => return Ok(reply),
                Err(err) => {
                    debug!(upstream = %upstream, attempt, error = %err, "exchange attempt failed");
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or(ResolverError::Timeout))
    }

    async fn exchange_udp(&self, wire: &[u8], id: u16, upstream: SocketAddr) -> Result<Message> {
        let bind_addr: SocketAddr = if upstream.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(upstream).await?;
        socket.send(wire).await?;

        let mut buf = vec![0u8; MAX_UDP_PAYLOAD];
        let len = timeout(self.timeout, socket.recv(&mut buf))
            .await
            .map_err(|_| ResolverError::Timeout)??;

        Self::parse_reply(&buf[..len], id)
    }

    async fn exchange_tcp(&self, wire: &[u8], id: u16, upstream: SocketAddr) -> Result<Message> {
        let mut stream = timeout(self.timeout, TcpStream::connect(upstream))
            .await
            .map_err(|_| ResolverError::Timeout)??;

        let len = wire.len() as u16;
        stream.write_all(&len.to_be_bytes()).await?;
        stream.write_all(wire).await?;

        let mut len_buf = [0u8; 2];
        timeout(self.timeout, stream.read_exact(&mut len_buf))
            .await
            .map_err(|_| ResolverError::Timeout)??;
        let reply_len = u16::from_be_bytes(len_buf) as usize;

        let mut reply_buf = vec![0u8; reply_len];
        timeout(self.timeout, stream.read_exact(&mut reply_buf))
            .await
            .map_err(|_| ResolverError::Timeout)??;

        Self::parse_reply(&reply_buf, id)
    }

    fn parse_reply(wire: &[u8], id: u16) -> Result<Message> {
        let reply =
            Message::from_vec(wire).map_err(|e| ResolverError::Protocol(e.to_string()))?;
        if reply.id() != id {
            return Err(ResolverError::Protocol("response ID mismatch".to_string()));
        }
        Ok(reply)
    }
}
