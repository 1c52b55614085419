//! UDP listener.

use std::net::SocketAddr;
use std::sync::Arc;

use hickory_proto::op::{Message, ResponseCode};
use socket2::{Domain, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{debug, error, info, trace};

use super::handler::{QueryContext, QueryHandler};
use super::{Protocol, Result};

/// UDP DNS listener.
pub struct UdpServer {
    socket: Arc<UdpSocket>,
    handler: Arc<dyn QueryHandler>,
    local_addr: SocketAddr,
}

impl UdpServer {
    /// Binds a UDP listener to the given address.
    pub async fn bind(addr: SocketAddr, handler: Arc<dyn QueryHandler>) -> Result<Self> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::DGRAM, None)?;
        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        socket.set_reuse_port(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;

        let std_socket: std::net::UdpSocket = socket.into();
        let socket = UdpSocket::from_std(std_socket)?;
        let local_addr = socket.local_addr()?;

        info!(addr = %local_addr, "UDP listener bound");

        Ok(Self {
            socket: Arc::new(socket),
            handler,
            local_addr,
        })
    }

    /// Returns the bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Runs the receive loop, handling each datagram on its own task.
    pub async fn run(&self) -> Result<()> {
        let mut buf = vec![0u8; 65535];

        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, src)) => {
                    let data = buf[..len].to_vec();
                    let socket = self.socket.clone();
                    let handler = self.handler.clone();

                    tokio::spawn(async move {
                        if let Err(err) = process_datagram(socket, handler, data, src).await {
                            debug!(error = %err, client = %src, "error handling UDP query");
                        }
                    });
                }
                Err(err) => {
                    error!(error = %err, "error receiving UDP datagram");
                }
            }
        }
    }
}

async fn process_datagram(
    socket: Arc<UdpSocket>,
    handler: Arc<dyn QueryHandler>,
    data: Vec<u8>,
    src: SocketAddr,
) -> Result<()> {
    // Undecodable datagrams are dropped silently.
    let query = match Message::from_vec(&data) {
        Ok(message) => message,
        Err(err) => {
            trace!(error = %err, client = %src, "dropping malformed UDP query");
            return Ok(());
        }
    };

    let max_size = query
        .extensions()
        .as_ref()
        .map(|edns| edns.max_payload() as usize)
        .unwrap_or(512)
        .max(512);

    let ctx = QueryContext::new(src, Protocol::Udp);
    let response = handler.handle(query, ctx).await;

    let wire = match response.to_vec() {
        Ok(wire) if wire.len() > max_size => truncated_copy(&response).to_vec(),
        other => other,
    };
    let wire = match wire {
        Ok(wire) => wire,
        Err(err) => {
            debug!(error = %err, client = %src, "failed to encode response, sending SERVFAIL");
            Message::error_msg(response.id(), response.op_code(), ResponseCode::ServFail)
                .to_vec()
                .unwrap_or_default()
        }
    };
    if wire.is_empty() {
        return Ok(());
    }

    socket.send_to(&wire, src).await?;
    Ok(())
}

/// Builds a TC response carrying the header and question only, so the
/// client retries over TCP.
fn truncated_copy(response: &Message) -> Message {
    let mut truncated = Message::new();
    truncated
        .set_id(response.id())
        .set_message_type(response.message_type())
        .set_op_code(response.op_code())
        .set_response_code(response.response_code())
        .set_recursion_desired(response.recursion_desired())
        .set_recursion_available(response.recursion_available())
        .set_truncated(true);
    truncated.add_queries(response.queries().to_vec());
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hickory_proto::op::MessageType;

    struct RefusedHandler;

    #[async_trait]
    impl QueryHandler for RefusedHandler {
        async fn handle(&self, query: Message, _context: QueryContext) -> Message {
            let mut response = Message::new();
            response
                .set_id(query.id())
                .set_message_type(MessageType::Response)
                .set_response_code(ResponseCode::Refused);
            response
        }
    }

    #[tokio::test]
    async fn binds_to_ephemeral_port() {
        let server = UdpServer::bind("127.0.0.1:0".parse().unwrap(), Arc::new(RefusedHandler))
            .await
            .unwrap();
        assert!(server.local_addr().port() > 0);
    }

    #[test]
    fn truncated_copy_keeps_header_and_question() {
        let mut response = Message::new();
        response
            .set_id(77)
            .set_message_type(MessageType::Response)
            .set_recursion_available(true);

        let truncated = truncated_copy(&response);
        assert_eq!(truncated.id(), 77);
        assert!(truncated.truncated());
        assert!(truncated.answers().is_empty());
    }
}
