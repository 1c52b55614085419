//! Query handler interface.

use std::net::SocketAddr;
use std::time::Instant;

use async_trait::async_trait;
use hickory_proto::op::Message;

use super::Protocol;

/// Context for one DNS query.
#[derive(Debug, Clone)]
pub struct QueryContext {
    /// Client address.
    pub client: SocketAddr,

    /// Transport the query arrived on.
    pub protocol: Protocol,

    /// When the query was received.
    pub received_at: Instant,
}

impl QueryContext {
    /// Creates a new query context.
    pub fn new(client: SocketAddr, protocol: Protocol) -> Self {
        Self {
            client,
            protocol,
            received_at: Instant::now(),
        }
    }

    /// Elapsed time since the query was received.
    pub fn elapsed(&self) -> std::time::Duration {
        self.received_at.elapsed()
    }
}

/// Query handler trait.
///
/// The transports own the sockets; a handler turns one decoded request into
/// the response message to write back. Failure paths are expressed as a
/// SERVFAIL response, never as a missing one.
#[async_trait]
pub trait QueryHandler: Send + Sync {
    /// Handles one DNS query.
    async fn handle(&self, query: Message, context: QueryContext) -> Message;
}
