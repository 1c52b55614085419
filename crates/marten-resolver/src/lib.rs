//! # Marten resolver
//!
//! Upstream plumbing for the marten forwarder: the [`Exchanger`] primitive
//! (one query, one endpoint, its own transport timeout) and the [`race`]
//! that fans a query out across the configured upstreams and returns the
//! first usable reply.

use thiserror::Error;

pub mod exchange;
pub mod race;

pub use exchange::Exchanger;
pub use race::race;

/// Resolver error.
#[derive(Error, Debug)]
pub enum ResolverError {
    #[error("timeout")]
    Timeout,

    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Result type for resolver operations.
pub type Result<T> = std::result::Result<T, ResolverError>;
