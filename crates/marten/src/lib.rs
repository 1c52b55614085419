//! # Marten
//!
//! A caching, host-overriding DNS forwarder: queries for names in the
//! static host tables are answered locally; everything else races the
//! configured upstream resolvers and the first usable reply is memoized
//! for a bounded time.

pub mod handler;
pub mod reload;

pub use handler::ForwardHandler;
