//! TCP and websocket transport for the text protocol.
//!
//! The transport only moves bytes. Inbound data surfaces as [`NetEvent`]s on
//! a channel; outbound data and disconnects go through a cloneable
//! [`ServerHandle`].

pub mod connection;
pub mod error;
pub mod server;

pub use error::NetError;
pub use server::{NetConfig, NetEvent, NetServer, ServerCommand, ServerHandle};

use std::fmt;

/// Transport-level identifier of one accepted socket. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}
