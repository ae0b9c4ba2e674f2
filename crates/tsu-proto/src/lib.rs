//! Attorney Online wire protocol: framing, legacy cipher, command schema and packets.

pub mod cipher;
pub mod error;
pub mod framer;
pub mod packets;
pub mod schema;

pub use error::{FramingError, ValidationError};
pub use framer::Framer;
pub use packets::Packet;
pub use schema::{validate, Arg, ArgKind, ArgSchema, NetCommand};

/// Separates fields within a message.
pub const FIELD_DELIMITER: char = '#';

/// Terminates a message on the wire.
pub const MESSAGE_DELIMITER: &str = "#%";
