//! Wire packets.
//!
//! A packet is a command name followed by positional fields, joined with
//! `#` and terminated with `#%`.

pub mod area_update;
pub mod ic_message;

pub use area_update::{AreaUpdate, AreaUpdateKind};
pub use ic_message::{IcMessage, IcSender, MAX_TEXT_LEN, POSITIONS};

use std::fmt;

use crate::{FIELD_DELIMITER, MESSAGE_DELIMITER};

/// Server → client command names.
pub mod id {
    pub const DECRYPTOR: &str = "decryptor";
    pub const SERVER_ID: &str = "ID";
    pub const PLAYER_COUNT: &str = "PN";
    pub const FEATURE_LIST: &str = "FL";
    pub const SIZE_INFO: &str = "SI";
    pub const CHARACTER_LIST: &str = "SC";
    pub const MUSIC_LIST: &str = "SM";
    pub const CHARS_CHECK: &str = "CharsCheck";
    pub const PENALTY: &str = "HP";
    pub const BACKGROUND: &str = "BN";
    pub const EVIDENCE_LIST: &str = "LE";
    pub const MUSIC_MODE: &str = "MM";
    pub const DONE: &str = "DONE";
    pub const AREA_LIST: &str = "FA";
    pub const OOC_MESSAGE: &str = "CT";
    pub const IC_MESSAGE: &str = "MS";
    pub const MUSIC: &str = "MC";
    pub const TESTIMONY: &str = "RT";
    pub const MOD_CALL: &str = "ZZ";
    pub const PLAYER_VALUE: &str = "PV";
    pub const BANNED: &str = "BD";
    pub const KEEPALIVE_ACK: &str = "CHECK";
    pub const AREA_UPDATE: &str = "ARUP";
}

/// A command name with its positional fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub name: String,
    pub fields: Vec<String>,
}

impl Packet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Append one field.
    pub fn arg(mut self, field: impl fmt::Display) -> Self {
        self.fields.push(field.to_string());
        self
    }

    /// Append every item as a field.
    pub fn args<I>(mut self, fields: I) -> Self
    where
        I: IntoIterator,
        I::Item: fmt::Display,
    {
        self.fields
            .extend(fields.into_iter().map(|f| f.to_string()));
        self
    }

    /// Split an unframed message into name and fields. Field 0 is the name.
    pub fn parse(msg: &str) -> Self {
        let mut parts = msg.split(FIELD_DELIMITER);
        let name = parts.next().unwrap_or_default().to_string();
        Self {
            name,
            fields: parts.map(String::from).collect(),
        }
    }

    /// Render with the trailing terminator, ready for the socket.
    pub fn encode(&self) -> String {
        let mut out = self.name.clone();
        for field in &self.fields {
            out.push(FIELD_DELIMITER);
            out.push_str(field);
        }
        out.push_str(MESSAGE_DELIMITER);
        out
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}
