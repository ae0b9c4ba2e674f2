//! ARUP: per-area status sync sent to every client.

use super::{id, Packet};

/// Which area attribute an ARUP packet carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AreaUpdateKind {
    Players = 0,
    Status = 1,
    CaseMaster = 2,
}

/// One value per area, in area order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AreaUpdate {
    pub kind: AreaUpdateKind,
    pub values: Vec<String>,
}

impl AreaUpdate {
    pub fn new<I>(kind: AreaUpdateKind, values: I) -> Self
    where
        I: IntoIterator,
        I::Item: ToString,
    {
        Self {
            kind,
            values: values.into_iter().map(|v| v.to_string()).collect(),
        }
    }

    pub fn to_packet(&self) -> Packet {
        Packet::new(id::AREA_UPDATE)
            .arg(self.kind as u8)
            .args(&self.values)
    }
}
