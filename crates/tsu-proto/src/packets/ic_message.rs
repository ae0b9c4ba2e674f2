//! MS: in-character message, client → server and echoed to the area.

use super::{id, Packet};
use crate::error::ValidationError;
use crate::schema::Arg;

/// Stage positions a client may speak from.
pub const POSITIONS: [&str; 6] = ["def", "pro", "hld", "hlp", "jud", "wit"];

/// Longest text echoed to the area, in characters.
pub const MAX_TEXT_LEN: usize = 256;

const ANIM_TYPES: [i64; 5] = [0, 1, 2, 5, 6];
const MAX_BUTTON: i64 = 4;
const MAX_COLOR: i64 = 5;
/// Colour reserved for moderators; downgraded to [`DEFAULT_COLOR`] for everyone else.
const MOD_COLOR: i64 = 2;
const DEFAULT_COLOR: i64 = 0;

/// The sending session, as far as MS validation is concerned.
#[derive(Debug, Clone, Copy)]
pub struct IcSender<'a> {
    pub char_id: i32,
    pub is_mod: bool,
    /// Position forced by `/pos`, overriding what the client sends.
    pub fixed_pos: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IcMessage {
    pub msg_type: String,
    pub pre: String,
    pub folder: String,
    pub anim: String,
    pub text: String,
    pub pos: String,
    pub sfx: String,
    pub anim_type: i64,
    pub char_id: i64,
    pub sfx_delay: i64,
    pub button: i64,
    pub evidence: i64,
    pub flip: i64,
    pub ding: i64,
    pub color: i64,
}

impl IcMessage {
    /// Build from the 15 validated MS arguments.
    pub fn from_args(args: Vec<Arg>) -> Option<Self> {
        let fields: [Arg; 15] = args.try_into().ok()?;
        let [
            Arg::Str(msg_type),
            Arg::Str(pre),
            Arg::Str(folder),
            Arg::Str(anim),
            Arg::Str(text),
            Arg::Str(pos),
            Arg::Str(sfx),
            Arg::Int(anim_type),
            Arg::Int(char_id),
            Arg::Int(sfx_delay),
            Arg::Int(button),
            Arg::Int(evidence),
            Arg::Int(flip),
            Arg::Int(ding),
            Arg::Int(color),
        ] = fields
        else {
            return None;
        };
        Some(Self {
            msg_type,
            pre,
            folder,
            anim,
            text,
            pos,
            sfx,
            anim_type,
            char_id,
            sfx_delay,
            button,
            evidence,
            flip,
            ding,
            color,
        })
    }

    /// Range-check the message for `sender` and normalise it for broadcast.
    ///
    /// Applies the fixed position, downgrades the moderator colour, truncates
    /// the text and clears the evidence slot.
    pub fn sanitize(mut self, sender: &IcSender<'_>) -> Result<Self, ValidationError> {
        if self.msg_type != "chat" {
            return Err(ValidationError::InvalidField("msg_type"));
        }
        if !ANIM_TYPES.contains(&self.anim_type) {
            return Err(ValidationError::InvalidField("anim_type"));
        }
        if self.char_id != i64::from(sender.char_id) {
            return Err(ValidationError::InvalidField("char_id"));
        }
        if self.sfx_delay < 0 {
            return Err(ValidationError::InvalidField("sfx_delay"));
        }
        if !(0..=MAX_BUTTON).contains(&self.button) {
            return Err(ValidationError::InvalidField("button"));
        }
        if self.evidence < 0 {
            return Err(ValidationError::InvalidField("evidence"));
        }
        if !(0..=1).contains(&self.flip) {
            return Err(ValidationError::InvalidField("flip"));
        }
        if !(0..=1).contains(&self.ding) {
            return Err(ValidationError::InvalidField("ding"));
        }
        if !(0..=MAX_COLOR).contains(&self.color) {
            return Err(ValidationError::InvalidField("color"));
        }
        if self.color == MOD_COLOR && !sender.is_mod {
            self.color = DEFAULT_COLOR;
        }
        match sender.fixed_pos {
            Some(pos) => self.pos = pos.to_string(),
            None if POSITIONS.contains(&self.pos.as_str()) => {}
            None => return Err(ValidationError::InvalidField("pos")),
        }
        if self.text.chars().count() > MAX_TEXT_LEN {
            self.text = self.text.chars().take(MAX_TEXT_LEN).collect();
        }
        // Evidence is not implemented yet.
        self.evidence = 0;
        Ok(self)
    }

    pub fn to_packet(&self) -> Packet {
        Packet::new(id::IC_MESSAGE)
            .arg(&self.msg_type)
            .arg(&self.pre)
            .arg(&self.folder)
            .arg(&self.anim)
            .arg(&self.text)
            .arg(&self.pos)
            .arg(&self.sfx)
            .arg(self.anim_type)
            .arg(self.char_id)
            .arg(self.sfx_delay)
            .arg(self.button)
            .arg(self.evidence)
            .arg(self.flip)
            .arg(self.ding)
            .arg(self.color)
    }
}
