//! Inbound command table and argument validation.
//!
//! Every command name maps to a [`NetCommand`]. Commands that take arguments
//! carry an [`ArgSchema`]; [`validate`] checks the raw fields against it and
//! hands back typed [`Arg`]s, or rejects the whole command.

use crate::error::ValidationError;

/// Expected kind of a positional argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// Non-empty text.
    Str,
    /// Text that may be empty.
    StrOrEmpty,
    /// Base-10 integer.
    Int,
}

/// A validated argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Str(String),
    Int(i64),
}

impl Arg {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Arg::Str(s) => Some(s.as_str()),
            Arg::Int(_) => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Arg::Int(n) => Some(*n),
            Arg::Str(_) => None,
        }
    }
}

/// Argument layout of one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgSchema {
    pub kinds: &'static [ArgKind],
    /// Whether the sender must have selected a character first.
    pub needs_auth: bool,
}

impl ArgSchema {
    pub const fn new(kinds: &'static [ArgKind], needs_auth: bool) -> Self {
        Self { kinds, needs_auth }
    }
}

/// Check raw fields against a schema.
///
/// On success every `Int` slot holds the parsed number and every other slot
/// the original text. Nothing is returned on failure, so a rejected command
/// cannot leak half-converted arguments.
pub fn validate(
    args: Vec<String>,
    schema: &ArgSchema,
    has_character: bool,
) -> Result<Vec<Arg>, ValidationError> {
    if schema.needs_auth && !has_character {
        return Err(ValidationError::NotAuthenticated);
    }
    if args.len() != schema.kinds.len() {
        return Err(ValidationError::ArgCount {
            expected: schema.kinds.len(),
            actual: args.len(),
        });
    }

    let mut typed = Vec::with_capacity(args.len());
    for (index, (raw, kind)) in args.into_iter().zip(schema.kinds).enumerate() {
        if raw.is_empty() && *kind != ArgKind::StrOrEmpty {
            return Err(ValidationError::EmptyArg(index));
        }
        match kind {
            ArgKind::Int => match raw.trim().parse::<i64>() {
                Ok(n) => typed.push(Arg::Int(n)),
                Err(_) => return Err(ValidationError::NotAnInteger { index, value: raw }),
            },
            ArgKind::Str | ArgKind::StrOrEmpty => typed.push(Arg::Str(raw)),
        }
    }
    Ok(typed)
}

use ArgKind::{Int, Str, StrOrEmpty};

const HANDSHAKE: ArgSchema = ArgSchema::new(&[Str], false);
const CLIENT_VERSION: ArgSchema = ArgSchema::new(&[Str, Str], false);
const CHANGE_CHARACTER: ArgSchema = ArgSchema::new(&[Int, Int, Str], false);
const IC_MESSAGE: ArgSchema = ArgSchema::new(
    &[
        Str, StrOrEmpty, Str, Str, Str, Str, Str, Int, Int, Int, Int, Int, Int, Int, Int,
    ],
    true,
);
const OOC_MESSAGE: ArgSchema = ArgSchema::new(&[Str, Str], true);
const MUSIC_CHANGE: ArgSchema = ArgSchema::new(&[Str, Int], true);
const TESTIMONY: ArgSchema = ArgSchema::new(&[Str], true);
const PENALTY: ArgSchema = ArgSchema::new(&[Int, Int], true);
const MOD_SHORTCUT: ArgSchema = ArgSchema::new(&[Str], true);

/// Client → server commands understood by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetCommand {
    /// `HI#<hdid>`: handshake with device token.
    Handshake,
    /// `CH`: keepalive.
    KeepAlive,
    /// `ID#<software>#<version>`: client identification.
    ClientVersion,
    /// `askchaa`: ask for catalog sizes.
    AskCounts,
    /// `RC`: character list request.
    CharacterList,
    /// `RM`: music list request.
    MusicList,
    /// `RD`: client finished loading.
    Ready,
    /// `CC#<client id>#<char id>#<hdid>`: character selection.
    ChangeCharacter,
    /// `MS#...`: in-character message.
    IcMessage,
    /// `CT#<name>#<text>`: out-of-character message.
    OocMessage,
    /// `MC#<area or song>#<char id>`: area change or music.
    MusicChange,
    /// `RT#<animation>`: witness testimony / cross examination.
    Testimony,
    /// `HP#<bar>#<value>`: penalty bar.
    Penalty,
    /// `ZZ`: moderator call.
    ModCall,
    /// `opKICK#<target>`: guarded `/kick`.
    OpKick,
    /// `opBAN#<target>`: guarded `/ban`.
    OpBan,
}

impl NetCommand {
    /// Look up a command by its exact wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "HI" => Self::Handshake,
            "CH" => Self::KeepAlive,
            "ID" => Self::ClientVersion,
            "askchaa" => Self::AskCounts,
            "RC" => Self::CharacterList,
            "RM" => Self::MusicList,
            "RD" => Self::Ready,
            "CC" => Self::ChangeCharacter,
            "MS" => Self::IcMessage,
            "CT" => Self::OocMessage,
            "MC" => Self::MusicChange,
            "RT" => Self::Testimony,
            "HP" => Self::Penalty,
            "ZZ" => Self::ModCall,
            "opKICK" => Self::OpKick,
            "opBAN" => Self::OpBan,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Handshake => "HI",
            Self::KeepAlive => "CH",
            Self::ClientVersion => "ID",
            Self::AskCounts => "askchaa",
            Self::CharacterList => "RC",
            Self::MusicList => "RM",
            Self::Ready => "RD",
            Self::ChangeCharacter => "CC",
            Self::IcMessage => "MS",
            Self::OocMessage => "CT",
            Self::MusicChange => "MC",
            Self::Testimony => "RT",
            Self::Penalty => "HP",
            Self::ModCall => "ZZ",
            Self::OpKick => "opKICK",
            Self::OpBan => "opBAN",
        }
    }

    /// Argument schema, or `None` for commands whose arguments are ignored.
    pub fn schema(self) -> Option<&'static ArgSchema> {
        match self {
            Self::Handshake => Some(&HANDSHAKE),
            Self::ClientVersion => Some(&CLIENT_VERSION),
            Self::ChangeCharacter => Some(&CHANGE_CHARACTER),
            Self::IcMessage => Some(&IC_MESSAGE),
            Self::OocMessage => Some(&OOC_MESSAGE),
            Self::MusicChange => Some(&MUSIC_CHANGE),
            Self::Testimony => Some(&TESTIMONY),
            Self::Penalty => Some(&PENALTY),
            Self::OpKick | Self::OpBan => Some(&MOD_SHORTCUT),
            Self::KeepAlive
            | Self::AskCounts
            | Self::CharacterList
            | Self::MusicList
            | Self::Ready
            | Self::ModCall => None,
        }
    }
}
