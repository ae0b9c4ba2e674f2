//! OOC slash-command registry.
//!
//! Commands are plain functions registered under an exact name together with
//! their declared parameters. The registry is generic over the context the
//! server hands to every handler.

pub mod args;

use std::collections::BTreeMap;

use thiserror::Error;

pub use args::{Param, ParamType, ParsedArgs, Value};

/// Reply sent when no command matches.
pub const INVALID_COMMAND: &str = "Invalid command.";

/// Domain errors a command may raise. The message is relayed to the sender
/// as-is and never reaches anyone else.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// Something about the invoking client (permissions, state).
    #[error("{0}")]
    Client(String),
    /// Something about an area.
    #[error("{0}")]
    Area(String),
    /// Bad or missing arguments.
    #[error("{0}")]
    Argument(String),
    #[error("{0}")]
    Server(String),
}

/// Lets the registry send feedback lines to the invoking client.
pub trait CommandSender {
    fn reply(&mut self, client: u32, message: &str);
}

/// A single command invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Id of the client that typed the command.
    pub sender: u32,
    pub args: ParsedArgs,
}

/// Function pointer type for command handlers.
pub type CommandFn<C> = fn(&mut C, &Invocation) -> Result<(), CommandError>;

/// A registered command.
pub struct CommandEntry<C> {
    pub name: &'static str,
    pub description: &'static str,
    pub params: &'static [Param],
    pub handler: CommandFn<C>,
}

/// What happened to a dispatched command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Failed(CommandError),
    Unknown,
}

/// Registry of available OOC commands.
pub struct CommandRegistry<C> {
    commands: BTreeMap<&'static str, CommandEntry<C>>,
}

impl<C: CommandSender> CommandRegistry<C> {
    pub fn new() -> Self {
        Self {
            commands: BTreeMap::new(),
        }
    }

    /// Register a command, replacing any previous one with the same name.
    pub fn register(
        &mut self,
        name: &'static str,
        description: &'static str,
        params: &'static [Param],
        handler: CommandFn<C>,
    ) {
        self.commands.insert(
            name,
            CommandEntry {
                name,
                description,
                params,
                handler,
            },
        );
    }

    /// Parse the argument string and run the named command.
    ///
    /// Unknown names and handler errors are reported back to `sender`
    /// through [`CommandSender::reply`].
    pub fn dispatch(&self, ctx: &mut C, sender: u32, name: &str, raw_args: &str) -> Outcome {
        let Some(entry) = self.commands.get(name) else {
            ctx.reply(sender, INVALID_COMMAND);
            return Outcome::Unknown;
        };

        let result = args::parse(raw_args, entry.params)
            .and_then(|args| (entry.handler)(ctx, &Invocation { sender, args }));
        match result {
            Ok(()) => Outcome::Done,
            Err(e) => {
                ctx.reply(sender, &e.to_string());
                Outcome::Failed(e)
            }
        }
    }

    /// One `/name <params> - description` line per command, sorted by name.
    pub fn help_lines(&self) -> Vec<String> {
        self.commands
            .values()
            .map(|entry| {
                let usage = args::usage(entry.params);
                if usage.is_empty() {
                    format!("/{} - {}", entry.name, entry.description)
                } else {
                    format!("/{} {} - {}", entry.name, usage, entry.description)
                }
            })
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl<C: CommandSender> Default for CommandRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
