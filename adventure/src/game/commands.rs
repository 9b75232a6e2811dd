//! Free-text command parsing for `Play`.
//!
//! The vocabulary is a [`CommandPolicy`]; [`SimpleCommands`] understands a
//! handful of classic adventure verbs.

use serde::{Deserialize, Serialize};

use super::Direction;

/// A parsed player command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Describe the current room.
    Look,
    /// Walk through an exit.
    Go(Direction),
    /// Pick up a thing lying in the room.
    Take(String),
    /// Put down a carried thing.
    Drop(String),
    /// List carried things.
    Inventory,
    /// Attack a monster in the room by name.
    Kill(String),
    /// Leave the game.
    End,
    /// Anything else.
    Unknown(String),
}

/// Turns a line of player input into a [`Command`].
pub trait CommandPolicy {
    /// Parse one line.
    fn parse(&self, input: &str) -> Command;
}

/// Verb-object parser: `look`, `go <dir>` or a bare direction,
/// `take <thing>`, `drop <thing>`, `inventory`, `kill <monster>`, `end`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleCommands;

impl CommandPolicy for SimpleCommands {
    fn parse(&self, input: &str) -> Command {
        let lowered = input.trim().to_lowercase();
        let mut words = lowered.split_whitespace();
        let Some(verb) = words.next() else {
            return Command::Unknown(String::new());
        };
        let object = words.collect::<Vec<_>>().join(" ");

        match (verb, object.is_empty()) {
            ("look" | "l", _) => Command::Look,
            ("inventory" | "inv" | "i", true) => Command::Inventory,
            ("end" | "quit", true) => Command::End,
            ("go" | "walk", false) => match object.parse() {
                Ok(direction) => Command::Go(direction),
                Err(_) => Command::Unknown(lowered.clone()),
            },
            ("take" | "get", false) => Command::Take(object),
            ("drop", false) => Command::Drop(object),
            ("kill" | "attack", false) => Command::Kill(object),
            (_, true) => match verb.parse() {
                Ok(direction) => Command::Go(direction),
                Err(_) => Command::Unknown(lowered.clone()),
            },
            _ => Command::Unknown(lowered.clone()),
        }
    }
}
