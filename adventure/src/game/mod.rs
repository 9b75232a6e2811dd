//! The adventure game: players, rooms and monsters as virtual actors.
//!
//! Each actor kind has a handler (`PlayerActor`, `RoomActor`,
//! `MonsterActor`), a typed reference (`PlayerRef`, `RoomRef`, `MonsterRef`)
//! and a `*_methods` module with its method discriminants. Actors only ever
//! talk to each other through references, so every interaction goes through
//! the runtime's mailboxes and persistence.
//!
//! Combat and command parsing are pluggable: see [`CombatPolicy`] and
//! [`CommandPolicy`].

pub mod combat;
pub mod commands;
pub mod monster;
pub mod player;
pub mod room;
pub mod world;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use combat::{CombatPolicy, FixedCombat, RandomCombat};
pub use commands::{Command, CommandPolicy, SimpleCommands};
pub use monster::{MonsterActor, MonsterInfo, MonsterRef, MonsterSetup, MonsterStatus, monster_methods};
pub use player::{PlayerActor, PlayerInfo, PlayerRef, PlayerStatus, player_methods};
pub use room::{MonsterPresence, Occupant, RoomActor, RoomInfo, RoomRef, room_methods};
pub use world::seed_world;

/// Compass direction of a room exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// North.
    North,
    /// South.
    South,
    /// East.
    East,
    /// West.
    West,
    /// Up.
    Up,
    /// Down.
    Down,
}

impl Direction {
    /// Every direction, in display order.
    pub const ALL: [Direction; 6] = [
        Direction::North,
        Direction::South,
        Direction::East,
        Direction::West,
        Direction::Up,
        Direction::Down,
    ];

    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::North => "north",
            Direction::South => "south",
            Direction::East => "east",
            Direction::West => "west",
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }

    /// The direction leading back.
    pub fn opposite(&self) -> Direction {
        match self {
            Direction::North => Direction::South,
            Direction::South => Direction::North,
            Direction::East => Direction::West,
            Direction::West => Direction::East,
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for an unrecognized direction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown direction: {0}")]
pub struct ParseDirectionError(pub String);

impl FromStr for Direction {
    type Err = ParseDirectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "north" | "n" => Ok(Direction::North),
            "south" | "s" => Ok(Direction::South),
            "east" | "e" => Ok(Direction::East),
            "west" | "w" => Ok(Direction::West),
            "up" | "u" => Ok(Direction::Up),
            "down" | "d" => Ok(Direction::Down),
            other => Err(ParseDirectionError(other.to_string())),
        }
    }
}
