//! Room actors.
//!
//! A room is the meeting point of the world: it knows its exits, who is
//! standing in it, which monsters lurk there and what lies on the floor.
//! Every mutating method is idempotent, so a caller that retries after a
//! lost reply never double-counts an occupant or a thing.

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::JsonCodec;
use crate::actors::{
    ActorContext, ActorError, ActorHandle, ActorHandler, ActorId, ActorKey, ActorKind, ActorRef,
    ActorRouter,
};

use super::Direction;

/// Method discriminants for room actors.
pub mod room_methods {
    /// Set name and description.
    pub const CONFIGURE: u32 = 1;
    /// Add or replace an exit.
    pub const SET_EXIT: u32 = 2;
    /// Full description (read-only).
    pub const DESCRIBE: u32 = 3;
    /// Exit table (read-only).
    pub const EXITS: u32 = 4;
    /// A player enters.
    pub const ADD_OCCUPANT: u32 = 5;
    /// A player leaves.
    pub const REMOVE_OCCUPANT: u32 = 6;
    /// A monster arrives.
    pub const ADD_MONSTER: u32 = 7;
    /// A monster leaves or dies.
    pub const REMOVE_MONSTER: u32 = 8;
    /// Something is put down.
    pub const ADD_THING: u32 = 9;
    /// Something is picked up; replies whether it was there.
    pub const TAKE_THING: u32 = 10;
}

/// A player standing in a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occupant {
    /// Player identity.
    pub id: Uuid,
    /// Display name.
    pub name: String,
}

/// A monster lurking in a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonsterPresence {
    /// Monster identity.
    pub id: i64,
    /// Display name.
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RoomConfig {
    name: String,
    description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ExitRequest {
    direction: Direction,
    room: i64,
}

/// Durable state of a room.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomState {
    name: String,
    description: String,
    exits: BTreeMap<Direction, i64>,
    occupants: BTreeMap<Uuid, String>,
    monsters: BTreeMap<i64, String>,
    things: BTreeSet<String>,
}

/// What a visitor sees when looking around.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInfo {
    /// Room identity.
    pub id: i64,
    /// Room name.
    pub name: String,
    /// Long description.
    pub description: String,
    /// Exits and the rooms they lead to.
    pub exits: BTreeMap<Direction, i64>,
    /// Players in the room.
    pub occupants: Vec<Occupant>,
    /// Monsters in the room.
    pub monsters: Vec<MonsterPresence>,
    /// Things lying around.
    pub things: Vec<String>,
}

impl RoomInfo {
    /// Human-readable rendering, as seen by `viewer` (left out of the
    /// list of people present).
    pub fn render(&self, viewer: Option<Uuid>) -> String {
        let mut text = format!("{}\n{}", self.name, self.description);
        let others: Vec<&str> = self
            .occupants
            .iter()
            .filter(|o| Some(o.id) != viewer)
            .map(|o| o.name.as_str())
            .collect();
        if !others.is_empty() {
            text.push_str(&format!("\nAlso here: {}.", others.join(", ")));
        }
        for monster in &self.monsters {
            text.push_str(&format!("\nA {} is here.", monster.name));
        }
        if !self.things.is_empty() {
            text.push_str(&format!("\nYou see: {}.", self.things.join(", ")));
        }
        if self.exits.is_empty() {
            text.push_str("\nThere is no way out.");
        } else {
            let exits: Vec<&str> = self.exits.keys().map(|d| d.as_str()).collect();
            text.push_str(&format!("\nExits: {}.", exits.join(", ")));
        }
        text
    }
}

/// Handler for room actors.
#[derive(Debug, Default)]
pub struct RoomActor;

#[async_trait(?Send)]
impl ActorHandler for RoomActor {
    type State = RoomState;

    fn actor_kind() -> ActorKind {
        ActorKind::Room
    }

    fn is_read_only(method: u32) -> bool {
        matches!(method, room_methods::DESCRIBE | room_methods::EXITS)
    }

    async fn dispatch(
        &mut self,
        ctx: &ActorContext,
        state: &mut RoomState,
        method: u32,
        body: &[u8],
    ) -> Result<Vec<u8>, ActorError> {
        match method {
            room_methods::CONFIGURE => {
                let config: RoomConfig = JsonCodec.decode(body)?;
                state.name = config.name;
                state.description = config.description;
                Ok(JsonCodec.encode(&())?)
            }
            room_methods::SET_EXIT => {
                let exit: ExitRequest = JsonCodec.decode(body)?;
                state.exits.insert(exit.direction, exit.room);
                Ok(JsonCodec.encode(&())?)
            }
            room_methods::DESCRIBE => Ok(JsonCodec.encode(&describe(ctx, state)?)?),
            room_methods::EXITS => Ok(JsonCodec.encode(&state.exits)?),
            room_methods::ADD_OCCUPANT => {
                let occupant: Occupant = JsonCodec.decode(body)?;
                tracing::debug!(room = %ctx.id, player = %occupant.id, "player entered");
                state.occupants.insert(occupant.id, occupant.name);
                Ok(JsonCodec.encode(&())?)
            }
            room_methods::REMOVE_OCCUPANT => {
                let player: Uuid = JsonCodec.decode(body)?;
                state.occupants.remove(&player);
                Ok(JsonCodec.encode(&())?)
            }
            room_methods::ADD_MONSTER => {
                let monster: MonsterPresence = JsonCodec.decode(body)?;
                state.monsters.insert(monster.id, monster.name);
                Ok(JsonCodec.encode(&())?)
            }
            room_methods::REMOVE_MONSTER => {
                let monster: i64 = JsonCodec.decode(body)?;
                state.monsters.remove(&monster);
                Ok(JsonCodec.encode(&())?)
            }
            room_methods::ADD_THING => {
                let thing: String = JsonCodec.decode(body)?;
                state.things.insert(thing);
                Ok(JsonCodec.encode(&())?)
            }
            room_methods::TAKE_THING => {
                let thing: String = JsonCodec.decode(body)?;
                Ok(JsonCodec.encode(&state.things.remove(&thing))?)
            }
            _ => Err(ActorError::UnknownMethod(method)),
        }
    }
}

fn describe(ctx: &ActorContext, state: &RoomState) -> Result<RoomInfo, ActorError> {
    Ok(RoomInfo {
        id: room_number(&ctx.id)?,
        name: state.name.clone(),
        description: state.description.clone(),
        exits: state.exits.clone(),
        occupants: state
            .occupants
            .iter()
            .map(|(id, name)| Occupant {
                id: *id,
                name: name.clone(),
            })
            .collect(),
        monsters: state
            .monsters
            .iter()
            .map(|(id, name)| MonsterPresence {
                id: *id,
                name: name.clone(),
            })
            .collect(),
        things: state.things.iter().cloned().collect(),
    })
}

fn room_number(id: &ActorId) -> Result<i64, ActorError> {
    match id.key {
        ActorKey::Integer(n) => Ok(n),
        ActorKey::Guid(_) => Err(ActorError::handler(format!(
            "room {id} has no integer key"
        ))),
    }
}

/// Typed reference to a room actor.
#[derive(Debug, Clone)]
pub struct RoomRef {
    handle: ActorHandle,
}

impl ActorRef for RoomRef {
    fn from_router(id: ActorId, router: &Rc<ActorRouter>, sender: Option<ActorId>) -> Self {
        Self {
            handle: ActorHandle::new(id, router, sender),
        }
    }
}

impl RoomRef {
    /// Room identity.
    pub fn id(&self) -> &ActorId {
        self.handle.id()
    }

    /// Set the name and description.
    pub async fn configure(&self, name: &str, description: &str) -> Result<(), ActorError> {
        let config = RoomConfig {
            name: name.to_string(),
            description: description.to_string(),
        };
        self.handle.call(room_methods::CONFIGURE, &config).await
    }

    /// Add or replace the exit in `direction`.
    pub async fn set_exit(&self, direction: Direction, room: i64) -> Result<(), ActorError> {
        self.handle
            .call(room_methods::SET_EXIT, &ExitRequest { direction, room })
            .await
    }

    /// Look around.
    pub async fn describe(&self) -> Result<RoomInfo, ActorError> {
        self.handle.call(room_methods::DESCRIBE, &()).await
    }

    /// The exit table.
    pub async fn exits(&self) -> Result<BTreeMap<Direction, i64>, ActorError> {
        self.handle.call(room_methods::EXITS, &()).await
    }

    /// Record a player as present.
    pub async fn add_occupant(&self, occupant: &Occupant) -> Result<(), ActorError> {
        self.handle.call(room_methods::ADD_OCCUPANT, occupant).await
    }

    /// Record a player as gone.
    pub async fn remove_occupant(&self, player: Uuid) -> Result<(), ActorError> {
        self.handle.call(room_methods::REMOVE_OCCUPANT, &player).await
    }

    /// Record a monster as present.
    pub async fn add_monster(&self, monster: &MonsterPresence) -> Result<(), ActorError> {
        self.handle.call(room_methods::ADD_MONSTER, monster).await
    }

    /// Record a monster as gone.
    pub async fn remove_monster(&self, monster: i64) -> Result<(), ActorError> {
        self.handle.call(room_methods::REMOVE_MONSTER, &monster).await
    }

    /// Put a thing down.
    pub async fn add_thing(&self, thing: &str) -> Result<(), ActorError> {
        self.handle.call(room_methods::ADD_THING, &thing).await
    }

    /// Pick a thing up. `false` when it is not there.
    pub async fn take_thing(&self, thing: &str) -> Result<bool, ActorError> {
        self.handle.call(room_methods::TAKE_THING, &thing).await
    }
}
