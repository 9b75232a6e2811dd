//! Monster actors.
//!
//! A monster sits in a room, takes damage from players and, when it is
//! aggressive and still standing, strikes back. The counter-attack is a
//! one-way message to itself followed by a one-way damage message to the
//! player, so a monster never waits on a player that may be waiting on it.

use std::rc::Rc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::JsonCodec;
use crate::actors::{
    ActorContext, ActorError, ActorHandle, ActorHandler, ActorId, ActorKey, ActorKind, ActorRef,
    ActorRouter,
};

use super::combat::{CombatPolicy, RandomCombat};
use super::player::player_methods;
use super::room::{MonsterPresence, RoomRef};

/// Method discriminants for monster actors.
pub mod monster_methods {
    /// Name, kind, health, aggression and home room.
    pub const CONFIGURE: u32 = 1;
    /// Current status (read-only).
    pub const DESCRIBE: u32 = 2;
    /// Strike a player.
    pub const ATTACK: u32 = 3;
    /// Take a blow.
    pub const APPLY_DAMAGE: u32 = 4;
    /// Leave the world for good.
    pub const DIE: u32 = 5;
}

const DEFAULT_HEALTH: u32 = 100;

/// Parameters of a freshly spawned monster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonsterSetup {
    /// Display name.
    pub name: String,
    /// Species, for flavor.
    pub kind: String,
    /// Starting health.
    pub health: u32,
    /// Upper bound of counter-attack damage; 0 never fights back.
    pub aggression: u32,
    /// Room the monster lives in.
    pub room: i64,
}

/// Durable state of a monster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonsterState {
    name: String,
    kind: String,
    health: u32,
    aggression: u32,
    room: Option<i64>,
    alive: bool,
}

impl Default for MonsterState {
    fn default() -> Self {
        Self {
            name: String::new(),
            kind: String::new(),
            health: DEFAULT_HEALTH,
            aggression: 0,
            room: None,
            alive: true,
        }
    }
}

/// Externally visible monster status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonsterInfo {
    /// Monster identity.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Species.
    pub kind: String,
    /// Remaining health.
    pub health: u32,
    /// Current room.
    pub room: Option<i64>,
}

/// Outcome of a blow against a monster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonsterStatus {
    /// Remaining health.
    pub health: u32,
    /// Whether the monster survived.
    pub alive: bool,
}

/// Handler for monster actors.
pub struct MonsterActor {
    combat: Box<dyn CombatPolicy>,
}

impl MonsterActor {
    /// Monster with a custom combat policy.
    pub fn with_combat(combat: impl CombatPolicy + 'static) -> Self {
        Self {
            combat: Box::new(combat),
        }
    }
}

impl Default for MonsterActor {
    fn default() -> Self {
        Self::with_combat(RandomCombat::new())
    }
}

impl MonsterActor {
    async fn die(&self, ctx: &ActorContext, state: &mut MonsterState) -> Result<(), ActorError> {
        if let Some(room) = state.room {
            let room: RoomRef = ctx.actor_ref(ActorId::room(room));
            room.remove_monster(monster_number(&ctx.id)?).await?;
            room.add_thing(&format!("{} corpse", state.name)).await?;
        }
        state.room = None;
        state.health = 0;
        state.alive = false;
        tracing::info!(monster = %ctx.id, name = %state.name, "monster died");
        ctx.deactivate_on_completion();
        Ok(())
    }
}

#[async_trait(?Send)]
impl ActorHandler for MonsterActor {
    type State = MonsterState;

    fn actor_kind() -> ActorKind {
        ActorKind::Monster
    }

    fn is_read_only(method: u32) -> bool {
        matches!(method, monster_methods::DESCRIBE | monster_methods::ATTACK)
    }

    fn is_tombstoned(state: &MonsterState) -> bool {
        !state.alive
    }

    async fn dispatch(
        &mut self,
        ctx: &ActorContext,
        state: &mut MonsterState,
        method: u32,
        body: &[u8],
    ) -> Result<Vec<u8>, ActorError> {
        match method {
            monster_methods::CONFIGURE => {
                let setup: MonsterSetup = JsonCodec.decode(body)?;
                let presence = MonsterPresence {
                    id: monster_number(&ctx.id)?,
                    name: setup.name.clone(),
                };
                ctx.actor_ref::<RoomRef>(ActorId::room(setup.room))
                    .add_monster(&presence)
                    .await?;
                if let Some(previous) = state.room.filter(|r| *r != setup.room) {
                    ctx.actor_ref::<RoomRef>(ActorId::room(previous))
                        .remove_monster(presence.id)
                        .await?;
                }
                state.name = setup.name;
                state.kind = setup.kind;
                state.health = setup.health;
                state.aggression = setup.aggression;
                state.room = Some(setup.room);
                Ok(JsonCodec.encode(&())?)
            }
            monster_methods::DESCRIBE => {
                let info = MonsterInfo {
                    id: monster_number(&ctx.id)?,
                    name: state.name.clone(),
                    kind: state.kind.clone(),
                    health: state.health,
                    room: state.room,
                };
                Ok(JsonCodec.encode(&info)?)
            }
            monster_methods::ATTACK => {
                let player: Uuid = JsonCodec.decode(body)?;
                let damage = self.combat.damage(state.aggression);
                if damage > 0 {
                    tracing::debug!(monster = %ctx.id, %player, damage, "monster attacks");
                    ctx.tell(
                        &ActorId::player(player),
                        player_methods::APPLY_DAMAGE,
                        &damage,
                    )?;
                }
                Ok(JsonCodec.encode(&damage)?)
            }
            monster_methods::APPLY_DAMAGE => {
                let damage: u32 = JsonCodec.decode(body)?;
                state.health = state.health.saturating_sub(damage);
                if state.health == 0 {
                    self.die(ctx, state).await?;
                } else if state.aggression > 0 {
                    if let Some(ActorKey::Guid(player)) = ctx.sender.as_ref().map(|s| s.key) {
                        ctx.tell(&ctx.id, monster_methods::ATTACK, &player)?;
                    }
                }
                let status = MonsterStatus {
                    health: state.health,
                    alive: state.alive,
                };
                Ok(JsonCodec.encode(&status)?)
            }
            monster_methods::DIE => {
                self.die(ctx, state).await?;
                Ok(JsonCodec.encode(&())?)
            }
            _ => Err(ActorError::UnknownMethod(method)),
        }
    }
}

fn monster_number(id: &ActorId) -> Result<i64, ActorError> {
    match id.key {
        ActorKey::Integer(n) => Ok(n),
        ActorKey::Guid(_) => Err(ActorError::handler(format!(
            "monster {id} has no integer key"
        ))),
    }
}

/// Typed reference to a monster actor.
#[derive(Debug, Clone)]
pub struct MonsterRef {
    handle: ActorHandle,
}

impl ActorRef for MonsterRef {
    fn from_router(id: ActorId, router: &Rc<ActorRouter>, sender: Option<ActorId>) -> Self {
        Self {
            handle: ActorHandle::new(id, router, sender),
        }
    }
}

impl MonsterRef {
    /// Monster identity.
    pub fn id(&self) -> &ActorId {
        self.handle.id()
    }

    /// Spawn the monster (or respawn it) in a room.
    pub async fn configure(&self, setup: &MonsterSetup) -> Result<(), ActorError> {
        self.handle.call(monster_methods::CONFIGURE, setup).await
    }

    /// Current status.
    pub async fn describe(&self) -> Result<MonsterInfo, ActorError> {
        self.handle.call(monster_methods::DESCRIBE, &()).await
    }

    /// Strike a player; replies with the damage dealt.
    pub async fn attack(&self, player: Uuid) -> Result<u32, ActorError> {
        self.handle.call(monster_methods::ATTACK, &player).await
    }

    /// Deal damage to the monster.
    pub async fn apply_damage(&self, damage: u32) -> Result<MonsterStatus, ActorError> {
        self.handle.call(monster_methods::APPLY_DAMAGE, &damage).await
    }

    /// Kill the monster.
    pub async fn die(&self) -> Result<(), ActorError> {
        self.handle.call(monster_methods::DIE, &()).await
    }
}
