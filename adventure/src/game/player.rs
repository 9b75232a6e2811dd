//! Player actors.
//!
//! A player remembers its name, the room it stands in, its health and what
//! it carries. Moving is a short conversation with rooms: ask the current
//! room for its exits, enter the next room, then leave the old one. Both
//! room operations are idempotent, so a retried move converges.
//!
//! A dead player is tombstoned: its final state is persisted with
//! `alive = false` and every later message is answered with `Gone`.

use std::collections::BTreeSet;
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
use super::commands::{Command, CommandPolicy, SimpleCommands};
use super::monster::MonsterRef;
use super::room::{Occupant, RoomInfo, RoomRef};
use super::Direction;

/// Method discriminants for player actors.
pub mod player_methods {
    /// Set the display name.
    pub const SET_NAME: u32 = 1;
    /// Display name (read-only).
    pub const NAME: u32 = 2;
    /// Teleport into a room.
    pub const SET_ROOM: u32 = 3;
    /// Walk through an exit of the current room.
    pub const MOVE: u32 = 4;
    /// Take a blow.
    pub const APPLY_DAMAGE: u32 = 5;
    /// Die.
    pub const DIE: u32 = 6;
    /// Current status (read-only).
    pub const DESCRIBE: u32 = 7;
    /// Pick something up from the current room.
    pub const TAKE: u32 = 8;
    /// Put something down in the current room.
    pub const DROP: u32 = 9;
    /// Run one line of free-text input.
    pub const PLAY: u32 = 10;
}

/// Health of a new player.
pub const STARTING_HEALTH: u32 = 100;

/// Damage bound of a player's blows.
pub const PLAYER_STRENGTH: u32 = 40;

/// Durable state of a player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    name: String,
    room: Option<i64>,
    health: u32,
    inventory: BTreeSet<String>,
    alive: bool,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            name: String::new(),
            room: None,
            health: STARTING_HEALTH,
            inventory: BTreeSet::new(),
            alive: true,
        }
    }
}

/// Externally visible player status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInfo {
    /// Player identity.
    pub id: Uuid,
    /// Display name; empty for a player that was never created.
    pub name: String,
    /// Current room.
    pub room: Option<i64>,
    /// Remaining health.
    pub health: u32,
    /// Carried things.
    pub inventory: Vec<String>,
}

/// Outcome of a blow against a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerStatus {
    /// Remaining health.
    pub health: u32,
    /// Whether the player survived.
    pub alive: bool,
}

/// Handler for player actors.
pub struct PlayerActor {
    combat: Box<dyn CombatPolicy>,
    commands: Box<dyn CommandPolicy>,
}

impl PlayerActor {
    /// Player with custom combat and command policies.
    pub fn with_policies(
        combat: impl CombatPolicy + 'static,
        commands: impl CommandPolicy + 'static,
    ) -> Self {
        Self {
            combat: Box::new(combat),
            commands: Box::new(commands),
        }
    }
}

impl Default for PlayerActor {
    fn default() -> Self {
        Self::with_policies(RandomCombat::new(), SimpleCommands)
    }
}

fn player_uuid(id: &ActorId) -> Result<Uuid, ActorError> {
    match id.key {
        ActorKey::Guid(uuid) => Ok(uuid),
        ActorKey::Integer(_) => Err(ActorError::handler(format!("player {id} has no GUID key"))),
    }
}

fn current_room(state: &PlayerState) -> Result<i64, ActorError> {
    state
        .room
        .ok_or_else(|| ActorError::handler("you are nowhere"))
}

impl PlayerActor {
    /// Enter `to`, then leave the previous room.
    async fn enter(
        &self,
        ctx: &ActorContext,
        state: &mut PlayerState,
        to: i64,
    ) -> Result<(), ActorError> {
        let me = Occupant {
            id: player_uuid(&ctx.id)?,
            name: state.name.clone(),
        };
        ctx.actor_ref::<RoomRef>(ActorId::room(to))
            .add_occupant(&me)
            .await?;
        if let Some(from) = state.room.filter(|r| *r != to) {
            ctx.actor_ref::<RoomRef>(ActorId::room(from))
                .remove_occupant(me.id)
                .await?;
        }
        state.room = Some(to);
        Ok(())
    }

    async fn walk(
        &self,
        ctx: &ActorContext,
        state: &mut PlayerState,
        direction: Direction,
    ) -> Result<RoomInfo, ActorError> {
        let from = current_room(state)?;
        let exits = ctx.actor_ref::<RoomRef>(ActorId::room(from)).exits().await?;
        let to = *exits
            .get(&direction)
            .ok_or_else(|| ActorError::handler(format!("there is no exit {direction}")))?;
        self.enter(ctx, state, to).await?;
        ctx.actor_ref::<RoomRef>(ActorId::room(to)).describe().await
    }

    async fn take(
        &self,
        ctx: &ActorContext,
        state: &mut PlayerState,
        thing: &str,
    ) -> Result<(), ActorError> {
        let room: RoomRef = ctx.actor_ref(ActorId::room(current_room(state)?));
        if !room.take_thing(thing).await? {
            return Err(ActorError::handler(format!("there is no {thing} here")));
        }
        state.inventory.insert(thing.to_string());
        Ok(())
    }

    async fn drop_thing(
        &self,
        ctx: &ActorContext,
        state: &mut PlayerState,
        thing: &str,
    ) -> Result<(), ActorError> {
        let room: RoomRef = ctx.actor_ref(ActorId::room(current_room(state)?));
        if !state.inventory.remove(thing) {
            return Err(ActorError::handler(format!("you are not carrying {thing}")));
        }
        room.add_thing(thing).await
    }

    /// Leave the room, scatter the inventory on its floor and retire.
    async fn die(&self, ctx: &ActorContext, state: &mut PlayerState) -> Result<(), ActorError> {
        if let Some(room) = state.room {
            let room: RoomRef = ctx.actor_ref(ActorId::room(room));
            room.remove_occupant(player_uuid(&ctx.id)?).await?;
            for thing in &state.inventory {
                room.add_thing(thing).await?;
            }
        }
        state.inventory.clear();
        state.room = None;
        state.health = 0;
        state.alive = false;
        tracing::info!(player = %ctx.id, name = %state.name, "player died");
        ctx.deactivate_on_completion();
        Ok(())
    }

    async fn apply_damage(
        &self,
        ctx: &ActorContext,
        state: &mut PlayerState,
        damage: u32,
    ) -> Result<PlayerStatus, ActorError> {
        state.health = state.health.saturating_sub(damage);
        if state.health == 0 {
            self.die(ctx, state).await?;
        }
        Ok(PlayerStatus {
            health: state.health,
            alive: state.alive,
        })
    }

    async fn kill(
        &mut self,
        ctx: &ActorContext,
        state: &PlayerState,
        target: &str,
    ) -> Result<String, ActorError> {
        let room: RoomRef = ctx.actor_ref(ActorId::room(current_room(state)?));
        let info = room.describe().await?;
        let Some(presence) = info
            .monsters
            .iter()
            .find(|m| m.name.eq_ignore_ascii_case(target))
        else {
            return Ok(format!("There is no {target} here."));
        };

        let damage = self.combat.damage(PLAYER_STRENGTH);
        let monster: MonsterRef = ctx.actor_ref(ActorId::monster(presence.id));
        match monster.apply_damage(damage).await {
            Ok(status) if status.alive => Ok(format!(
                "You hit the {} for {damage} damage.",
                presence.name
            )),
            Ok(_) => Ok(format!("You killed the {}.", presence.name)),
            Err(ActorError::Gone(_)) => Ok(format!("The {} is already dead.", presence.name)),
            Err(e) => Err(e),
        }
    }

    async fn play(
        &mut self,
        ctx: &ActorContext,
        state: &mut PlayerState,
        input: &str,
    ) -> Result<String, ActorError> {
        let me = player_uuid(&ctx.id)?;
        match self.commands.parse(input) {
            Command::Look => {
                let room: RoomRef = ctx.actor_ref(ActorId::room(current_room(state)?));
                Ok(room.describe().await?.render(Some(me)))
            }
            Command::Go(direction) => match self.walk(ctx, state, direction).await {
                Ok(info) => Ok(info.render(Some(me))),
                Err(ActorError::HandlerError(reason)) => Ok(capitalize(&reason)),
                Err(e) => Err(e),
            },
            Command::Take(thing) => match self.take(ctx, state, &thing).await {
                Ok(()) => Ok("Taken.".to_string()),
                Err(ActorError::HandlerError(reason)) => Ok(capitalize(&reason)),
                Err(e) => Err(e),
            },
            Command::Drop(thing) => match self.drop_thing(ctx, state, &thing).await {
                Ok(()) => Ok("Dropped.".to_string()),
                Err(ActorError::HandlerError(reason)) => Ok(capitalize(&reason)),
                Err(e) => Err(e),
            },
            Command::Inventory => {
                if state.inventory.is_empty() {
                    Ok("You are empty-handed.".to_string())
                } else {
                    let things: Vec<&str> = state.inventory.iter().map(String::as_str).collect();
                    Ok(format!("You are carrying: {}.", things.join(", ")))
                }
            }
            Command::Kill(target) => self.kill(ctx, state, &target).await,
            Command::End => Ok("Goodbye.".to_string()),
            Command::Unknown(_) => Ok("I don't know what you mean.".to_string()),
        }
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => format!("{}{}.", first.to_uppercase(), chars.as_str()),
        None => String::new(),
    }
}

#[async_trait(?Send)]
impl ActorHandler for PlayerActor {
    type State = PlayerState;

    fn actor_kind() -> ActorKind {
        ActorKind::Player
    }

    fn is_read_only(method: u32) -> bool {
        matches!(method, player_methods::NAME | player_methods::DESCRIBE)
    }

    fn is_tombstoned(state: &PlayerState) -> bool {
        !state.alive
    }

    async fn dispatch(
        &mut self,
        ctx: &ActorContext,
        state: &mut PlayerState,
        method: u32,
        body: &[u8],
    ) -> Result<Vec<u8>, ActorError> {
        match method {
            player_methods::SET_NAME => {
                let name: String = JsonCodec.decode(body)?;
                if name.trim().is_empty() {
                    return Err(ActorError::handler("a player needs a name"));
                }
                state.name = name;
                Ok(JsonCodec.encode(&())?)
            }
            player_methods::NAME => Ok(JsonCodec.encode(&state.name)?),
            player_methods::SET_ROOM => {
                let room: i64 = JsonCodec.decode(body)?;
                self.enter(ctx, state, room).await?;
                Ok(JsonCodec.encode(&())?)
            }
            player_methods::MOVE => {
                let direction: Direction = JsonCodec.decode(body)?;
                let info = self.walk(ctx, state, direction).await?;
                Ok(JsonCodec.encode(&info)?)
            }
            player_methods::APPLY_DAMAGE => {
                let damage: u32 = JsonCodec.decode(body)?;
                let status = self.apply_damage(ctx, state, damage).await?;
                Ok(JsonCodec.encode(&status)?)
            }
            player_methods::DIE => {
                self.die(ctx, state).await?;
                Ok(JsonCodec.encode(&())?)
            }
            player_methods::DESCRIBE => {
                let info = PlayerInfo {
                    id: player_uuid(&ctx.id)?,
                    name: state.name.clone(),
                    room: state.room,
                    health: state.health,
                    inventory: state.inventory.iter().cloned().collect(),
                };
                Ok(JsonCodec.encode(&info)?)
            }
            player_methods::TAKE => {
                let thing: String = JsonCodec.decode(body)?;
                self.take(ctx, state, &thing).await?;
                Ok(JsonCodec.encode(&())?)
            }
            player_methods::DROP => {
                let thing: String = JsonCodec.decode(body)?;
                self.drop_thing(ctx, state, &thing).await?;
                Ok(JsonCodec.encode(&())?)
            }
            player_methods::PLAY => {
                let input: String = JsonCodec.decode(body)?;
                let output = self.play(ctx, state, &input).await?;
                Ok(JsonCodec.encode(&output)?)
            }
            _ => Err(ActorError::UnknownMethod(method)),
        }
    }
}

/// Typed reference to a player actor.
#[derive(Debug, Clone)]
pub struct PlayerRef {
    handle: ActorHandle,
}

impl ActorRef for PlayerRef {
    fn from_router(id: ActorId, router: &Rc<ActorRouter>, sender: Option<ActorId>) -> Self {
        Self {
            handle: ActorHandle::new(id, router, sender),
        }
    }
}

impl PlayerRef {
    /// Player identity.
    pub fn id(&self) -> &ActorId {
        self.handle.id()
    }

    /// Set the display name.
    pub async fn set_name(&self, name: &str) -> Result<(), ActorError> {
        self.handle.call(player_methods::SET_NAME, &name).await
    }

    /// Display name.
    pub async fn name(&self) -> Result<String, ActorError> {
        self.handle.call(player_methods::NAME, &()).await
    }

    /// Put the player in `room`.
    pub async fn set_room(&self, room: i64) -> Result<(), ActorError> {
        self.handle.call(player_methods::SET_ROOM, &room).await
    }

    /// Walk through an exit; replies with the new room.
    pub async fn move_to(&self, direction: Direction) -> Result<RoomInfo, ActorError> {
        self.handle.call(player_methods::MOVE, &direction).await
    }

    /// Deal damage to the player.
    pub async fn apply_damage(&self, damage: u32) -> Result<PlayerStatus, ActorError> {
        self.handle.call(player_methods::APPLY_DAMAGE, &damage).await
    }

    /// Kill the player.
    pub async fn die(&self) -> Result<(), ActorError> {
        self.handle.call(player_methods::DIE, &()).await
    }

    /// Current status.
    pub async fn describe(&self) -> Result<PlayerInfo, ActorError> {
        self.handle.call(player_methods::DESCRIBE, &()).await
    }

    /// Pick up a thing from the current room.
    pub async fn take(&self, thing: &str) -> Result<(), ActorError> {
        self.handle.call(player_methods::TAKE, &thing).await
    }

    /// Put down a carried thing.
    pub async fn drop_thing(&self, thing: &str) -> Result<(), ActorError> {
        self.handle.call(player_methods::DROP, &thing).await
    }

    /// Run a line of player input and reply with the text to show.
    pub async fn play(&self, input: &str) -> Result<String, ActorError> {
        self.handle.call(player_methods::PLAY, &input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NetworkAddress;
    use crate::actors::{AdventureNode, ClusterConfig, InMemoryStateStore, NodeConfig};
    use crate::game::{FixedCombat, MonsterActor, RoomActor, seed_world, world};

    async fn game_node(store: Rc<InMemoryStateStore>) -> AdventureNode {
        let cluster = ClusterConfig::builder()
            .cluster_id("test")
            .service_id("players")
            .state_store(store)
            .build()
            .expect("cluster config");
        let node =
            AdventureNode::builder(cluster, NodeConfig::for_address(NetworkAddress::localhost(4720)))
                .register::<RoomActor>()
                .register_with(|| MonsterActor::with_combat(FixedCombat(5)))
                .register_with(|| PlayerActor::with_policies(FixedCombat(30), SimpleCommands))
                .start()
                .await
                .expect("node start");
        seed_world(node.router()).await.expect("seed world");
        node
    }

    async fn new_player(node: &AdventureNode, name: &str) -> PlayerRef {
        let player: PlayerRef = node.actor_ref(ActorId::player(Uuid::new_v4()));
        player.set_name(name).await.expect("set name");
        player.set_room(world::ENTRANCE).await.expect("set room");
        player
    }

    #[tokio::test(start_paused = true)]
    async fn test_move_updates_both_rooms() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let node = game_node(Rc::new(InMemoryStateStore::new())).await;
                let zara = new_player(&node, "Zara").await;

                let hall = zara.move_to(Direction::North).await.expect("move");
                assert_eq!(hall.id, world::HALL);
                assert!(hall.occupants.iter().any(|o| o.name == "Zara"));

                let entrance: RoomRef = node.actor_ref(ActorId::room(world::ENTRANCE));
                let entrance = entrance.describe().await.expect("describe");
                assert!(entrance.occupants.is_empty());
                assert_eq!(zara.describe().await.expect("describe").room, Some(world::HALL));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_move_without_exit_changes_nothing() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let node = game_node(Rc::new(InMemoryStateStore::new())).await;
                let zara = new_player(&node, "Zara").await;

                let err = zara.move_to(Direction::West).await.expect_err("no exit");
                assert!(matches!(err, ActorError::HandlerError(_)));
                assert_eq!(
                    zara.describe().await.expect("describe").room,
                    Some(world::ENTRANCE)
                );
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_and_drop() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let node = game_node(Rc::new(InMemoryStateStore::new())).await;
                let zara = new_player(&node, "Zara").await;

                zara.take("lamp").await.expect("take lamp");
                assert!(zara.take("lamp").await.is_err());
                assert_eq!(zara.describe().await.expect("describe").inventory, vec![
                    "lamp".to_string()
                ]);

                zara.drop_thing("lamp").await.expect("drop");
                let entrance: RoomRef = node.actor_ref(ActorId::room(world::ENTRANCE));
                let info = entrance.describe().await.expect("describe");
                assert!(info.things.contains(&"lamp".to_string()));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_death_tombstones_player() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let node = game_node(Rc::new(InMemoryStateStore::new())).await;
                let zara = new_player(&node, "Zara").await;
                zara.take("lamp").await.expect("take lamp");

                let status = zara.apply_damage(150).await.expect("damage");
                assert_eq!(status, PlayerStatus { health: 0, alive: false });

                let err = zara.describe().await.expect_err("dead");
                assert!(matches!(err, ActorError::Gone(_)));
                let err = zara.name().await.expect_err("dead");
                assert!(matches!(err, ActorError::Gone(_)));

                let entrance: RoomRef = node.actor_ref(ActorId::room(world::ENTRANCE));
                let info = entrance.describe().await.expect("describe");
                assert!(info.occupants.is_empty());
                assert!(info.things.contains(&"lamp".to_string()));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_commands() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let node = game_node(Rc::new(InMemoryStateStore::new())).await;
                let zara = new_player(&node, "Zara").await;

                let look = zara.play("look").await.expect("look");
                assert!(look.starts_with("Entrance"));
                assert_eq!(zara.play("take lamp").await.expect("take"), "Taken.");
                assert_eq!(
                    zara.play("inventory").await.expect("inventory"),
                    "You are carrying: lamp."
                );
                assert_eq!(
                    zara.play("west").await.expect("west"),
                    "There is no exit west."
                );
                assert!(zara.play("n").await.expect("north").starts_with("Hall"));
                assert_eq!(
                    zara.play("dance").await.expect("dance"),
                    "I don't know what you mean."
                );
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_fight_monster_until_it_dies() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let node = game_node(Rc::new(InMemoryStateStore::new())).await;
                let zara = new_player(&node, "Zara").await;
                zara.play("north").await.expect("north");
                zara.play("down").await.expect("down");

                assert_eq!(
                    zara.play("kill goblin").await.expect("hit"),
                    "You hit the goblin for 30 damage."
                );
                // Let the counter-attack land.
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                assert_eq!(zara.describe().await.expect("describe").health, 95);

                assert_eq!(
                    zara.play("kill goblin").await.expect("kill"),
                    "You killed the goblin."
                );
                assert_eq!(
                    zara.play("kill goblin").await.expect("again"),
                    "There is no goblin here."
                );
            })
            .await;
    }
}
