//! Player-facing entry point.
//!
//! [`PlayerService`] is what an HTTP front end would call for
//! `POST /players` and `GET /players/{id}`. It speaks to player actors
//! through typed references only, so it runs on any node.

use std::rc::Rc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::actors::{ActorError, ActorId, ActorRouter};
use crate::game::{PlayerInfo, PlayerRef, world};

/// Errors returned by [`PlayerService`].
#[derive(Debug, thiserror::Error)]
pub enum FrontDoorError {
    /// The requested name is empty.
    #[error("player name must not be empty")]
    InvalidName,

    /// The actor runtime could not complete the request.
    #[error(transparent)]
    Actor(#[from] ActorError),
}

/// A player as shown to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerDto {
    /// Player identity.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Current room.
    pub room: Option<i64>,
    /// Remaining health.
    pub health: u32,
}

impl From<PlayerInfo> for PlayerDto {
    fn from(info: PlayerInfo) -> Self {
        Self {
            id: info.id,
            name: info.name,
            room: info.room,
            health: info.health,
        }
    }
}

/// Creates and looks up players.
#[derive(Debug, Clone)]
pub struct PlayerService {
    router: Rc<ActorRouter>,
}

impl PlayerService {
    /// Service spawning new players in the entrance.
    pub fn new(router: Rc<ActorRouter>) -> Self {
        Self { router }
    }

    /// Reference to a player by id.
    pub fn player(&self, id: Uuid) -> PlayerRef {
        self.router.actor_ref(ActorId::player(id))
    }

    /// Create a player with a fresh identity and put it in the entrance.
    pub async fn create_player(&self, name: &str) -> Result<PlayerDto, FrontDoorError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(FrontDoorError::InvalidName);
        }

        let id = Uuid::new_v4();
        let player = self.player(id);
        player.set_name(name).await?;
        player.set_room(world::ENTRANCE).await?;
        tracing::info!(player = %id, name, "player created");

        Ok(player.describe().await?.into())
    }

    /// Look a player up. `None` for players that were never created or
    /// have died.
    pub async fn get_player(&self, id: Uuid) -> Result<Option<PlayerDto>, FrontDoorError> {
        match self.player(id).describe().await {
            Ok(info) if info.name.is_empty() => Ok(None),
            Ok(info) => Ok(Some(info.into())),
            Err(ActorError::Gone(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Run one line of input for a player.
    pub async fn play(&self, id: Uuid, command: &str) -> Result<String, FrontDoorError> {
        Ok(self.player(id).play(command).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NetworkAddress;
    use crate::actors::{AdventureNode, ClusterConfig, InMemoryStateStore, NodeConfig};
    use crate::game::{MonsterActor, PlayerActor, RoomActor, seed_world};

    async fn service() -> (AdventureNode, PlayerService) {
        let cluster = ClusterConfig::builder()
            .cluster_id("test")
            .service_id("front-door")
            .state_store(Rc::new(InMemoryStateStore::new()))
            .build()
            .expect("cluster config");
        let node =
            AdventureNode::builder(cluster, NodeConfig::for_address(NetworkAddress::localhost(4740)))
                .register::<PlayerActor>()
                .register::<RoomActor>()
                .register::<MonsterActor>()
                .start()
                .await
                .expect("node start");
        seed_world(node.router()).await.expect("seed");
        let service = PlayerService::new(node.router().clone());
        (node, service)
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_then_get_player() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let (_node, service) = service().await;

                let created = service.create_player("Zara").await.expect("create");
                assert_eq!(created.name, "Zara");
                assert_eq!(created.room, Some(world::ENTRANCE));
                assert_eq!(created.health, 100);

                let fetched = service.get_player(created.id).await.expect("get");
                assert_eq!(fetched, Some(created));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_and_dead_players_are_absent() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let (_node, service) = service().await;

                let missing = service.get_player(Uuid::new_v4()).await.expect("get");
                assert_eq!(missing, None);

                let created = service.create_player("Zara").await.expect("create");
                service.player(created.id).die().await.expect("die");
                assert_eq!(service.get_player(created.id).await.expect("get"), None);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_name_rejected() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let (_node, service) = service().await;
                let err = service.create_player("   ").await.expect_err("blank");
                assert!(matches!(err, FrontDoorError::InvalidName));
            })
            .await;
    }
}
