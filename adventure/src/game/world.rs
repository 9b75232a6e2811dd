//! The starting world.
//!
//! Seeding only sends idempotent configuration messages, so it is safe to
//! run every time a cluster starts: the rooms converge to the same layout
//! and the goblin respawns at full health.

use std::rc::Rc;

use crate::actors::{ActorError, ActorId, ActorRouter};

use super::Direction;
use super::monster::{MonsterRef, MonsterSetup};
use super::room::RoomRef;

/// Where new players appear.
pub const ENTRANCE: i64 = 0;
/// The room north of the entrance.
pub const HALL: i64 = 1;
/// The room below the hall.
pub const CELLAR: i64 = 2;
/// The goblin living in the cellar.
pub const GOBLIN: i64 = 1;

struct RoomSeed {
    id: i64,
    name: &'static str,
    description: &'static str,
    exits: &'static [(Direction, i64)],
    things: &'static [&'static str],
}

const ROOMS: &[RoomSeed] = &[
    RoomSeed {
        id: ENTRANCE,
        name: "Entrance",
        description: "You stand at the mouth of an old keep. A draft blows from the north.",
        exits: &[(Direction::North, HALL)],
        things: &["lamp"],
    },
    RoomSeed {
        id: HALL,
        name: "Hall",
        description: "A long hall with faded banners. Stairs lead down into darkness.",
        exits: &[(Direction::South, ENTRANCE), (Direction::Down, CELLAR)],
        things: &[],
    },
    RoomSeed {
        id: CELLAR,
        name: "Cellar",
        description: "Damp stone walls and the smell of old wine.",
        exits: &[(Direction::Up, HALL)],
        things: &["key"],
    },
];

/// Configure every room, exit, thing and monster of the starting world.
pub async fn seed_world(router: &Rc<ActorRouter>) -> Result<(), ActorError> {
    for seed in ROOMS {
        let room: RoomRef = router.actor_ref(ActorId::room(seed.id));
        room.configure(seed.name, seed.description).await?;
        for (direction, target) in seed.exits {
            room.set_exit(*direction, *target).await?;
        }
        for thing in seed.things {
            room.add_thing(thing).await?;
        }
    }

    let goblin: MonsterRef = router.actor_ref(ActorId::monster(GOBLIN));
    let setup = MonsterSetup {
        name: "goblin".to_string(),
        kind: "goblin".to_string(),
        health: 50,
        aggression: 5,
        room: CELLAR,
    };
    match goblin.configure(&setup).await {
        Ok(()) => {}
        // A goblin killed in an earlier session stays dead.
        Err(ActorError::Gone(_)) => {}
        Err(e) => return Err(e),
    }

    tracing::info!(rooms = ROOMS.len(), "world seeded");
    Ok(())
}
