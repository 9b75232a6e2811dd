//! Runtime guarantees observed through the game actors.

mod common;

use std::rc::Rc;
use std::time::Duration;

use adventure::actors::{
    ActorDirectory, ActorError, ActorId, ActorStateError, ActorStateStore, InMemoryStateStore,
    PersistentState,
};
use adventure::game::{Direction, Occupant, PlayerRef, RoomRef, room_methods, seed_world, world};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use common::{cluster, local, room_owned_by, settle, start_node};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Ledger {
    entries: Vec<String>,
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_writers_from_two_nodes_are_serialized() {
    local(async {
        let cluster = cluster("single-writer");
        let a = start_node(&cluster, 5100).await;
        let b = start_node(&cluster, 5101).await;
        settle(&[&a, &b], 2).await;

        let id = ActorId::room(7);
        let mut calls = Vec::new();
        for n in 0..20 {
            let node = if n % 2 == 0 { &a } else { &b };
            let router = node.router().clone();
            let id = id.clone();
            calls.push(tokio::task::spawn_local(async move {
                let room: RoomRef = router.actor_ref(id);
                room.add_thing(&format!("coin {n}")).await
            }));
        }
        for call in calls {
            call.await.expect("join").expect("add thing");
        }

        let room: RoomRef = a.actor_ref(id.clone());
        assert_eq!(room.describe().await.expect("describe").things.len(), 20);
        assert_eq!(a.host().activation_count() + b.host().activation_count(), 1);
    })
    .await;
}

#[tokio::test]
async fn test_persistence_round_trip() {
    let store: Rc<dyn ActorStateStore> = Rc::new(InMemoryStateStore::new());
    let id = ActorId::room(1);

    let mut first = PersistentState::<Ledger>::load(store.clone(), &id, None)
        .await
        .expect("load");
    first.state_mut().entries.push("opened".into());
    first.write_state().await.expect("write");

    let mut second = PersistentState::<Ledger>::load(store.clone(), &id, None)
        .await
        .expect("reload");
    assert_eq!(second.state(), first.state());
    assert_eq!(second.version(), first.version());

    // The loaded version is accepted by the next write.
    second.state_mut().entries.push("closed".into());
    second.write_state().await.expect("write with loaded version");
}

#[tokio::test]
async fn test_stale_writers_conflict() {
    let store: Rc<dyn ActorStateStore> = Rc::new(InMemoryStateStore::new());
    let id = ActorId::room(2);

    let mut left = PersistentState::<Ledger>::load(store.clone(), &id, None)
        .await
        .expect("load");
    let mut right = PersistentState::<Ledger>::load(store.clone(), &id, None)
        .await
        .expect("load");

    left.state_mut().entries.push("left".into());
    right.state_mut().entries.push("right".into());
    left.write_state().await.expect("first write wins");
    let err = right.write_state().await.expect_err("second write loses");
    assert!(matches!(err, ActorStateError::VersionConflict { .. }));

    let winner = PersistentState::<Ledger>::load(store, &id, None)
        .await
        .expect("reload");
    assert_eq!(winner.state().entries, vec!["left".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_occupancy_is_idempotent_across_nodes() {
    local(async {
        let cluster = cluster("occupancy");
        let a = start_node(&cluster, 5110).await;
        let b = start_node(&cluster, 5111).await;
        settle(&[&a, &b], 2).await;

        let zara = Occupant {
            id: Uuid::new_v4(),
            name: "Zara".into(),
        };
        let via_a: RoomRef = a.actor_ref(ActorId::room(0));
        let via_b: RoomRef = b.actor_ref(ActorId::room(0));
        via_a.add_occupant(&zara).await.expect("add");
        via_b.add_occupant(&zara).await.expect("add again");

        let occupants = via_a.describe().await.expect("describe").occupants;
        assert_eq!(occupants, vec![zara]);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_reactivation_restores_last_persisted_state() {
    local(async {
        let cluster = cluster("reactivation");
        let node = start_node(&cluster, 5120).await;
        seed_world(node.router()).await.expect("seed");

        let zara: PlayerRef = node.actor_ref(ActorId::player(Uuid::new_v4()));
        zara.set_name("Zara").await.expect("name");
        zara.set_room(world::ENTRANCE).await.expect("room");
        zara.move_to(Direction::North).await.expect("move");
        let first = node.host().incarnation_of(zara.id()).expect("active");

        assert!(node.host().deactivate(zara.id()).await);
        assert!(!node.host().is_active(zara.id()));

        let info = zara.describe().await.expect("describe");
        assert_eq!(info.name, "Zara");
        assert_eq!(info.room, Some(world::HALL));
        let second = node.host().incarnation_of(zara.id()).expect("reactivated");
        assert!(second > first);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_fenced_activation_steps_aside() {
    local(async {
        let cluster = cluster("fencing");
        let node = start_node(&cluster, 5130).await;
        let room: RoomRef = node.actor_ref(ActorId::room(4));
        room.add_thing("torch").await.expect("add");
        let stale = node.host().incarnation_of(room.id()).expect("active");

        // Another activation claims the identity behind the host's back.
        let usurper = cluster
            .directory()
            .register(room.id(), node.address())
            .await
            .expect("register");
        assert!(usurper.incarnation > stale);

        // The stale activation bounces, the router retries on a fresh one.
        room.add_thing("rope").await.expect("add after fencing");
        let fresh = node.host().incarnation_of(room.id()).expect("active");
        assert!(fresh > usurper.incarnation);

        let things = room.describe().await.expect("describe").things;
        assert_eq!(things, vec!["rope".to_string(), "torch".to_string()]);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_partition_surfaces_unavailable_then_heals() {
    local(async {
        let cluster = cluster("partition");
        let a = start_node(&cluster, 5140).await;
        let b = start_node(&cluster, 5141).await;
        settle(&[&a, &b], 2).await;

        let id = room_owned_by(&a, b.address());
        let room: RoomRef = a.actor_ref(id);
        room.add_thing("map").await.expect("reachable");

        cluster.network().partition(a.address(), b.address());
        let err = room.add_thing("compass").await.expect_err("partitioned");
        assert!(matches!(err, ActorError::Unavailable { .. }));

        cluster.network().heal(a.address(), b.address());
        room.add_thing("compass").await.expect("healed");
        let things = room.describe().await.expect("describe").things;
        assert_eq!(things, vec!["compass".to_string(), "map".to_string()]);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_lost_state_write_moves_to_fresh_activation() {
    local(async {
        let cluster = cluster("store-conflict");
        let node = start_node(&cluster, 5150).await;
        let room: RoomRef = node.actor_ref(ActorId::room(4));
        room.add_thing("torch").await.expect("add");
        let stale = node.host().incarnation_of(room.id()).expect("active");

        // A write the live activation never saw moves the record's version on.
        let store = cluster.state_store().clone();
        let row = store
            .read_state("room", "4")
            .await
            .expect("read")
            .expect("row");
        store
            .write_state("room", "4", row.data, Some(row.version), None)
            .await
            .expect("rewrite");

        // The stale write loses, the activation retires, the retry reloads.
        room.add_thing("rope").await.expect("add after conflict");
        let fresh = node.host().incarnation_of(room.id()).expect("reactivated");
        assert!(fresh > stale);

        let things = room.describe().await.expect("describe").things;
        assert_eq!(things, vec!["rope".to_string(), "torch".to_string()]);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_call_still_completes() {
    local(async {
        let cluster = cluster("timeout");
        let node = start_node(&cluster, 5160).await;
        let id = ActorId::room(9);

        let result: Result<(), ActorError> = node
            .router()
            .send_with_timeout(&id, room_methods::ADD_THING, &"ring", Duration::ZERO)
            .await;
        assert!(matches!(result, Err(ActorError::Timeout(timed_out)) if timed_out == id));

        let room: RoomRef = node.actor_ref(id);
        let things = room.describe().await.expect("describe").things;
        assert_eq!(things, vec!["ring".to_string()]);
    })
    .await;
}
