//! Node death and departure: actors move to the survivors with their state.

mod common;

use std::time::Duration;

use adventure::actors::{ActorDirectory, MembershipTable, NodeLifecycle, NodeStatus};
use adventure::game::RoomRef;

use common::{cluster, local, room_owned_by, settle, start_node};

#[tokio::test(start_paused = true)]
async fn test_actor_moves_after_owner_dies() {
    local(async {
        let cluster = cluster("failover");
        let a = start_node(&cluster, 5200).await;
        let b = start_node(&cluster, 5201).await;
        settle(&[&a, &b], 2).await;

        let id = room_owned_by(&b, a.address());
        let room: RoomRef = b.actor_ref(id.clone());
        room.configure("Vault", "Cold and quiet.").await.expect("configure");
        room.add_thing("gold").await.expect("add");
        assert!(a.host().is_active(&id));
        let before = a.host().incarnation_of(&id).expect("active on a");

        a.crash();

        // Three missed heartbeats, then two suspicions a full interval apart.
        let heartbeat = b.config().membership().heartbeat_interval;
        tokio::time::sleep(heartbeat * 6).await;

        let row = cluster
            .membership()
            .read_entry(a.address())
            .await
            .expect("read")
            .expect("row");
        assert_eq!(row.entry.status, NodeStatus::Dead);
        assert_eq!(b.membership().current_view().len(), 1);

        let info = room.describe().await.expect("describe on survivor");
        assert_eq!(info.name, "Vault");
        assert_eq!(info.things, vec!["gold".to_string()]);
        assert!(b.host().is_active(&id));
        assert!(b.host().incarnation_of(&id).expect("active on b") > before);

        let owner = cluster.directory().lookup(&id).await.expect("lookup").expect("entry");
        assert_eq!(&owner.node, b.address());
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_actor_moves_after_graceful_shutdown() {
    local(async {
        let cluster = cluster("handoff");
        let a = start_node(&cluster, 5210).await;
        let b = start_node(&cluster, 5211).await;
        settle(&[&a, &b], 2).await;

        let id = room_owned_by(&b, a.address());
        let room: RoomRef = b.actor_ref(id.clone());
        room.add_thing("scroll").await.expect("add");

        a.shutdown().await.expect("shutdown");
        assert_eq!(a.status(), NodeLifecycle::Stopped);
        settle(&[&b], 1).await;

        let info = room.describe().await.expect("describe after handoff");
        assert_eq!(info.things, vec!["scroll".to_string()]);
        assert!(b.host().is_active(&id));
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_peer_reroutes_as_soon_as_owner_leaves() {
    local(async {
        let cluster = cluster("prompt-handoff");
        let a = start_node(&cluster, 5230).await;
        let b = start_node(&cluster, 5231).await;
        settle(&[&a, &b], 2).await;

        let id = room_owned_by(&b, a.address());
        let room: RoomRef = b.actor_ref(id.clone());
        room.add_thing("lantern").await.expect("add");
        assert!(a.host().is_active(&id));

        a.shutdown().await.expect("shutdown");

        // Well inside one heartbeat, before b would notice on its own.
        let started = tokio::time::Instant::now();
        let info = room.describe().await.expect("describe right after shutdown");
        assert!(started.elapsed() < b.config().membership().heartbeat_interval);
        assert_eq!(info.things, vec!["lantern".to_string()]);
        assert!(b.host().is_active(&id));
        assert_eq!(b.membership().current_view().len(), 1);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_dead_node_entries_leave_the_directory() {
    local(async {
        let cluster = cluster("cleanup");
        let a = start_node(&cluster, 5220).await;
        let b = start_node(&cluster, 5221).await;
        settle(&[&a, &b], 2).await;

        let id = room_owned_by(&b, a.address());
        let room: RoomRef = b.actor_ref(id.clone());
        room.add_thing("bone").await.expect("add");
        assert!(cluster.directory().lookup(&id).await.expect("lookup").is_some());

        a.crash();
        tokio::time::sleep(Duration::from_secs(6)).await;
        // Give the spawned cleanup a turn.
        tokio::task::yield_now().await;

        assert!(cluster.directory().lookup(&id).await.expect("lookup").is_none());
    })
    .await;
}
