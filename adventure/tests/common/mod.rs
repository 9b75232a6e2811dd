//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::future::Future;

use adventure::NetworkAddress;
use adventure::actors::{ActorId, AdventureNode, ClusterConfig, NodeConfig};
use adventure::game::{FixedCombat, MonsterActor, PlayerActor, RoomActor, SimpleCommands};

/// Run a test body on a `LocalSet`, as every node requires.
pub async fn local<F: Future>(body: F) -> F::Output {
    tokio::task::LocalSet::new().run_until(body).await
}

/// A cluster with fresh in-memory backends.
pub fn cluster(service: &str) -> ClusterConfig {
    ClusterConfig::builder()
        .cluster_id("integration")
        .service_id(service)
        .build()
        .expect("cluster config")
}

/// Start a node hosting every game actor, with deterministic combat.
pub async fn start_node(cluster: &ClusterConfig, port: u16) -> AdventureNode {
    AdventureNode::builder(
        cluster.clone(),
        NodeConfig::for_address(NetworkAddress::localhost(port)),
    )
    .register_with(|| PlayerActor::with_policies(FixedCombat(30), SimpleCommands))
    .register::<RoomActor>()
    .register_with(|| MonsterActor::with_combat(FixedCombat(5)))
    .start()
    .await
    .expect("start node")
}

/// Wait until every node sees `expected` members.
pub async fn settle(nodes: &[&AdventureNode], expected: usize) {
    for _ in 0..50 {
        if nodes
            .iter()
            .all(|n| n.membership().current_view().len() == expected)
        {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    panic!("membership did not settle on {expected} nodes");
}

/// First room id in `0..` that `node`'s placement puts on `owner`.
pub fn room_owned_by(node: &AdventureNode, owner: &NetworkAddress) -> ActorId {
    (0..1000)
        .map(ActorId::room)
        .find(|id| node.router().resolve(id).ok().as_ref() == Some(owner))
        .expect("some room lands on the owner")
}
