//! AdventureNode: unified actor runtime for a single node.
//!
//! [`AdventureNode`] ties together membership, placement, routing and actor
//! hosting into a single entry point. It creates the router and host
//! internally and manages the full lifecycle.
//!
//! # Builder API
//!
//! ```rust,ignore
//! let cluster = ClusterConfig::builder()
//!     .cluster_id("dev")
//!     .service_id("adventure")
//!     .build()?;
//!
//! let node = AdventureNode::builder(cluster, NodeConfig::for_address(addr))
//!     .register::<RoomActor>()
//!     .start()
//!     .await?;
//!
//! let room: RoomRef = node.actor_ref(ActorId::room(0));
//! let info = room.describe().await?;
//!
//! node.shutdown().await?;
//! ```
//!
//! Nodes spawn local tasks, so they must be started inside a
//! [`tokio::task::LocalSet`].
//!
//! # Lifecycle
//!
//! 1. **Joining**: host built, membership row being written
//! 2. **Active**: serving messages, heartbeating, sweeping idle actors
//! 3. **Stopping**: actors deactivated, membership row marked dead
//! 4. **Stopped**: unreachable

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tokio::task::JoinHandle;

use crate::NetworkAddress;
use crate::actors::{
    ActorHandler, ActorHost, ActorId, ActorRef, ActorRouter, ConsistentHashPlacement,
    DeactivationReason, MembershipAgent, MembershipError, PlacementDirector, Transport,
};

use super::cluster::ClusterConfig;
use super::config::NodeConfig;

/// Type alias for a registration closure that sets up an actor kind.
type RegistrationFn = Box<dyn FnOnce(&ActorHost)>;

/// Lifecycle state of an [`AdventureNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeLifecycle {
    /// Joining the cluster.
    Joining,
    /// Serving requests and processing actor messages.
    Active,
    /// Declared dead by the cluster; no longer serving.
    Evicted,
    /// Shutting down: deactivating actors, leaving membership.
    Stopping,
    /// Stopped or crashed.
    Stopped,
}

/// Unified actor runtime for a single node.
///
/// Owns the membership agent, router and host of one node. Use
/// [`AdventureNode::builder`] to start building.
pub struct AdventureNode {
    cluster: ClusterConfig,
    config: NodeConfig,
    membership: Rc<MembershipAgent>,
    router: Rc<ActorRouter>,
    host: Rc<ActorHost>,
    status: Cell<NodeLifecycle>,
    tasks: RefCell<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for AdventureNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdventureNode")
            .field("address", self.address())
            .field("status", &self.status())
            .field("host", &self.host)
            .finish()
    }
}

impl AdventureNode {
    /// Create a builder for a node in the given cluster.
    ///
    /// # Arguments
    ///
    /// * `cluster` - Shared cluster configuration (table, directory, store)
    /// * `config` - Per-node settings (address, timing, retries)
    pub fn builder(cluster: ClusterConfig, config: NodeConfig) -> AdventureNodeBuilder {
        AdventureNodeBuilder {
            cluster,
            config,
            registrations: Vec::new(),
        }
    }

    /// Get a typed actor reference by identity.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let hall: RoomRef = node.actor_ref(ActorId::room(1));
    /// hall.describe().await?;
    /// ```
    pub fn actor_ref<R: ActorRef>(&self, id: ActorId) -> R {
        self.router.actor_ref(id)
    }

    /// Get a reference to the actor router.
    pub fn router(&self) -> &Rc<ActorRouter> {
        &self.router
    }

    /// Get a reference to the actor host.
    pub fn host(&self) -> &Rc<ActorHost> {
        &self.host
    }

    /// Get a reference to the membership agent.
    pub fn membership(&self) -> &Rc<MembershipAgent> {
        &self.membership
    }

    /// This node's network address.
    pub fn address(&self) -> &NetworkAddress {
        self.config.address()
    }

    /// Current lifecycle status.
    pub fn status(&self) -> NodeLifecycle {
        match self.status.get() {
            NodeLifecycle::Active if self.membership.is_evicted() => NodeLifecycle::Evicted,
            status => status,
        }
    }

    /// The cluster configuration this node belongs to.
    pub fn cluster(&self) -> &ClusterConfig {
        &self.cluster
    }

    /// This node's configuration.
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Gracefully shut down the node.
    ///
    /// Stops accepting messages, marks the membership row dead, deactivates
    /// every actor (their state is already persisted) and unbinds from the
    /// network. The row is marked first so that a peer whose request bounces
    /// re-reads the table and places the actor on a survivor without waiting
    /// for its next probe.
    pub async fn shutdown(&self) -> Result<(), NodeError> {
        if matches!(self.status.get(), NodeLifecycle::Stopping | NodeLifecycle::Stopped) {
            return Ok(());
        }
        self.status.set(NodeLifecycle::Stopping);
        tracing::info!(node = %self.address(), "node shutting down");

        self.host.set_serving(false);
        let left = self.membership.leave().await;
        self.host
            .deactivate_all(DeactivationReason::NodeShutdown)
            .await;
        self.cluster.network().unbind(self.address());
        self.abort_tasks();
        self.status.set(NodeLifecycle::Stopped);

        match left {
            Ok(()) | Err(MembershipError::Evicted { .. }) => Ok(()),
            Err(e) => Err(NodeError::Membership(e)),
        }
    }

    /// Stop dead without any cleanup, as a killed process would.
    ///
    /// Activations vanish, the membership row keeps its last heartbeat, and
    /// directory entries stay until the cluster declares the node dead.
    pub fn crash(&self) {
        tracing::warn!(node = %self.address(), "node crashed");
        self.membership.stop();
        self.host.abort_all();
        self.cluster.network().unbind(self.address());
        self.abort_tasks();
        self.status.set(NodeLifecycle::Stopped);
    }

    fn abort_tasks(&self) {
        for task in self.tasks.borrow_mut().drain(..) {
            task.abort();
        }
    }
}

impl Drop for AdventureNode {
    fn drop(&mut self) {
        self.membership.stop();
        self.abort_tasks();
    }
}

/// Builder for [`AdventureNode`].
///
/// Collects configuration and actor registrations, then creates the node
/// during [`start()`](Self::start).
pub struct AdventureNodeBuilder {
    cluster: ClusterConfig,
    config: NodeConfig,
    registrations: Vec<RegistrationFn>,
}

impl AdventureNodeBuilder {
    /// Register an actor handler type built with `Default`.
    pub fn register<H: ActorHandler + Default>(mut self) -> Self {
        self.registrations
            .push(Box::new(|host: &ActorHost| host.register::<H>()));
        self
    }

    /// Register an actor handler type with a factory, called once per
    /// activation.
    pub fn register_with<H: ActorHandler>(mut self, factory: impl Fn() -> H + 'static) -> Self {
        self.registrations
            .push(Box::new(move |host: &ActorHost| host.register_with(factory)));
        self
    }

    /// Build and start the node.
    ///
    /// Creates the router and host, executes all actor registrations, binds
    /// the host to the network, joins membership and spawns the heartbeat
    /// and sweep loops. The node is ready to process messages after this
    /// returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the node cannot join the membership table.
    pub async fn start(self) -> Result<AdventureNode, NodeError> {
        let cluster = self.cluster;
        let config = self.config;
        let address = config.address().clone();
        let name = config.name().map(str::to_string).unwrap_or_else(|| {
            format!("{}-{}-{}", cluster.cluster_id(), cluster.service_id(), address)
        });

        let membership = Rc::new(MembershipAgent::new(
            address.clone(),
            name,
            cluster.membership().clone(),
            cluster.time().clone(),
            config.membership().clone(),
        ));
        let placement: Rc<dyn PlacementDirector> =
            Rc::new(ConsistentHashPlacement::new(config.virtual_nodes()));
        let transport: Rc<dyn Transport> = Rc::new(cluster.network().transport(address.clone()));
        let router = Rc::new(ActorRouter::new(
            transport,
            membership.clone(),
            placement,
            cluster.time().clone(),
            config.request_retry(),
        ));
        let host = Rc::new(ActorHost::new(
            router.clone(),
            cluster.directory().clone(),
            cluster.state_store().clone(),
            config.host().clone(),
        ));

        for registration in self.registrations {
            registration(&host);
        }

        let subscriber = Rc::downgrade(&host);
        membership.on_view_changed(Box::new(move |change| {
            if let Some(host) = subscriber.upgrade() {
                host.handle_view_change(change);
            }
        }));
        cluster.network().bind(address.clone(), &host);

        let view = match membership.join().await {
            Ok(view) => view,
            Err(e) => {
                cluster.network().unbind(&address);
                return Err(NodeError::Membership(e));
            }
        };
        host.set_serving(true);

        let mut tasks = Vec::new();
        tasks.push(tokio::task::spawn_local(membership.clone().run()));
        tasks.push(tokio::task::spawn_local(sweep_loop(
            Rc::downgrade(&host),
            cluster.time().clone(),
            config.sweep_interval(),
        )));

        tracing::info!(
            node = %address,
            generation = membership.generation(),
            epoch = view.epoch,
            members = view.len(),
            "node started"
        );

        Ok(AdventureNode {
            cluster,
            config,
            membership,
            router,
            host,
            status: Cell::new(NodeLifecycle::Active),
            tasks: RefCell::new(tasks),
        })
    }
}

async fn sweep_loop(
    host: std::rc::Weak<ActorHost>,
    time: Rc<dyn crate::time::TimeProvider>,
    interval: std::time::Duration,
) {
    loop {
        time.sleep(interval).await;
        let Some(host) = host.upgrade() else {
            break;
        };
        if host.is_serving() {
            host.sweep().await;
        }
    }
}

/// Errors from [`AdventureNode`] operations.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// Joining or leaving the membership table failed.
    #[error("membership error: {0}")]
    Membership(#[from] MembershipError),
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::JsonCodec;
    use crate::actors::{ActorContext, ActorError, ActorKind, NodeStatus};

    mod echo_methods {
        pub const SET: u32 = 1;
        pub const GET: u32 = 2;
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct EchoState {
        text: String,
    }

    #[derive(Default)]
    struct EchoActor;

    #[async_trait::async_trait(?Send)]
    impl ActorHandler for EchoActor {
        type State = EchoState;

        fn actor_kind() -> ActorKind {
            ActorKind::Room
        }

        fn is_read_only(method: u32) -> bool {
            method == echo_methods::GET
        }

        async fn dispatch(
            &mut self,
            _ctx: &ActorContext,
            state: &mut EchoState,
            method: u32,
            body: &[u8],
        ) -> Result<Vec<u8>, ActorError> {
            match method {
                echo_methods::SET => {
                    state.text = JsonCodec.decode(body)?;
                    Ok(JsonCodec.encode(&())?)
                }
                echo_methods::GET => Ok(JsonCodec.encode(&state.text)?),
                _ => Err(ActorError::UnknownMethod(method)),
            }
        }
    }

    fn cluster() -> ClusterConfig {
        ClusterConfig::builder()
            .cluster_id("test")
            .service_id("node")
            .build()
            .expect("build cluster")
    }

    async fn start(cluster: &ClusterConfig, port: u16) -> AdventureNode {
        AdventureNode::builder(cluster.clone(), NodeConfig::for_address(NetworkAddress::localhost(port)))
            .register::<EchoActor>()
            .start()
            .await
            .expect("start node")
    }

    #[tokio::test(start_paused = true)]
    async fn test_node_start_and_send() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let cluster = cluster();
                let node = start(&cluster, 4700).await;
                assert_eq!(node.status(), NodeLifecycle::Active);
                assert!(node.membership().current_view().contains(node.address()));

                let id = ActorId::room(1);
                let _: () = node
                    .router()
                    .send_actor_request(&id, echo_methods::SET, &"hello")
                    .await
                    .expect("set");
                let text: String = node
                    .router()
                    .send_actor_request(&id, echo_methods::GET, &())
                    .await
                    .expect("get");
                assert_eq!(text, "hello");
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_deactivates_and_leaves() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let cluster = cluster();
                let node = start(&cluster, 4701).await;
                let _: () = node
                    .router()
                    .send_actor_request(&ActorId::room(2), echo_methods::SET, &"bye")
                    .await
                    .expect("set");
                assert_eq!(node.host().activation_count(), 1);

                node.shutdown().await.expect("shutdown");
                assert_eq!(node.status(), NodeLifecycle::Stopped);
                assert_eq!(node.host().activation_count(), 0);
                assert!(!cluster.network().is_bound(node.address()));
                assert!(cluster.directory().list_all().await.expect("list").is_empty());

                let row = cluster
                    .membership()
                    .read_entry(node.address())
                    .await
                    .expect("read")
                    .expect("row");
                assert_eq!(row.entry.status, NodeStatus::Dead);

                // Idempotent.
                node.shutdown().await.expect("second shutdown");
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_nodes_share_actors() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let cluster = cluster();
                let a = start(&cluster, 4702).await;
                let b = start(&cluster, 4703).await;
                tokio::time::sleep(Duration::from_millis(1100)).await;
                assert_eq!(a.membership().current_view().len(), 2);

                for n in 0..8 {
                    let _: () = a
                        .router()
                        .send_actor_request(&ActorId::room(n), echo_methods::SET, &format!("room {n}"))
                        .await
                        .expect("set");
                }
                for n in 0..8 {
                    let text: String = b
                        .router()
                        .send_actor_request(&ActorId::room(n), echo_methods::GET, &())
                        .await
                        .expect("get");
                    assert_eq!(text, format!("room {n}"));
                }
                assert_eq!(a.host().activation_count() + b.host().activation_count(), 8);
            })
            .await;
    }
}
