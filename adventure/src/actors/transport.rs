//! Inter-node transport.
//!
//! A [`Transport`] delivers one [`ActorMessage`] to the host at a node
//! address and returns its single [`ActorResponse`]. The router uses it for
//! every send; hosts use it to forward mis-routed messages.
//!
//! [`InProcessNetwork`] connects the hosts of one process. It can cut links
//! between nodes to simulate partitions and crashed processes.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::NetworkAddress;

use super::runtime::ActorHost;
use super::types::{ActorMessage, ActorResponse};

/// Errors from transport operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Nothing is listening at the address.
    #[error("node unreachable: {0}")]
    Unreachable(NetworkAddress),
    /// The link between the two nodes is cut.
    #[error("link {from} -> {to} is partitioned")]
    Partitioned {
        /// Sending node.
        from: NetworkAddress,
        /// Receiving node.
        to: NetworkAddress,
    },
}

/// Identity-addressed request/response delivery between nodes.
#[async_trait::async_trait(?Send)]
pub trait Transport: fmt::Debug {
    /// Deliver `message` to the host at `to` and wait for its reply.
    async fn send(
        &self,
        to: &NetworkAddress,
        message: ActorMessage,
    ) -> Result<ActorResponse, TransportError>;
}

/// Registry of the hosts running in this process.
#[derive(Default)]
pub struct InProcessNetwork {
    hosts: RefCell<HashMap<NetworkAddress, Weak<ActorHost>>>,
    partitions: RefCell<HashSet<(NetworkAddress, NetworkAddress)>>,
}

impl fmt::Debug for InProcessNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InProcessNetwork")
            .field("hosts", &self.hosts.borrow().keys().collect::<Vec<_>>())
            .field("partitions", &self.partitions.borrow().len())
            .finish()
    }
}

impl InProcessNetwork {
    /// Create an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `host` reachable at `address`.
    pub fn bind(&self, address: NetworkAddress, host: &Rc<ActorHost>) {
        self.hosts
            .borrow_mut()
            .insert(address, Rc::downgrade(host));
    }

    /// Stop delivering to `address`.
    pub fn unbind(&self, address: &NetworkAddress) {
        self.hosts.borrow_mut().remove(address);
    }

    /// Whether a live host is bound at `address`.
    pub fn is_bound(&self, address: &NetworkAddress) -> bool {
        self.hosts
            .borrow()
            .get(address)
            .is_some_and(|host| host.strong_count() > 0)
    }

    /// Cut the link between two nodes, both directions.
    pub fn partition(&self, a: &NetworkAddress, b: &NetworkAddress) {
        let mut partitions = self.partitions.borrow_mut();
        partitions.insert((a.clone(), b.clone()));
        partitions.insert((b.clone(), a.clone()));
    }

    /// Restore the link between two nodes.
    pub fn heal(&self, a: &NetworkAddress, b: &NetworkAddress) {
        let mut partitions = self.partitions.borrow_mut();
        partitions.remove(&(a.clone(), b.clone()));
        partitions.remove(&(b.clone(), a.clone()));
    }

    /// A transport sending from `local` over this network.
    pub fn transport(self: &Rc<Self>, local: NetworkAddress) -> InProcessTransport {
        InProcessTransport {
            network: self.clone(),
            local,
        }
    }

    fn host(&self, address: &NetworkAddress) -> Option<Rc<ActorHost>> {
        self.hosts.borrow().get(address).and_then(Weak::upgrade)
    }
}

/// One node's sending side of an [`InProcessNetwork`].
#[derive(Debug, Clone)]
pub struct InProcessTransport {
    network: Rc<InProcessNetwork>,
    local: NetworkAddress,
}

#[async_trait::async_trait(?Send)]
impl Transport for InProcessTransport {
    async fn send(
        &self,
        to: &NetworkAddress,
        message: ActorMessage,
    ) -> Result<ActorResponse, TransportError> {
        if self
            .network
            .partitions
            .borrow()
            .contains(&(self.local.clone(), to.clone()))
        {
            return Err(TransportError::Partitioned {
                from: self.local.clone(),
                to: to.clone(),
            });
        }

        let host = self
            .network
            .host(to)
            .ok_or_else(|| TransportError::Unreachable(to.clone()))?;
        Ok(host.receive(message).await)
    }
}
