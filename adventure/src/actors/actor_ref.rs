//! Typed actor reference construction.
//!
//! [`ActorRef`] enables the `router.actor_ref::<RoomRef>(ActorId::room(0))`
//! pattern. Typed references wrap an [`ActorHandle`] and expose one async
//! method per actor method.

use std::rc::Rc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::runtime::{ActorError, ActorRouter};
use super::types::ActorId;

/// Trait for constructing typed actor references from a router.
pub trait ActorRef: Sized {
    /// Create a reference to `id`, sending as `sender` (an actor) or as an
    /// external caller when `None`.
    fn from_router(id: ActorId, router: &Rc<ActorRouter>, sender: Option<ActorId>) -> Self;
}

/// Untyped reference: identity, router, and calling actor.
#[derive(Debug, Clone)]
pub struct ActorHandle {
    id: ActorId,
    router: Rc<ActorRouter>,
    sender: Option<ActorId>,
}

impl ActorHandle {
    /// Create a handle.
    pub fn new(id: ActorId, router: &Rc<ActorRouter>, sender: Option<ActorId>) -> Self {
        Self {
            id,
            router: router.clone(),
            sender,
        }
    }

    /// Target identity.
    pub fn id(&self) -> &ActorId {
        &self.id
    }

    /// Call `method` and wait for the reply.
    pub async fn call<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        method: u32,
        req: &Req,
    ) -> Result<Resp, ActorError> {
        self.router
            .send_from(self.sender.as_ref(), &self.id, method, req)
            .await
    }

    /// Call `method`, giving up after `timeout`.
    pub async fn call_with_timeout<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        method: u32,
        req: &Req,
        timeout: Duration,
    ) -> Result<Resp, ActorError> {
        tokio::time::timeout(timeout, self.call(method, req))
            .await
            .map_err(|_| ActorError::Timeout(self.id.clone()))?
    }

    /// Send `method` without waiting for a reply.
    pub fn tell<Req: Serialize>(&self, method: u32, req: &Req) -> Result<(), ActorError> {
        self.router
            .tell(self.sender.as_ref(), &self.id, method, req)
    }
}
