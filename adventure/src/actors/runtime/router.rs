//! Actor router: caller-side resolution and request dispatch.
//!
//! The `ActorRouter` resolves `ActorId → node` through the placement cache
//! and the node's placement director, then delivers the request over the
//! [`Transport`] and decodes the reply.
//!
//! # Flow
//!
//! 1. Placement cache lookup, valid only for the current view epoch
//! 2. On a miss, the placement director picks the owner under the view
//! 3. Build `ActorMessage` with target identity, method, and serialized body
//! 4. Send to the owner and await its `ActorResponse`
//! 5. Apply any piggybacked cache invalidation
//! 6. On a retryable fault, invalidate the cache entry, refresh the view
//!    from the membership table, back off, and retry
//!
//! Retries are bounded by [`RetryPolicy`]; when they run out the caller gets
//! [`ActorError::Unavailable`].

use std::rc::Rc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::actors::{
    ActorFault, ActorId, ActorMessage, ActorRef, CacheInvalidation, MembershipAgent,
    PlacementCache, PlacementDirector, PlacementError, Transport,
};
use crate::time::TimeProvider;
use crate::{CodecError, JsonCodec, NetworkAddress};

/// Errors returned to callers of actor methods.
#[derive(Debug, thiserror::Error)]
pub enum ActorError {
    /// The actor could not be reached after every retry.
    #[error("actor {id} unavailable: {reason}")]
    Unavailable {
        /// The target actor.
        id: ActorId,
        /// The last failure seen.
        reason: String,
    },

    /// The actor is tombstoned and accepts no more messages.
    #[error("actor {0} is gone")]
    Gone(ActorId),

    /// The method discriminant is not recognized by the actor handler.
    #[error("unknown method: {0}")]
    UnknownMethod(u32),

    /// The actor handler rejected the request.
    #[error("handler error: {0}")]
    HandlerError(String),

    /// No reply within the caller's deadline.
    #[error("request to {0} timed out")]
    Timeout(ActorId),

    /// Codec serialization/deserialization error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// No node can host the actor.
    #[error("placement error: {0}")]
    Placement(#[from] PlacementError),
}

impl ActorError {
    /// Shorthand for a handler rejection.
    pub fn handler(reason: impl Into<String>) -> Self {
        Self::HandlerError(reason.into())
    }

    /// Translate a remote fault into the caller-facing error.
    pub fn from_fault(id: &ActorId, fault: ActorFault) -> Self {
        match fault {
            ActorFault::Gone => Self::Gone(id.clone()),
            ActorFault::UnknownMethod(method) => Self::UnknownMethod(method),
            ActorFault::Handler(reason) => Self::HandlerError(reason),
            ActorFault::RetryElsewhere => Self::Unavailable {
                id: id.clone(),
                reason: "retry elsewhere".to_string(),
            },
            ActorFault::Unavailable(reason) => Self::Unavailable {
                id: id.clone(),
                reason,
            },
        }
    }

    /// Translate an error raised inside a handler into the fault sent back
    /// to its caller.
    ///
    /// Failures of nested calls stay retryable so the whole request is
    /// re-run; a nested `Gone` is the handler's problem, not the caller's
    /// target being gone.
    pub fn into_fault(self) -> ActorFault {
        match self {
            Self::UnknownMethod(method) => ActorFault::UnknownMethod(method),
            Self::HandlerError(reason) => ActorFault::Handler(reason),
            Self::Gone(id) => ActorFault::Handler(format!("actor {id} is gone")),
            Self::Codec(e) => ActorFault::Handler(e.to_string()),
            e @ (Self::Unavailable { .. } | Self::Timeout(_) | Self::Placement(_)) => {
                ActorFault::Unavailable(e.to_string())
            }
        }
    }
}

/// Bounded retries with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_backoff: Duration,
    /// Upper bound on any single delay.
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(500),
        }
    }
}

/// Caller-side actor request router.
///
/// One router per node. Actors call other actors through it (via their
/// [`ActorContext`](super::ActorContext)), and external code does the same
/// through typed references.
///
/// # Example
///
/// ```rust,ignore
/// let room: RoomInfo = router
///     .send_actor_request(&ActorId::room(0), room_methods::DESCRIBE, &())
///     .await?;
/// ```
pub struct ActorRouter {
    local: NetworkAddress,
    transport: Rc<dyn Transport>,
    membership: Rc<MembershipAgent>,
    placement: Rc<dyn PlacementDirector>,
    cache: PlacementCache,
    time: Rc<dyn TimeProvider>,
    retry: RetryPolicy,
    codec: JsonCodec,
}

impl std::fmt::Debug for ActorRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorRouter")
            .field("local", &self.local)
            .field("cached", &self.cache.len())
            .field("retry", &self.retry)
            .finish()
    }
}

impl ActorRouter {
    /// Create a new actor router.
    ///
    /// # Arguments
    ///
    /// * `transport` - Delivery to other nodes (and to this one)
    /// * `membership` - Source of the current view
    /// * `placement` - Chooses the owning node of an actor
    /// * `time` - Clock for retry backoff
    /// * `retry` - Bounds on re-resolution after retryable faults
    pub fn new(
        transport: Rc<dyn Transport>,
        membership: Rc<MembershipAgent>,
        placement: Rc<dyn PlacementDirector>,
        time: Rc<dyn TimeProvider>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            local: membership.local_address().clone(),
            transport,
            membership,
            placement,
            cache: PlacementCache::new(),
            time,
            retry,
            codec: JsonCodec,
        }
    }

    /// Address of the node this router belongs to.
    pub fn local_address(&self) -> &NetworkAddress {
        &self.local
    }

    /// The caller-side placement cache.
    pub fn placement_cache(&self) -> &PlacementCache {
        &self.cache
    }

    pub(crate) fn membership(&self) -> &Rc<MembershipAgent> {
        &self.membership
    }

    pub(crate) fn placement(&self) -> &Rc<dyn PlacementDirector> {
        &self.placement
    }

    pub(crate) fn transport(&self) -> &Rc<dyn Transport> {
        &self.transport
    }

    pub(crate) fn time(&self) -> &Rc<dyn TimeProvider> {
        &self.time
    }

    /// Typed reference to the actor `id`, sending as an external caller.
    pub fn actor_ref<R: ActorRef>(self: &Rc<Self>, id: ActorId) -> R {
        R::from_router(id, self, None)
    }

    /// Send a request to a virtual actor and decode the reply.
    ///
    /// # Arguments
    ///
    /// * `target` - The target actor identity
    /// * `method` - Method discriminant (1, 2, 3, …)
    /// * `req` - The method-specific request payload
    pub async fn send_actor_request<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        target: &ActorId,
        method: u32,
        req: &Req,
    ) -> Result<Resp, ActorError> {
        self.send_from(None, target, method, req).await
    }

    /// Like [`send_actor_request`](Self::send_actor_request), naming the
    /// sending actor.
    pub async fn send_from<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        sender: Option<&ActorId>,
        target: &ActorId,
        method: u32,
        req: &Req,
    ) -> Result<Resp, ActorError> {
        let message = ActorMessage {
            target: target.clone(),
            sender: sender.cloned(),
            method,
            body: self.codec.encode(req)?,
            forward_count: 0,
        };
        let body = self.send_message(message).await?;
        Ok(self.codec.decode(&body)?)
    }

    /// Send a request, giving up after `timeout`.
    ///
    /// A message already queued at the actor is still processed; only the
    /// caller stops waiting.
    pub async fn send_with_timeout<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        target: &ActorId,
        method: u32,
        req: &Req,
        timeout: Duration,
    ) -> Result<Resp, ActorError> {
        tokio::time::timeout(timeout, self.send_actor_request(target, method, req))
            .await
            .map_err(|_| ActorError::Timeout(target.clone()))?
    }

    /// Fire-and-forget send.
    ///
    /// The request is encoded now and delivered from a spawned local task;
    /// delivery failures are logged, not reported.
    pub fn tell<Req: Serialize>(
        self: &Rc<Self>,
        sender: Option<&ActorId>,
        target: &ActorId,
        method: u32,
        req: &Req,
    ) -> Result<(), ActorError> {
        let message = ActorMessage {
            target: target.clone(),
            sender: sender.cloned(),
            method,
            body: self.codec.encode(req)?,
            forward_count: 0,
        };
        let router = self.clone();
        tokio::task::spawn_local(async move {
            let target = message.target.clone();
            if let Err(e) = router.send_message(message).await {
                tracing::warn!(actor = %target, method, error = %e, "one-way message failed");
            }
        });
        Ok(())
    }

    /// Deliver an encoded message, retrying retryable faults.
    pub async fn send_message(&self, message: ActorMessage) -> Result<Vec<u8>, ActorError> {
        let target = message.target.clone();
        let mut last_failure = String::from("no attempt made");

        for attempt in 1..=self.retry.max_attempts {
            match self.attempt(&message).await {
                Ok(Ok(body)) => return Ok(body),
                Ok(Err(fault)) if !fault.is_retryable() => {
                    return Err(ActorError::from_fault(&target, fault));
                }
                Ok(Err(fault)) => last_failure = fault.to_string(),
                Err(reason) => last_failure = reason,
            }

            self.cache.invalidate(&target);
            if attempt < self.retry.max_attempts {
                // A node that left marks its row before it stops answering;
                // re-reading the table lets the retry skip it right away.
                if let Err(e) = self.membership.refresh_view().await {
                    tracing::debug!(actor = %target, error = %e, "view refresh before retry failed");
                }
                let delay = self.retry.backoff(attempt);
                tracing::debug!(
                    actor = %target,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    reason = %last_failure,
                    "retrying actor request"
                );
                self.time.sleep(delay).await;
            }
        }

        Err(ActorError::Unavailable {
            id: target,
            reason: last_failure,
        })
    }

    /// One resolve-and-send round. `Err` carries a retryable local failure.
    async fn attempt(&self, message: &ActorMessage) -> Result<Result<Vec<u8>, ActorFault>, String> {
        let node = self.resolve(&message.target).map_err(|e| e.to_string())?;
        let response = self
            .transport
            .send(&node, message.clone())
            .await
            .map_err(|e| e.to_string())?;

        if let Some(invalidation) = &response.cache_invalidation {
            self.apply_invalidation(invalidation);
        }
        Ok(response.body)
    }

    /// Resolve the owning node of an actor under the current view.
    pub fn resolve(&self, target: &ActorId) -> Result<NetworkAddress, PlacementError> {
        let view = self.membership.current_view();
        if let Some(node) = self.cache.get(target, view.epoch) {
            return Ok(node);
        }

        let node = self.placement.place(target, &view)?;
        self.cache.insert(target.clone(), node.clone(), view.epoch);
        Ok(node)
    }

    fn apply_invalidation(&self, invalidation: &CacheInvalidation) {
        tracing::debug!(
            actor = %invalidation.actor_id,
            invalid = %invalidation.invalid_node,
            "placement cache invalidated by forward"
        );
        self.cache.invalidate(&invalidation.actor_id);
        if let Some(valid) = &invalidation.valid_node {
            let epoch = self.membership.current_view().epoch;
            self.cache
                .insert(invalidation.actor_id.clone(), valid.clone(), epoch);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(10));
        assert_eq!(policy.backoff(2), Duration::from_millis(20));
        assert_eq!(policy.backoff(3), Duration::from_millis(40));
        assert_eq!(policy.backoff(10), Duration::from_millis(500));
        assert_eq!(policy.backoff(64), Duration::from_millis(500));
    }

    #[test]
    fn test_fault_translation() {
        let id = ActorId::room(3);
        assert!(matches!(
            ActorError::from_fault(&id, ActorFault::Gone),
            ActorError::Gone(gone) if gone == id
        ));
        assert!(matches!(
            ActorError::from_fault(&id, ActorFault::UnknownMethod(42)),
            ActorError::UnknownMethod(42)
        ));
        assert!(matches!(
            ActorError::from_fault(&id, ActorFault::RetryElsewhere),
            ActorError::Unavailable { .. }
        ));
    }

    #[test]
    fn test_nested_failures_stay_retryable() {
        let unavailable = ActorError::Unavailable {
            id: ActorId::room(1),
            reason: "store down".into(),
        };
        assert!(unavailable.into_fault().is_retryable());
        assert!(ActorError::Timeout(ActorId::room(1)).into_fault().is_retryable());

        let gone = ActorError::Gone(ActorId::monster(7)).into_fault();
        assert!(matches!(gone, ActorFault::Handler(_)));
        assert!(!ActorError::handler("no exit").into_fault().is_retryable());
    }
}
