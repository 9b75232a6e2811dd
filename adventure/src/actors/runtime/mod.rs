//! Actor runtime: host, router, and activation lifecycle.

pub(crate) mod host;
pub(crate) mod lifecycle;
pub(crate) mod router;

pub use host::{ActorContext, ActorHandler, ActorHost, HostSettings, MAX_FORWARDS};
pub use lifecycle::{ActivationState, DeactivationHint, DeactivationReason};
pub use router::{ActorError, ActorRouter, RetryPolicy};
