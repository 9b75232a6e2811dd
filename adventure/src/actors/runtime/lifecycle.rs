//! Activation lifecycle state machine and deactivation reasons.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lifecycle of one activation on one node.
///
/// # State Transitions
///
/// ```text
/// Unresolved → Activating → Active → Deactivating → Deactivated
///                  ↓
///             Deactivating (activation failed)
/// ```
///
/// # Invariants
///
/// - Messages are only dispatched in `Active`
/// - `Deactivated` is terminal; a later message for the same identity starts
///   a new activation with a new incarnation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivationState {
    /// No activation record exists on this node.
    Unresolved,
    /// Registering in the directory and loading state.
    Activating,
    /// Draining the mailbox, one message at a time.
    Active,
    /// Mailbox closed, pending messages bounced, directory entry removed.
    Deactivating,
    /// Gone from this node.
    Deactivated,
}

impl ActivationState {
    /// Check if transition to next state is valid.
    pub fn can_transition_to(&self, next: ActivationState) -> bool {
        use ActivationState::*;
        matches!(
            (self, next),
            (Unresolved, Activating)
                | (Activating, Active)
                | (Activating, Deactivating)
                | (Active, Deactivating)
                | (Deactivating, Deactivated)
        )
    }

    /// Check if the activation can process messages in this state.
    pub fn can_process_messages(&self) -> bool {
        matches!(self, ActivationState::Active)
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ActivationState::Deactivated)
    }
}

/// Reason why an activation is being deactivated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeactivationReason {
    /// Idle for longer than its idle timeout.
    IdleTimeout,
    /// Explicit request: the handler asked for it, or the host was told to.
    ExplicitRequest,
    /// A newer incarnation is registered for the identity.
    FencingLost,
    /// A state write lost a compare-and-swap.
    VersionConflict,
    /// The state store failed while persisting.
    StoreFailure,
    /// State could not be loaded after all attempts.
    ActivationFailed,
    /// The actor's state is tombstoned.
    Tombstoned,
    /// The node is shutting down.
    NodeShutdown,
    /// The node was declared dead by the cluster.
    NodeEvicted,
}

impl DeactivationReason {
    /// Check if this reason indicates a failure.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            DeactivationReason::ActivationFailed | DeactivationReason::StoreFailure
        )
    }

    /// Check if another activation may already own the identity.
    pub fn is_superseded(&self) -> bool {
        matches!(
            self,
            DeactivationReason::FencingLost
                | DeactivationReason::VersionConflict
                | DeactivationReason::NodeEvicted
        )
    }
}

/// When an idle activation should be collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeactivationHint {
    /// Use the node's idle timeout.
    #[default]
    NodeDefault,
    /// Never collect for idleness.
    KeepAlive,
    /// Deactivate as soon as the mailbox is empty.
    DeactivateOnIdle,
    /// Deactivate after this much idle time.
    DeactivateAfterIdle(Duration),
}

impl DeactivationHint {
    /// Resolve the hint against the node's default timeout.
    pub fn idle_timeout(&self, node_default: Duration) -> Option<Duration> {
        match self {
            DeactivationHint::NodeDefault => Some(node_default),
            DeactivationHint::KeepAlive => None,
            DeactivationHint::DeactivateOnIdle => Some(Duration::ZERO),
            DeactivationHint::DeactivateAfterIdle(timeout) => Some(*timeout),
        }
    }
}
