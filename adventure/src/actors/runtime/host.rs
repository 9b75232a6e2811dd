//! ActorHost: server-side runtime for virtual actors.
//!
//! The `ActorHost` owns the activations of one node. Each activation runs on
//! its own local task and drains a mailbox one message at a time, so a
//! handler never overlaps with itself. The user registers actor kinds and
//! the host does the rest.
//!
//! # Turn processing
//!
//! For every message, an active activation:
//!
//! 1. checks its directory entry still carries its own incarnation, and
//!    bounces the message (then deactivates) if it was superseded
//! 2. rejects the message with `Gone` if the state is tombstoned
//! 3. dispatches to the handler against the in-memory state
//! 4. restores the previous state if the handler failed
//! 5. persists the state unless the method is read-only
//! 6. replies only once the write succeeded
//!
//! A lost compare-and-swap or a store failure deactivates the activation;
//! the caller retries and a fresh activation reloads the latest state.
//!
//! # Usage
//!
//! ```rust,ignore
//! let host = Rc::new(ActorHost::new(router, directory, store, HostSettings::default()));
//! host.register::<RoomActor>();
//! network.bind(address, &host);
//! ```

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;

use crate::NetworkAddress;
use crate::actors::{
    ActorAddress, ActorDirectory, ActorFault, ActorId, ActorKind, ActorMessage, ActorRef,
    ActorResponse, ActorStateError, ActorStateStore, CacheInvalidation, Incarnation,
    PersistentState, ViewChange,
};
use crate::time::TimeProvider;

use super::lifecycle::{ActivationState, DeactivationHint, DeactivationReason};
use super::router::{ActorError, ActorRouter, RetryPolicy};

/// Hops a message may be forwarded between hosts before being bounced.
pub const MAX_FORWARDS: u8 = 2;

/// Context provided to actor methods during dispatch.
///
/// Gives the actor its own identity and incarnation, the caller (when the
/// caller is an actor), and a router for calling other actors.
pub struct ActorContext {
    /// The identity of the actor currently being invoked.
    pub id: ActorId,
    /// The calling actor, if any.
    pub sender: Option<ActorId>,
    /// Fencing token of the current activation.
    pub incarnation: Incarnation,
    /// Router for calling other actors.
    pub router: Rc<ActorRouter>,
    deactivate: Cell<bool>,
}

impl ActorContext {
    /// Build a context for one turn.
    pub fn new(
        id: ActorId,
        sender: Option<ActorId>,
        incarnation: Incarnation,
        router: Rc<ActorRouter>,
    ) -> Self {
        Self {
            id,
            sender,
            incarnation,
            router,
            deactivate: Cell::new(false),
        }
    }

    /// Typed reference to another actor, sending as this actor.
    pub fn actor_ref<R: ActorRef>(&self, id: ActorId) -> R {
        R::from_router(id, &self.router, Some(self.id.clone()))
    }

    /// Call another actor and wait for its reply.
    pub async fn call<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        target: &ActorId,
        method: u32,
        req: &Req,
    ) -> Result<Resp, ActorError> {
        self.router
            .send_from(Some(&self.id), target, method, req)
            .await
    }

    /// Send a one-way message to another actor.
    pub fn tell<Req: Serialize>(
        &self,
        target: &ActorId,
        method: u32,
        req: &Req,
    ) -> Result<(), ActorError> {
        self.router.tell(Some(&self.id), target, method, req)
    }

    /// Deactivate once the current message has been answered.
    pub fn deactivate_on_completion(&self) {
        self.deactivate.set(true);
    }

    /// Whether the handler asked for deactivation during this turn.
    pub fn deactivation_requested(&self) -> bool {
        self.deactivate.get()
    }
}

/// Trait implemented by each actor kind for method dispatch.
///
/// The host owns the actor's persistent state and passes it to
/// [`dispatch`](Self::dispatch) by mutable reference. State changes are
/// persisted after the handler returns, unless the method is read-only.
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Default)]
/// struct Counter;
///
/// #[async_trait(?Send)]
/// impl ActorHandler for Counter {
///     type State = i64;
///
///     fn actor_kind() -> ActorKind { ActorKind::Room }
///
///     async fn dispatch(
///         &mut self,
///         _ctx: &ActorContext,
///         state: &mut i64,
///         method: u32,
///         body: &[u8],
///     ) -> Result<Vec<u8>, ActorError> {
///         match method {
///             1 => { *state += 1; Ok(JsonCodec.encode(state)?) }
///             _ => Err(ActorError::UnknownMethod(method)),
///         }
///     }
/// }
/// ```
#[async_trait::async_trait(?Send)]
pub trait ActorHandler: 'static {
    /// Durable state of one actor.
    type State: Serialize + DeserializeOwned + Default + Clone + 'static;

    /// The kind this handler serves.
    fn actor_kind() -> ActorKind;

    /// When idle activations of this kind are collected.
    fn deactivation_hint() -> DeactivationHint {
        DeactivationHint::NodeDefault
    }

    /// Methods that never change state and skip the write.
    fn is_read_only(_method: u32) -> bool {
        false
    }

    /// Whether the state marks a permanently retired actor.
    fn is_tombstoned(_state: &Self::State) -> bool {
        false
    }

    /// Dispatch a method call.
    ///
    /// # Arguments
    ///
    /// * `ctx` - Context with the actor's identity and a router
    /// * `state` - The actor's state, restored if this returns an error
    /// * `method` - Method discriminant (1, 2, 3, …)
    /// * `body` - Serialized method-specific request body
    async fn dispatch(
        &mut self,
        ctx: &ActorContext,
        state: &mut Self::State,
        method: u32,
        body: &[u8],
    ) -> Result<Vec<u8>, ActorError>;
}

/// Host-level activation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSettings {
    /// Idle timeout for kinds using [`DeactivationHint::NodeDefault`].
    pub idle_timeout: Duration,
    /// Retries for loading state during activation.
    pub activation_retry: RetryPolicy,
    /// Expiry refreshed on every state write.
    pub state_ttl: Option<Duration>,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(600),
            activation_retry: RetryPolicy {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(20),
                max_backoff: Duration::from_millis(200),
            },
            state_ttl: Some(Duration::from_secs(5 * 24 * 60 * 60)),
        }
    }
}

struct Envelope {
    message: ActorMessage,
    reply: oneshot::Sender<ActorResponse>,
}

struct Control {
    reason: DeactivationReason,
    done: Option<oneshot::Sender<()>>,
}

/// Host-side bookkeeping for one activation.
struct ActivationRecord {
    id: ActorId,
    mailbox: mpsc::UnboundedSender<Envelope>,
    control: mpsc::UnboundedSender<Control>,
    state: Cell<ActivationState>,
    incarnation: Cell<Option<Incarnation>>,
    idle_timeout: Option<Duration>,
    last_active: Cell<Duration>,
    task: RefCell<Option<AbortHandle>>,
}

impl ActivationRecord {
    fn transition(&self, next: ActivationState) {
        let current = self.state.get();
        if current.can_transition_to(next) {
            self.state.set(next);
        } else {
            tracing::warn!(actor = %self.id, ?current, ?next, "invalid activation transition");
        }
    }

    fn request_deactivation(&self, reason: DeactivationReason) -> Option<oneshot::Receiver<()>> {
        let (done, wait) = oneshot::channel();
        self.control
            .send(Control {
                reason,
                done: Some(done),
            })
            .ok()
            .map(|()| wait)
    }
}

/// Internal trait to type-erase different actor handler types inside the host.
///
/// Each registered actor kind gets a `TypedDispatcher<H>` that implements
/// this trait.
trait ActorTypeDispatcher {
    fn deactivation_hint(&self) -> DeactivationHint;

    /// Spawn the task driving one activation.
    fn spawn(
        &self,
        host: Rc<ActorHost>,
        record: Rc<ActivationRecord>,
        mailbox: mpsc::UnboundedReceiver<Envelope>,
        control: mpsc::UnboundedReceiver<Control>,
    ) -> AbortHandle;
}

/// Type-erased dispatcher for a specific actor handler type.
struct TypedDispatcher<H: ActorHandler> {
    factory: Box<dyn Fn() -> H>,
}

impl<H: ActorHandler> ActorTypeDispatcher for TypedDispatcher<H> {
    fn deactivation_hint(&self) -> DeactivationHint {
        H::deactivation_hint()
    }

    fn spawn(
        &self,
        host: Rc<ActorHost>,
        record: Rc<ActivationRecord>,
        mailbox: mpsc::UnboundedReceiver<Envelope>,
        control: mpsc::UnboundedReceiver<Control>,
    ) -> AbortHandle {
        let activation = Activation {
            host,
            record,
            handler: (self.factory)(),
            mailbox,
            control,
        };
        tokio::task::spawn_local(activation.run()).abort_handle()
    }
}

/// One activation: the handler instance plus its channels.
struct Activation<H: ActorHandler> {
    host: Rc<ActorHost>,
    record: Rc<ActivationRecord>,
    handler: H,
    mailbox: mpsc::UnboundedReceiver<Envelope>,
    control: mpsc::UnboundedReceiver<Control>,
}

impl<H: ActorHandler> Activation<H> {
    async fn run(mut self) {
        let (address, mut state) = match self.activate().await {
            Ok(activated) => activated,
            Err((address, reason)) => {
                tracing::warn!(actor = %self.record.id, %reason, "activation failed");
                self.deactivate(
                    address.as_ref(),
                    DeactivationReason::ActivationFailed,
                    ActorFault::Unavailable(reason),
                    Vec::new(),
                )
                .await;
                return;
            }
        };

        self.record.transition(ActivationState::Active);
        tracing::debug!(
            actor = %address.actor_id,
            incarnation = %address.incarnation,
            node = %address.node,
            "actor activated"
        );

        let mut acks = Vec::new();
        let reason = loop {
            let idle_timeout = self.record.idle_timeout;
            let time = self.host.time.clone();
            let idle = async move {
                match idle_timeout {
                    Some(timeout) => time.sleep(timeout).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                biased;
                Some(control) = self.control.recv() => {
                    acks.extend(control.done);
                    break control.reason;
                }
                envelope = self.mailbox.recv() => match envelope {
                    Some(envelope) => {
                        if let Some(reason) = self.process(&address, &mut state, envelope).await {
                            break reason;
                        }
                    }
                    None => break DeactivationReason::NodeShutdown,
                },
                () = idle => break DeactivationReason::IdleTimeout,
            }
        };

        self.deactivate(Some(&address), reason, ActorFault::RetryElsewhere, acks)
            .await;
    }

    /// Register a new incarnation, then load state with bounded retries.
    async fn activate(
        &mut self,
    ) -> Result<(ActorAddress, PersistentState<H::State>), (Option<ActorAddress>, String)> {
        let host = &self.host;
        let address = host
            .directory
            .register(&self.record.id, &host.local)
            .await
            .map_err(|e| (None, e.to_string()))?;
        self.record.incarnation.set(Some(address.incarnation));

        let policy = host.settings.activation_retry;
        let mut attempt = 1;
        loop {
            match PersistentState::load(host.store.clone(), &self.record.id, host.settings.state_ttl)
                .await
            {
                Ok(state) => return Ok((address, state)),
                Err(e) if attempt < policy.max_attempts => {
                    tracing::debug!(actor = %self.record.id, attempt, error = %e, "state load failed, retrying");
                    host.time.sleep(policy.backoff(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err((Some(address), e.to_string())),
            }
        }
    }

    /// Process one message. Returns a reason when the activation must end.
    async fn process(
        &mut self,
        address: &ActorAddress,
        state: &mut PersistentState<H::State>,
        envelope: Envelope,
    ) -> Option<DeactivationReason> {
        let Envelope { message, reply } = envelope;
        self.record.last_active.set(self.host.time.now());

        match self.host.directory.lookup(&address.actor_id).await {
            Ok(Some(current)) if current == *address => {}
            Ok(current) => {
                tracing::info!(
                    actor = %address.actor_id,
                    incarnation = %address.incarnation,
                    current = ?current.map(|c| c.incarnation),
                    "activation superseded"
                );
                let _ = reply.send(ActorResponse::fault(ActorFault::RetryElsewhere));
                return Some(DeactivationReason::FencingLost);
            }
            Err(e) => {
                let _ = reply.send(ActorResponse::fault(ActorFault::Unavailable(e.to_string())));
                return None;
            }
        }

        if H::is_tombstoned(state.state()) {
            let _ = reply.send(ActorResponse::fault(ActorFault::Gone));
            return Some(DeactivationReason::Tombstoned);
        }

        let ctx = ActorContext::new(
            address.actor_id.clone(),
            message.sender,
            address.incarnation,
            self.host.router.clone(),
        );
        let snapshot = state.state().clone();
        let result = self
            .handler
            .dispatch(&ctx, state.state_mut(), message.method, &message.body)
            .await;

        let response = match result {
            Err(e) => {
                tracing::debug!(actor = %address.actor_id, method = message.method, error = %e, "handler failed");
                state.replace(snapshot);
                ActorResponse::fault(e.into_fault())
            }
            Ok(body) if H::is_read_only(message.method) => ActorResponse::ok(body),
            Ok(body) => match state.write_state().await {
                Ok(_) => ActorResponse::ok(body),
                Err(e @ ActorStateError::VersionConflict { .. }) => {
                    tracing::warn!(actor = %address.actor_id, error = %e, "state write lost the race");
                    let _ = reply.send(ActorResponse::fault(ActorFault::RetryElsewhere));
                    return Some(DeactivationReason::VersionConflict);
                }
                Err(e) => {
                    tracing::warn!(actor = %address.actor_id, error = %e, "state write failed");
                    let _ = reply.send(ActorResponse::fault(ActorFault::Unavailable(e.to_string())));
                    return Some(DeactivationReason::StoreFailure);
                }
            },
        };

        let _ = reply.send(response);
        self.record.last_active.set(self.host.time.now());
        ctx.deactivation_requested()
            .then_some(DeactivationReason::ExplicitRequest)
    }

    /// Close the mailbox, bounce what is queued, and leave the directory.
    async fn deactivate(
        mut self,
        address: Option<&ActorAddress>,
        reason: DeactivationReason,
        bounce: ActorFault,
        mut acks: Vec<oneshot::Sender<()>>,
    ) {
        self.record.transition(ActivationState::Deactivating);

        self.mailbox.close();
        let mut bounced = 0usize;
        while let Ok(envelope) = self.mailbox.try_recv() {
            let _ = envelope.reply.send(ActorResponse::fault(bounce.clone()));
            bounced += 1;
        }

        if let Some(address) = address {
            if let Err(e) = self.host.directory.unregister(address).await {
                tracing::warn!(actor = %address.actor_id, error = %e, "directory unregister failed");
            }
        }

        self.record.transition(ActivationState::Deactivated);
        self.host.remove_record(&self.record);

        while let Ok(control) = self.control.try_recv() {
            acks.extend(control.done);
        }
        for ack in acks {
            let _ = ack.send(());
        }

        if reason.is_failure() {
            tracing::warn!(actor = %self.record.id, ?reason, bounced, "actor deactivated");
        } else if reason.is_superseded() {
            tracing::info!(actor = %self.record.id, ?reason, bounced, "actor deactivated");
        } else {
            tracing::debug!(actor = %self.record.id, ?reason, bounced, "actor deactivated");
        }
    }
}

/// Server-side runtime for virtual actors.
///
/// Owns activation records, spawns one task per activation, and routes
/// each incoming message either to a local mailbox or onwards to the node
/// that owns the actor under this node's view.
pub struct ActorHost {
    local: NetworkAddress,
    router: Rc<ActorRouter>,
    directory: Rc<dyn ActorDirectory>,
    store: Rc<dyn ActorStateStore>,
    time: Rc<dyn TimeProvider>,
    settings: HostSettings,
    dispatchers: RefCell<HashMap<ActorKind, Rc<dyn ActorTypeDispatcher>>>,
    activations: RefCell<HashMap<ActorId, Rc<ActivationRecord>>>,
    serving: Cell<bool>,
}

impl fmt::Debug for ActorHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorHost")
            .field("local", &self.local)
            .field("activations", &self.activations.borrow().len())
            .field("serving", &self.serving.get())
            .finish()
    }
}

impl ActorHost {
    /// Create a new actor host.
    ///
    /// # Arguments
    ///
    /// * `router` - This node's router; also provides membership, placement
    ///   and transport
    /// * `directory` - Cluster-wide activation registry
    /// * `store` - Durable actor state
    /// * `settings` - Idle timeout, activation retries and state TTL
    pub fn new(
        router: Rc<ActorRouter>,
        directory: Rc<dyn ActorDirectory>,
        store: Rc<dyn ActorStateStore>,
        settings: HostSettings,
    ) -> Self {
        Self {
            local: router.local_address().clone(),
            time: router.time().clone(),
            router,
            directory,
            store,
            settings,
            dispatchers: RefCell::new(HashMap::new()),
            activations: RefCell::new(HashMap::new()),
            serving: Cell::new(false),
        }
    }

    /// This node's address.
    pub fn local_address(&self) -> &NetworkAddress {
        &self.local
    }

    /// This node's router.
    pub fn router(&self) -> &Rc<ActorRouter> {
        &self.router
    }

    /// Register an actor handler type built with `Default`.
    pub fn register<H: ActorHandler + Default>(&self) {
        self.register_with(H::default);
    }

    /// Register an actor handler type with a factory, called once per
    /// activation.
    pub fn register_with<H: ActorHandler>(&self, factory: impl Fn() -> H + 'static) {
        let dispatcher: Rc<dyn ActorTypeDispatcher> = Rc::new(TypedDispatcher {
            factory: Box::new(factory),
        });
        self.dispatchers
            .borrow_mut()
            .insert(H::actor_kind(), dispatcher);
    }

    /// Start or stop accepting messages.
    pub fn set_serving(&self, serving: bool) {
        self.serving.set(serving);
    }

    /// Whether the host accepts messages.
    pub fn is_serving(&self) -> bool {
        self.serving.get()
    }

    /// Entry point for every message delivered to this node.
    pub async fn receive(self: &Rc<Self>, message: ActorMessage) -> ActorResponse {
        if !self.serving.get() {
            return ActorResponse::fault(ActorFault::RetryElsewhere);
        }

        let view = self.router.membership().current_view();
        let owner = match self.router.placement().place(&message.target, &view) {
            Ok(owner) => owner,
            Err(e) => {
                tracing::debug!(node = %self.local, error = %e, "cannot place incoming message");
                return ActorResponse::fault(ActorFault::RetryElsewhere);
            }
        };
        if owner != self.local {
            return self.forward(owner, message).await;
        }

        let (reply, response) = oneshot::channel();
        if let Err(fault) = self.enqueue(Envelope { message, reply }) {
            return ActorResponse::fault(fault);
        }
        response
            .await
            .unwrap_or_else(|_| ActorResponse::fault(ActorFault::RetryElsewhere))
    }

    async fn forward(&self, owner: NetworkAddress, mut message: ActorMessage) -> ActorResponse {
        let invalidation = CacheInvalidation {
            actor_id: message.target.clone(),
            invalid_node: self.local.clone(),
            valid_node: Some(owner.clone()),
        };

        if message.forward_count >= MAX_FORWARDS {
            tracing::debug!(actor = %message.target, hops = message.forward_count, "forward limit reached");
            return ActorResponse::fault(ActorFault::RetryElsewhere);
        }
        message.forward_count += 1;

        tracing::debug!(actor = %message.target, from = %self.local, to = %owner, "forwarding message");
        let mut response = match self.router.transport().send(&owner, message).await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(error = %e, "forward failed");
                ActorResponse::fault(ActorFault::RetryElsewhere)
            }
        };
        if response.cache_invalidation.is_none() {
            response.cache_invalidation = Some(invalidation);
        }
        response
    }

    /// Queue a message for its activation, creating the activation if
    /// needed. Synchronous, so two messages racing for the same identity
    /// can never create two local activations.
    fn enqueue(self: &Rc<Self>, envelope: Envelope) -> Result<(), ActorFault> {
        let id = envelope.message.target.clone();
        let existing = self.activations.borrow().get(&id).cloned();
        let envelope = match existing {
            Some(record) => match record.mailbox.send(envelope) {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(envelope)) => {
                    // Deactivating: start over with a fresh activation.
                    self.remove_record(&record);
                    envelope
                }
            },
            None => envelope,
        };

        let dispatcher = self
            .dispatchers
            .borrow()
            .get(&id.kind)
            .cloned()
            .ok_or_else(|| ActorFault::Handler(format!("no handler registered for {} actors", id.kind)))?;

        let (mailbox, mailbox_rx) = mpsc::unbounded_channel();
        let (control, control_rx) = mpsc::unbounded_channel();
        let record = Rc::new(ActivationRecord {
            id: id.clone(),
            mailbox,
            control,
            state: Cell::new(ActivationState::Unresolved),
            incarnation: Cell::new(None),
            idle_timeout: dispatcher
                .deactivation_hint()
                .idle_timeout(self.settings.idle_timeout),
            last_active: Cell::new(self.time.now()),
            task: RefCell::new(None),
        });
        record.transition(ActivationState::Activating);
        if record.mailbox.send(envelope).is_err() {
            return Err(ActorFault::RetryElsewhere);
        }

        self.activations.borrow_mut().insert(id, record.clone());
        let task = dispatcher.spawn(self.clone(), record.clone(), mailbox_rx, control_rx);
        *record.task.borrow_mut() = Some(task);
        Ok(())
    }

    fn remove_record(&self, record: &Rc<ActivationRecord>) {
        let mut activations = self.activations.borrow_mut();
        if activations
            .get(&record.id)
            .is_some_and(|current| Rc::ptr_eq(current, record))
        {
            activations.remove(&record.id);
        }
    }

    fn records(&self) -> Vec<Rc<ActivationRecord>> {
        self.activations.borrow().values().cloned().collect()
    }

    /// Number of activations on this node that are not yet deactivated.
    pub fn activation_count(&self) -> usize {
        self.activations
            .borrow()
            .values()
            .filter(|record| !record.state.get().is_terminal())
            .count()
    }

    /// Lifecycle state of `id` on this node.
    pub fn activation_state(&self, id: &ActorId) -> ActivationState {
        self.activations
            .borrow()
            .get(id)
            .map(|record| record.state.get())
            .unwrap_or(ActivationState::Unresolved)
    }

    /// Whether `id` is active on this node.
    pub fn is_active(&self, id: &ActorId) -> bool {
        self.activation_state(id).can_process_messages()
    }

    /// Incarnation of the local activation of `id`, once registered.
    pub fn incarnation_of(&self, id: &ActorId) -> Option<Incarnation> {
        self.activations
            .borrow()
            .get(id)
            .and_then(|record| record.incarnation.get())
    }

    /// Deactivate `id` after its current message and wait until it is gone.
    ///
    /// Returns `false` if there was nothing to deactivate.
    pub async fn deactivate(&self, id: &ActorId) -> bool {
        let Some(record) = self.activations.borrow().get(id).cloned() else {
            return false;
        };
        match record.request_deactivation(DeactivationReason::ExplicitRequest) {
            Some(done) => done.await.is_ok(),
            None => false,
        }
    }

    /// Deactivate every activation and wait for all of them.
    pub async fn deactivate_all(&self, reason: DeactivationReason) -> usize {
        let waits: Vec<_> = self
            .records()
            .iter()
            .filter_map(|record| record.request_deactivation(reason))
            .collect();
        let count = waits.len();
        for done in waits {
            let _ = done.await;
        }
        if count > 0 {
            tracing::info!(node = %self.local, count, ?reason, "deactivated all actors");
        }
        count
    }

    /// Collect idle and superseded activations.
    ///
    /// Backstop for the per-activation idle timer: also catches activations
    /// whose directory entry was taken over while they sat idle. Returns the
    /// number of deactivations requested.
    pub async fn sweep(&self) -> usize {
        let now = self.time.now();
        let mut requested = 0;

        for record in self.records() {
            if !record.state.get().can_process_messages() {
                continue;
            }

            let idle = record
                .idle_timeout
                .is_some_and(|timeout| now.saturating_sub(record.last_active.get()) >= timeout);
            let reason = if idle {
                Some(DeactivationReason::IdleTimeout)
            } else {
                match (record.incarnation.get(), self.directory.lookup(&record.id).await) {
                    (Some(incarnation), Ok(Some(current)))
                        if current.incarnation == incarnation && current.node == self.local =>
                    {
                        None
                    }
                    (_, Err(e)) => {
                        tracing::warn!(actor = %record.id, error = %e, "sweep lookup failed");
                        None
                    }
                    _ => Some(DeactivationReason::FencingLost),
                }
            };

            if let Some(reason) = reason {
                let sent = record
                    .control
                    .send(Control { reason, done: None })
                    .is_ok();
                if sent {
                    requested += 1;
                }
            }
        }

        if requested > 0 {
            tracing::debug!(node = %self.local, requested, "sweep requested deactivations");
        }
        requested
    }

    /// React to a membership view change.
    ///
    /// Directory entries of dead nodes are dropped. If this node itself was
    /// declared dead, it stops serving and deactivates everything.
    pub fn handle_view_change(self: &Rc<Self>, change: &ViewChange) {
        if !change.dead.is_empty() {
            let directory = self.directory.clone();
            let dead = change.dead.clone();
            tokio::task::spawn_local(async move {
                match directory.unregister_members(&dead).await {
                    Ok(removed) => {
                        tracing::info!(nodes = ?dead, removed = removed.len(), "dropped directory entries of dead nodes");
                    }
                    Err(e) => tracing::warn!(error = %e, "directory cleanup failed"),
                }
            });
        }

        if self.router.membership().is_evicted() && self.serving.replace(false) {
            tracing::warn!(node = %self.local, "node evicted, deactivating all actors");
            let host = self.clone();
            tokio::task::spawn_local(async move {
                host.deactivate_all(DeactivationReason::NodeEvicted).await;
            });
        }
    }

    /// Kill every activation task without any cleanup, as a crash would.
    pub(crate) fn abort_all(&self) {
        self.serving.set(false);
        let records: Vec<_> = self.activations.borrow_mut().drain().map(|(_, r)| r).collect();
        for record in records {
            if let Some(task) = record.task.borrow_mut().take() {
                task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::JsonCodec;
    use crate::actors::{AdventureNode, ClusterConfig, InMemoryStateStore, NodeConfig};

    mod counter_methods {
        pub const INCREMENT: u32 = 1;
        pub const GET_VALUE: u32 = 2;
        pub const FAIL_AFTER_INCREMENT: u32 = 3;
        pub const RETIRE: u32 = 4;
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct CounterState {
        value: i64,
        retired: bool,
    }

    #[derive(Default)]
    struct Probe {
        in_flight: Cell<usize>,
        max_in_flight: Cell<usize>,
    }

    /// A counter that sleeps mid-turn and records overlapping turns.
    struct CounterActor {
        probe: Rc<Probe>,
    }

    #[async_trait::async_trait(?Send)]
    impl ActorHandler for CounterActor {
        type State = CounterState;

        fn actor_kind() -> ActorKind {
            ActorKind::Room
        }

        fn deactivation_hint() -> DeactivationHint {
            DeactivationHint::DeactivateAfterIdle(Duration::from_secs(30))
        }

        fn is_read_only(method: u32) -> bool {
            method == counter_methods::GET_VALUE
        }

        fn is_tombstoned(state: &CounterState) -> bool {
            state.retired
        }

        async fn dispatch(
            &mut self,
            ctx: &ActorContext,
            state: &mut CounterState,
            method: u32,
            body: &[u8],
        ) -> Result<Vec<u8>, ActorError> {
            let in_flight = self.probe.in_flight.get() + 1;
            self.probe.in_flight.set(in_flight);
            self.probe
                .max_in_flight
                .set(self.probe.max_in_flight.get().max(in_flight));
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.probe.in_flight.set(in_flight - 1);

            match method {
                counter_methods::INCREMENT => {
                    let amount: i64 = JsonCodec.decode(body)?;
                    state.value += amount;
                    Ok(JsonCodec.encode(&state.value)?)
                }
                counter_methods::GET_VALUE => Ok(JsonCodec.encode(&state.value)?),
                counter_methods::FAIL_AFTER_INCREMENT => {
                    state.value += 1000;
                    Err(ActorError::handler("refused"))
                }
                counter_methods::RETIRE => {
                    state.retired = true;
                    ctx.deactivate_on_completion();
                    Ok(JsonCodec.encode(&())?)
                }
                _ => Err(ActorError::UnknownMethod(method)),
            }
        }
    }

    async fn single_node(store: Rc<InMemoryStateStore>, probe: Rc<Probe>) -> AdventureNode {
        let cluster = ClusterConfig::builder()
            .cluster_id("test")
            .service_id("host")
            .state_store(store)
            .build()
            .expect("cluster config");
        AdventureNode::builder(cluster, NodeConfig::for_address(NetworkAddress::localhost(4500)))
            .register_with(move || CounterActor {
                probe: probe.clone(),
            })
            .start()
            .await
            .expect("node start")
    }

    async fn increment(node: &AdventureNode, id: &ActorId, amount: i64) -> Result<i64, ActorError> {
        node.router()
            .send_actor_request(id, counter_methods::INCREMENT, &amount)
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_messages_never_overlap() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let probe = Rc::new(Probe::default());
                let node = single_node(Rc::new(InMemoryStateStore::new()), probe.clone()).await;
                let id = ActorId::room(1);

                let calls: Vec<_> = (0..10)
                    .map(|_| {
                        let router = node.router().clone();
                        let id = id.clone();
                        tokio::task::spawn_local(async move {
                            router
                                .send_actor_request::<_, i64>(&id, counter_methods::INCREMENT, &1i64)
                                .await
                        })
                    })
                    .collect();
                for call in calls {
                    call.await.expect("join").expect("increment");
                }

                let value: i64 = node
                    .router()
                    .send_actor_request(&id, counter_methods::GET_VALUE, &())
                    .await
                    .expect("get value");
                assert_eq!(value, 10);
                assert_eq!(probe.max_in_flight.get(), 1);
                assert_eq!(node.host().activation_count(), 1);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_survives_reactivation() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let store = Rc::new(InMemoryStateStore::new());
                let node = single_node(store.clone(), Rc::new(Probe::default())).await;
                let id = ActorId::room(2);

                assert_eq!(increment(&node, &id, 5).await.expect("first"), 5);
                let first = node.host().incarnation_of(&id).expect("incarnation");

                assert!(node.host().deactivate(&id).await);
                assert!(!node.host().is_active(&id));
                assert_eq!(node.host().activation_count(), 0);

                assert_eq!(increment(&node, &id, 2).await.expect("second"), 7);
                let second = node.host().incarnation_of(&id).expect("incarnation");
                assert!(second > first);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_error_restores_state() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let node = single_node(Rc::new(InMemoryStateStore::new()), Rc::new(Probe::default())).await;
                let id = ActorId::room(3);

                increment(&node, &id, 1).await.expect("increment");
                let result: Result<(), ActorError> = node
                    .router()
                    .send_actor_request(&id, counter_methods::FAIL_AFTER_INCREMENT, &())
                    .await;
                assert!(matches!(result, Err(ActorError::HandlerError(reason)) if reason == "refused"));

                assert_eq!(increment(&node, &id, 1).await.expect("increment"), 2);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_method_is_not_retried() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let node = single_node(Rc::new(InMemoryStateStore::new()), Rc::new(Probe::default())).await;
                let result: Result<(), ActorError> = node
                    .router()
                    .send_actor_request(&ActorId::room(4), 99, &())
                    .await;
                assert!(matches!(result, Err(ActorError::UnknownMethod(99))));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregistered_kind_is_rejected() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let node = single_node(Rc::new(InMemoryStateStore::new()), Rc::new(Probe::default())).await;
                let result: Result<(), ActorError> = node
                    .router()
                    .send_actor_request(&ActorId::monster(1), 1, &())
                    .await;
                assert!(matches!(result, Err(ActorError::HandlerError(_))));
                assert_eq!(node.host().activation_count(), 0);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_tombstoned_actor_is_gone() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let node = single_node(Rc::new(InMemoryStateStore::new()), Rc::new(Probe::default())).await;
                let id = ActorId::room(5);

                increment(&node, &id, 1).await.expect("increment");
                let _: () = node
                    .router()
                    .send_actor_request(&id, counter_methods::RETIRE, &())
                    .await
                    .expect("retire");
                tokio::task::yield_now().await;

                let result = increment(&node, &id, 1).await;
                assert!(matches!(result, Err(ActorError::Gone(gone)) if gone == id));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_activation_is_collected() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let node = single_node(Rc::new(InMemoryStateStore::new()), Rc::new(Probe::default())).await;
                let id = ActorId::room(6);

                increment(&node, &id, 1).await.expect("increment");
                assert!(node.host().is_active(&id));

                tokio::time::sleep(Duration::from_secs(31)).await;
                assert!(!node.host().is_active(&id));
                assert_eq!(node.host().activation_count(), 0);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_outage_fails_activation_then_recovers() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let store = Rc::new(InMemoryStateStore::new());
                let node = single_node(store.clone(), Rc::new(Probe::default())).await;
                let id = ActorId::room(7);

                store.set_available(false);
                let result = increment(&node, &id, 1).await;
                assert!(matches!(result, Err(ActorError::Unavailable { .. })));
                assert_eq!(node.host().activation_count(), 0);

                store.set_available(true);
                assert_eq!(increment(&node, &id, 1).await.expect("recovered"), 1);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_activation_steps_aside() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let node = single_node(Rc::new(InMemoryStateStore::new()), Rc::new(Probe::default())).await;
                let id = ActorId::room(8);

                increment(&node, &id, 1).await.expect("increment");
                let first = node.host().incarnation_of(&id).expect("incarnation");

                // Another node takes over the directory entry.
                node.cluster()
                    .directory()
                    .register(&id, &NetworkAddress::localhost(4999))
                    .await
                    .expect("register");

                // The stale activation bounces, the retry activates afresh.
                assert_eq!(increment(&node, &id, 1).await.expect("retry"), 2);
                let second = node.host().incarnation_of(&id).expect("incarnation");
                assert!(second > first.next());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_collects_superseded_activation() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let node = single_node(Rc::new(InMemoryStateStore::new()), Rc::new(Probe::default())).await;
                let id = ActorId::room(9);

                increment(&node, &id, 1).await.expect("increment");
                node.cluster()
                    .directory()
                    .register(&id, &NetworkAddress::localhost(4999))
                    .await
                    .expect("register");

                assert_eq!(node.host().sweep().await, 1);
                tokio::task::yield_now().await;
                tokio::task::yield_now().await;
                assert!(!node.host().is_active(&id));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_loading_activation_is_neither_active_nor_swept() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let store = Rc::new(InMemoryStateStore::new());
                let node = single_node(store.clone(), Rc::new(Probe::default())).await;
                let id = ActorId::room(10);

                store.set_available(false);
                let router = node.router().clone();
                let target = id.clone();
                let call = tokio::task::spawn_local(async move {
                    router
                        .send_actor_request::<_, i64>(&target, counter_methods::INCREMENT, &1i64)
                        .await
                });
                for _ in 0..4 {
                    tokio::task::yield_now().await;
                }

                // First load failed; the activation waits out its backoff.
                assert_eq!(node.host().activation_state(&id), ActivationState::Activating);
                assert!(!node.host().is_active(&id));
                assert_eq!(node.host().sweep().await, 0);

                store.set_available(true);
                assert_eq!(call.await.expect("join").expect("increment"), 1);
                assert!(node.host().is_active(&id));
            })
            .await;
    }
}
