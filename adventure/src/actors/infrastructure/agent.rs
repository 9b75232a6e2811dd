//! Cluster membership protocol.
//!
//! One [`MembershipAgent`] runs per node. It joins the shared
//! [`MembershipTable`], refreshes its own heartbeat every interval, and scans
//! the table for peers whose heartbeat went stale.
//!
//! # Failure detection
//!
//! A peer is stale once `now - last_heartbeat` exceeds
//! `missed_heartbeats_limit × heartbeat_interval`. The first observation marks
//! it `Suspect`; a second independent observation (another node, or the same
//! node at least one interval later) marks it `Dead`. A heartbeat from the
//! suspect clears its suspicions. `Dead` rows are deleted after a grace period.
//!
//! # Views
//!
//! The agent keeps a [`MembershipView`] of `Active` nodes. Each time the set
//! of `(address, generation)` pairs changes, the epoch goes up by one and
//! subscribers receive a [`ViewChange`]. Views are eventually consistent
//! across nodes; placement copes with disagreement through incarnation
//! fencing.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashSet};
use std::rc::Rc;
use std::time::Duration;

use crate::NetworkAddress;
use crate::time::TimeProvider;

use super::membership::{
    MembershipEntry, MembershipError, MembershipTable, MembershipView, NodeStatus, Suspicion,
    VersionedEntry,
};

/// Attempts for read-modify-write cycles on the local row.
const WRITE_ATTEMPTS: usize = 3;

/// Callback invoked on every view change.
pub type ViewChangeCallback = Box<dyn Fn(&ViewChange)>;

/// Membership tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipConfig {
    /// How often the local heartbeat is written and peers are scanned.
    pub heartbeat_interval: Duration,
    /// Missed intervals after which a peer counts as stale.
    pub missed_heartbeats_limit: u32,
    /// Suspicions needed to declare a peer `Dead`.
    pub suspicion_confirmations: usize,
    /// How long `Dead` rows stay in the table.
    pub dead_entry_grace: Duration,
}

impl MembershipConfig {
    /// Silence after which a peer is considered stale.
    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_interval * self.missed_heartbeats_limit
    }
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(1),
            missed_heartbeats_limit: 3,
            suspicion_confirmations: 2,
            dead_entry_grace: Duration::from_secs(60),
        }
    }
}

/// A view transition delivered to subscribers.
///
/// Also delivered without an epoch bump when nodes that already left the
/// view are confirmed dead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewChange {
    /// The new view.
    pub view: MembershipView,
    /// Nodes that entered the view.
    pub added: Vec<NetworkAddress>,
    /// Nodes that left the view (dead, suspected, or restarted).
    pub removed: Vec<NetworkAddress>,
    /// Removed nodes that are known dead: their activations are gone.
    pub dead: Vec<NetworkAddress>,
}

/// Per-node membership protocol driver.
pub struct MembershipAgent {
    local: NetworkAddress,
    name: String,
    table: Rc<dyn MembershipTable>,
    time: Rc<dyn TimeProvider>,
    config: MembershipConfig,
    generation: Cell<u64>,
    view: RefCell<MembershipView>,
    pending_dead: RefCell<BTreeSet<NetworkAddress>>,
    subscribers: RefCell<Vec<ViewChangeCallback>>,
    evicted: Cell<bool>,
    stopped: Cell<bool>,
}

impl std::fmt::Debug for MembershipAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MembershipAgent")
            .field("local", &self.local)
            .field("generation", &self.generation.get())
            .field("epoch", &self.view.borrow().epoch)
            .field("evicted", &self.evicted.get())
            .finish()
    }
}

impl MembershipAgent {
    /// Create an agent for the node at `local`. Nothing is written until
    /// [`join`](Self::join).
    pub fn new(
        local: NetworkAddress,
        name: impl Into<String>,
        table: Rc<dyn MembershipTable>,
        time: Rc<dyn TimeProvider>,
        config: MembershipConfig,
    ) -> Self {
        Self {
            local,
            name: name.into(),
            table,
            time,
            config,
            generation: Cell::new(0),
            view: RefCell::new(MembershipView::default()),
            pending_dead: RefCell::new(BTreeSet::new()),
            subscribers: RefCell::new(Vec::new()),
            evicted: Cell::new(false),
            stopped: Cell::new(false),
        }
    }

    /// This node's address.
    pub fn local_address(&self) -> &NetworkAddress {
        &self.local
    }

    /// Generation written by the last successful join (0 before joining).
    pub fn generation(&self) -> u64 {
        self.generation.get()
    }

    /// Membership tuning in use.
    pub fn config(&self) -> &MembershipConfig {
        &self.config
    }

    /// The latest view this node has computed.
    pub fn current_view(&self) -> MembershipView {
        self.view.borrow().clone()
    }

    /// Whether the table has declared this node dead.
    pub fn is_evicted(&self) -> bool {
        self.evicted.get()
    }

    /// Subscribe to view changes.
    pub fn on_view_changed(&self, callback: ViewChangeCallback) {
        self.subscribers.borrow_mut().push(callback);
    }

    /// Register this node: `Joining`, then `Active`, with a generation one
    /// above whatever a previous process at this address used.
    pub async fn join(&self) -> Result<MembershipView, MembershipError> {
        let now = self.time.now();
        let previous = self.table.read_entry(&self.local).await?;
        let generation = previous
            .as_ref()
            .map(|row| row.entry.generation + 1)
            .unwrap_or(1);

        let mut entry = MembershipEntry {
            address: self.local.clone(),
            generation,
            status: NodeStatus::Joining,
            last_heartbeat: now,
            status_changed_at: now,
            suspicions: Vec::new(),
            name: self.name.clone(),
        };
        let version = self
            .table
            .write_entry(entry.clone(), previous.map(|row| row.version))
            .await?;
        self.generation.set(generation);

        entry.status = NodeStatus::Active;
        self.table.write_entry(entry, Some(version)).await?;
        self.evicted.set(false);
        self.stopped.set(false);

        tracing::info!(node = %self.local, generation, "joined cluster");
        self.refresh_view().await
    }

    /// Refresh the local row's heartbeat and clear any suspicion.
    ///
    /// Fails with [`MembershipError::Evicted`] once the row is `Dead`, gone,
    /// or owned by a newer generation.
    pub async fn heartbeat(&self) -> Result<(), MembershipError> {
        if self.generation.get() == 0 {
            return Err(MembershipError::NotFound {
                address: self.local.clone(),
            });
        }

        for _ in 0..WRITE_ATTEMPTS {
            let Some(row) = self.table.read_entry(&self.local).await? else {
                return Err(self.mark_evicted());
            };
            if row.entry.generation != self.generation.get()
                || row.entry.status == NodeStatus::Dead
            {
                return Err(self.mark_evicted());
            }

            let now = self.time.now();
            let mut entry = row.entry;
            entry.last_heartbeat = now;
            entry.suspicions.clear();
            if entry.status != NodeStatus::Active {
                tracing::info!(node = %self.local, from = %entry.status, "cleared suspicion");
                entry.status = NodeStatus::Active;
                entry.status_changed_at = now;
            }

            match self.table.write_entry(entry, Some(row.version)).await {
                Ok(_) => return Ok(()),
                Err(MembershipError::VersionConflict { .. }) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(MembershipError::VersionConflict {
            address: self.local.clone(),
        })
    }

    /// Scan the table once: suspect or kill stale peers, delete expired
    /// `Dead` rows, then refresh the view.
    pub async fn probe(&self) -> Result<MembershipView, MembershipError> {
        let now = self.time.now();
        let timeout = self.config.heartbeat_timeout();

        for row in self.table.read_all().await? {
            if row.entry.address == self.local {
                continue;
            }

            if row.entry.status == NodeStatus::Dead {
                if now.saturating_sub(row.entry.status_changed_at) > self.config.dead_entry_grace {
                    self.remove_dead(row).await?;
                }
            } else if now.saturating_sub(row.entry.last_heartbeat) > timeout {
                self.suspect(row, now).await?;
            }
        }

        self.refresh_view().await
    }

    /// Recompute the view from the table and notify subscribers if the
    /// active set changed, or if nodes that left earlier are now known dead.
    pub async fn refresh_view(&self) -> Result<MembershipView, MembershipError> {
        let rows = self.table.read_all().await?;
        let is_dead = |address: &NetworkAddress| {
            rows.iter()
                .find(|row| &row.entry.address == address)
                .is_none_or(|row| row.entry.status == NodeStatus::Dead)
        };

        let mut members: Vec<MembershipEntry> = rows
            .iter()
            .filter(|row| row.entry.is_active())
            .map(|row| row.entry.clone())
            .collect();
        members.sort_by(|a, b| a.address.cmp(&b.address));

        let change = {
            let mut view = self.view.borrow_mut();
            let mut pending = self.pending_dead.borrow_mut();

            let before: HashSet<(NetworkAddress, u64)> = view
                .members
                .iter()
                .map(|m| (m.address.clone(), m.generation))
                .collect();
            let after: HashSet<(NetworkAddress, u64)> = members
                .iter()
                .map(|m| (m.address.clone(), m.generation))
                .collect();

            let mut added: Vec<NetworkAddress> = after
                .difference(&before)
                .map(|(address, _)| address.clone())
                .collect();
            let mut removed: Vec<NetworkAddress> = before
                .difference(&after)
                .map(|(address, _)| address.clone())
                .collect();
            added.sort();
            removed.sort();

            // Nodes that left the view stay pending until their row is dead
            // or gone; a node that comes back is no longer pending.
            pending.extend(removed.iter().cloned());
            pending.retain(|address| !view_contains(&members, address));
            let dead: Vec<NetworkAddress> = pending
                .iter()
                .filter(|address| is_dead(address))
                .cloned()
                .collect();
            for address in &dead {
                pending.remove(address);
            }

            if before == after && dead.is_empty() {
                return Ok(view.clone());
            }
            if before != after {
                view.epoch += 1;
                view.members = members;
            }
            ViewChange {
                view: view.clone(),
                added,
                removed,
                dead,
            }
        };

        tracing::info!(
            node = %self.local,
            epoch = change.view.epoch,
            members = ?change.view.addresses(),
            removed = ?change.removed,
            dead = ?change.dead,
            "membership view changed"
        );

        for callback in self.subscribers.borrow().iter() {
            callback(&change);
        }
        Ok(change.view)
    }

    /// Gracefully leave: mark the local row `Dead` and stop the loop.
    pub async fn leave(&self) -> Result<(), MembershipError> {
        self.stopped.set(true);

        for _ in 0..WRITE_ATTEMPTS {
            let Some(row) = self.table.read_entry(&self.local).await? else {
                return Ok(());
            };
            if row.entry.generation != self.generation.get() {
                return Ok(());
            }

            let now = self.time.now();
            let mut entry = row.entry;
            entry.status = NodeStatus::Dead;
            entry.status_changed_at = now;

            match self.table.write_entry(entry, Some(row.version)).await {
                Ok(_) => {
                    tracing::info!(node = %self.local, "left cluster");
                    return Ok(());
                }
                Err(MembershipError::VersionConflict { .. }) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(MembershipError::VersionConflict {
            address: self.local.clone(),
        })
    }

    /// Stop the background loop without touching the table.
    pub fn stop(&self) {
        self.stopped.set(true);
    }

    /// Background loop: heartbeat then probe, once per interval, until
    /// stopped or evicted.
    pub async fn run(self: Rc<Self>) {
        loop {
            self.time.sleep(self.config.heartbeat_interval).await;
            if self.stopped.get() {
                break;
            }

            match self.heartbeat().await {
                Ok(()) => {}
                Err(MembershipError::Evicted { .. }) => {
                    if let Err(e) = self.refresh_view().await {
                        tracing::warn!(node = %self.local, error = %e, "view refresh failed");
                    }
                    break;
                }
                Err(e) => tracing::warn!(node = %self.local, error = %e, "heartbeat failed"),
            }

            if let Err(e) = self.probe().await {
                tracing::warn!(node = %self.local, error = %e, "membership probe failed");
            }
        }
        tracing::debug!(node = %self.local, "membership loop stopped");
    }

    fn mark_evicted(&self) -> MembershipError {
        if !self.evicted.replace(true) {
            tracing::warn!(node = %self.local, "local node declared dead by the cluster");
        }
        MembershipError::Evicted {
            address: self.local.clone(),
        }
    }

    async fn suspect(&self, row: VersionedEntry, now: Duration) -> Result<(), MembershipError> {
        let mut entry = row.entry;

        // Same observer needs a full interval between confirmations.
        let too_soon = entry.suspicions.iter().any(|s| {
            s.by == self.local && now.saturating_sub(s.at) < self.config.heartbeat_interval
        });
        if too_soon {
            return Ok(());
        }

        entry.suspicions.push(Suspicion {
            by: self.local.clone(),
            at: now,
        });
        let next = if entry.suspicions.len() >= self.config.suspicion_confirmations {
            NodeStatus::Dead
        } else {
            NodeStatus::Suspect
        };
        if next != entry.status {
            entry.status = next;
            entry.status_changed_at = now;
        }

        let address = entry.address.clone();
        let suspicions = entry.suspicions.len();
        match self.table.write_entry(entry, Some(row.version)).await {
            Ok(_) => {
                tracing::warn!(
                    monitor = %self.local,
                    node = %address,
                    status = %next,
                    suspicions,
                    "stale heartbeat"
                );
                Ok(())
            }
            // Someone else touched the row; the next probe re-evaluates it.
            Err(MembershipError::VersionConflict { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn remove_dead(&self, row: VersionedEntry) -> Result<(), MembershipError> {
        match self
            .table
            .delete_entry(&row.entry.address, row.version)
            .await
        {
            Ok(()) => {
                tracing::debug!(monitor = %self.local, node = %row.entry.address, "removed dead entry");
                Ok(())
            }
            Err(MembershipError::VersionConflict { .. } | MembershipError::NotFound { .. }) => {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn view_contains(members: &[MembershipEntry], address: &NetworkAddress) -> bool {
    members.iter().any(|m| &m.address == address)
}
