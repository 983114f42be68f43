// Replicated state store
// Owns the local copy of shared state; all mutation funnels through here

use tracing::debug;

use crate::identity::PeerId;
use crate::room::state::User;
use crate::state::logic::StateLogic;
use crate::state::version::Version;

/// A state snapshot paired with the version that produced it.
#[derive(Clone, Debug, PartialEq)]
pub struct Versioned<S> {
    pub version: Version,
    pub state: S,
}

/// Version tags carried on an action envelope, as seen by reconciliation.
#[derive(Clone, Debug, PartialEq)]
pub struct ActionMeta {
    pub actor: PeerId,
    pub applied_on: Option<Version>,
    pub result: Option<Version>,
}

/// What happened to the local state when an authoritative broadcast landed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reconciliation {
    /// The broadcast confirmed our own pending prediction.
    Confirmed,
    /// A prediction was pending but the broadcast did not match it; the
    /// prediction was discarded and the snapshot adopted wholesale.
    Replaced,
    /// No prediction was pending; the snapshot was simply adopted.
    Applied,
}

/// The latest local prediction, awaiting the host's verdict.
struct Prediction {
    applied_on: Version,
    claimed: Version,
}

type Subscriber<S> = Box<dyn FnMut(&S, Version) + Send>;

/// Holds the authoritative (host) or locally reconciled (client) state.
///
/// Single-writer discipline: only this store's methods mutate state, and
/// every accepted mutation publishes exactly one change notification,
/// synchronously, before returning.
pub struct StateStore<L: StateLogic> {
    logic: L,
    self_id: PeerId,
    state: L::State,
    version: Version,
    /// Last host-assigned version; trails `version` only while a local
    /// prediction is outstanding.
    confirmed: Version,
    pending: Option<Prediction>,
    subscribers: Vec<Subscriber<L::State>>,
}

impl<L: StateLogic> StateStore<L> {
    pub fn new(logic: L, self_id: PeerId) -> Self {
        let state = logic.initial_state();
        Self {
            logic,
            self_id,
            state,
            version: Version::INITIAL,
            confirmed: Version::INITIAL,
            pending: None,
            subscribers: Vec::new(),
        }
    }

    pub fn state(&self) -> &L::State {
        &self.state
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn confirmed_version(&self) -> Version {
        self.confirmed
    }

    pub fn versioned(&self) -> Versioned<L::State> {
        Versioned {
            version: self.version,
            state: self.state.clone(),
        }
    }

    /// Register a change subscriber. Called once per accepted action with
    /// the new state and its version.
    pub fn subscribe(&mut self, subscriber: impl FnMut(&L::State, Version) + Send + 'static) {
        self.subscribers.push(Box::new(subscriber));
    }

    fn notify(&mut self) {
        for subscriber in &mut self.subscribers {
            subscriber(&self.state, self.version);
        }
    }

    /// Host-side dispatch: reduce against the authoritative state and stamp
    /// the next version. Returns the snapshot to broadcast, or `None` when
    /// the reducer rejects the action.
    pub fn dispatch_authoritative(
        &mut self,
        action: &L::Action,
        actor: &PeerId,
    ) -> Option<Versioned<L::State>> {
        let next = self.logic.reduce(&self.state, action, actor)?;
        self.version = self.version.next();
        self.confirmed = self.version;
        self.state = next;
        self.notify();
        Some(self.versioned())
    }

    /// Host-side roster hook: absorb the room's user list through the
    /// game's `sync_users` reducer.
    pub fn apply_roster(&mut self, users: &[User]) -> Option<Versioned<L::State>> {
        let next = self.logic.sync_users(&self.state, users)?;
        self.version = self.version.next();
        self.confirmed = self.version;
        self.state = next;
        self.notify();
        Some(self.versioned())
    }

    /// Client-side optimistic apply. Reduces immediately for responsiveness
    /// and records the base and claimed versions for the outgoing action.
    /// `None` when the local reducer rejects; the caller decides whether to
    /// still submit the action.
    pub fn predict(&mut self, action: &L::Action, actor: &PeerId) -> Option<(Version, Version)> {
        let next = self.logic.reduce(&self.state, action, actor)?;
        let applied_on = self.version;
        let claimed = self.version.next();
        self.version = claimed;
        self.state = next;
        self.pending = Some(Prediction {
            applied_on,
            claimed,
        });
        self.notify();
        Some((applied_on, claimed))
    }

    /// Adopt an authoritative snapshot from the host.
    ///
    /// The snapshot always wins; the returned label records whether it
    /// confirmed our pending prediction, replaced it wholesale, or landed
    /// with nothing outstanding. There is never a three-way merge.
    pub fn reconcile(
        &mut self,
        meta: Option<&ActionMeta>,
        snapshot: Versioned<L::State>,
    ) -> Reconciliation {
        let outcome = match (self.pending.take(), meta) {
            // The snapshot version must equal the claimed version too: a
            // rejected action comes back with our own tags but the host's
            // unchanged state.
            (Some(pending), Some(meta))
                if meta.actor == self.self_id
                    && meta.applied_on == Some(pending.applied_on)
                    && meta.result == Some(pending.claimed)
                    && snapshot.version == pending.claimed =>
            {
                Reconciliation::Confirmed
            }
            (Some(_), _) => Reconciliation::Replaced,
            (None, _) => Reconciliation::Applied,
        };
        if outcome == Reconciliation::Replaced {
            debug!(
                version = snapshot.version.get(),
                "local prediction was stale, adopting authoritative state"
            );
        }
        let changed = snapshot.version != self.version || snapshot.state != self.state;
        self.version = snapshot.version;
        self.confirmed = snapshot.version;
        self.state = snapshot.state;
        if changed {
            self.notify();
        }
        outcome
    }
}
