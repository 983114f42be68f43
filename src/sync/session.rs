// Replicated state session
// Glues the connection manager and the state store: the host reduces and
// rebroadcasts, clients submit and reconcile

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::Result;
use crate::identity::{PeerId, RoomId};
use crate::net::connection::{
    ConnectionHandle, ConnectionId, ConnectionManager, LinkEvent, Role,
};
use crate::net::transport::Transport;
use crate::net::wire::{IframeBody, IframeMessage, PeerEnvelope, VersionedState, WireAction};
use crate::room::state::User;
use crate::state::logic::{decode_action, encode_action, StateLogic, SYNC_USERS_KIND};
use crate::state::store::{ActionMeta, StateStore, Versioned};
use crate::state::version::Version;

/// How clients treat their own actions while the host's verdict is in
/// flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncPolicy {
    /// Submit and wait: the local state only ever holds host snapshots.
    SnapshotOnly,
    /// Predict locally for responsiveness, reconcile on the broadcast.
    Optimistic,
}

enum SessionCmd<L: StateLogic> {
    Action(L::Action),
    SyncUsers(Vec<User>),
    Subscribe(Box<dyn FnMut(&L::State, Version) + Send>),
    Forward(PeerEnvelope),
}

/// Envelopes the session hands to an attached room relay.
pub(crate) enum RelayIn {
    /// An embedded-game message arrived from a peer.
    Message(String, IframeMessage),
    /// A peer whose actions we have seen dropped off.
    PeerLeft(PeerId),
}

pub(crate) struct RelayPorts {
    pub(crate) inbound: mpsc::UnboundedSender<RelayIn>,
}

/// Handle to a running session. Cloneable; the session tears down when the
/// last handle is dropped.
pub struct SessionHandle<L: StateLogic> {
    cmd: mpsc::UnboundedSender<SessionCmd<L>>,
    connected: watch::Receiver<bool>,
    current: watch::Receiver<Versioned<L::State>>,
    role: Role,
    self_id: PeerId,
}

impl<L: StateLogic> Clone for SessionHandle<L> {
    fn clone(&self) -> Self {
        Self {
            cmd: self.cmd.clone(),
            connected: self.connected.clone(),
            current: self.current.clone(),
            role: self.role,
            self_id: self.self_id.clone(),
        }
    }
}

impl<L: StateLogic> SessionHandle<L> {
    /// Submit an action. On the host it reduces immediately; on a client
    /// it is predicted (policy permitting) and sent to the host.
    pub fn action(&self, action: L::Action) -> Result<()> {
        self.cmd
            .send(SessionCmd::Action(action))
            .map_err(|_| crate::error::Error::SessionClosed)
    }

    /// Dispatch the well-known roster hook with the room's current users.
    pub fn sync_users(&self, users: Vec<User>) -> Result<()> {
        self.cmd
            .send(SessionCmd::SyncUsers(users))
            .map_err(|_| crate::error::Error::SessionClosed)
    }

    /// Register a change callback, invoked once per accepted action.
    pub fn on_state_change(
        &self,
        callback: impl FnMut(&L::State, Version) + Send + 'static,
    ) -> Result<()> {
        self.cmd
            .send(SessionCmd::Subscribe(Box::new(callback)))
            .map_err(|_| crate::error::Error::SessionClosed)
    }

    /// The latest locally known state snapshot.
    pub fn current(&self) -> Versioned<L::State> {
        self.current.borrow().clone()
    }

    /// Watch the state as it changes; good for awaiting convergence.
    pub fn state_changes(&self) -> watch::Receiver<Versioned<L::State>> {
        self.current.clone()
    }

    /// Watchable connected flag for UI gating.
    pub fn connected(&self) -> watch::Receiver<bool> {
        self.connected.clone()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn self_id(&self) -> &PeerId {
        &self.self_id
    }

    /// Route an already-built envelope outward: broadcast from the host,
    /// uplink from a client. Used by the room relay.
    pub(crate) fn forward(&self, envelope: PeerEnvelope) -> Result<()> {
        self.cmd
            .send(SessionCmd::Forward(envelope))
            .map_err(|_| crate::error::Error::SessionClosed)
    }
}

/// Start a session for `logic` in `room`. The composition root owns the
/// returned handle; there is no ambient registry of sessions.
pub fn spawn<L, T>(
    logic: L,
    self_id: PeerId,
    room: RoomId,
    role: Role,
    policy: SyncPolicy,
    transport: T,
    config: &Config,
) -> Result<SessionHandle<L>>
where
    L: StateLogic,
    T: Transport,
{
    spawn_with_relay(logic, self_id, room, role, policy, transport, config, None)
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn spawn_with_relay<L, T>(
    logic: L,
    self_id: PeerId,
    room: RoomId,
    role: Role,
    policy: SyncPolicy,
    transport: T,
    config: &Config,
    relay: Option<RelayPorts>,
) -> Result<SessionHandle<L>>
where
    L: StateLogic,
    T: Transport,
{
    let mut store = StateStore::new(logic, self_id.clone());

    // Published copy of the current snapshot in wire form; the connection
    // layer reads it when greeting late joiners.
    let initial_wire = VersionedState {
        version: store.version(),
        state: serde_json::to_value(store.state())?,
    };
    let snapshot_cell = Arc::new(Mutex::new(initial_wire));
    let (current_tx, current_rx) = watch::channel(store.versioned());

    {
        let snapshot_cell = snapshot_cell.clone();
        store.subscribe(move |state, version| {
            match serde_json::to_value(state) {
                Ok(value) => {
                    let mut cell = snapshot_cell.lock().expect("snapshot cell poisoned");
                    *cell = VersionedState {
                        version,
                        state: value,
                    };
                }
                Err(e) => warn!("state does not serialize: {e}"),
            }
            current_tx.send_replace(Versioned {
                version,
                state: state.clone(),
            });
        });
    }

    let manager = ConnectionManager::new(transport, config.network.clone());
    let snapshot_source: crate::net::connection::SnapshotSource = {
        let snapshot_cell = snapshot_cell.clone();
        Arc::new(move || snapshot_cell.lock().expect("snapshot cell poisoned").clone())
    };
    let mut connection = manager.connect(self_id.clone(), room, role, snapshot_source)?;
    let events = connection
        .take_events()
        .expect("fresh connection has its event stream");
    let connected = connection.connected();

    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    tokio::spawn(run_session(
        store,
        self_id.clone(),
        role,
        policy,
        connection,
        events,
        cmd_rx,
        relay,
    ));

    Ok(SessionHandle {
        cmd: cmd_tx,
        connected,
        current: current_rx,
        role,
        self_id,
    })
}

#[allow(clippy::too_many_arguments)]
async fn run_session<L: StateLogic>(
    mut store: StateStore<L>,
    self_id: PeerId,
    role: Role,
    policy: SyncPolicy,
    connection: ConnectionHandle,
    mut events: mpsc::UnboundedReceiver<LinkEvent>,
    mut cmd_rx: mpsc::UnboundedReceiver<SessionCmd<L>>,
    relay: Option<RelayPorts>,
) {
    // Which peer id speaks on which channel, learned from their actions.
    let mut actors: HashMap<ConnectionId, PeerId> = HashMap::new();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(SessionCmd::Action(action)) => {
                    handle_local_action(&mut store, &self_id, role, policy, &connection, &action);
                }
                Some(SessionCmd::SyncUsers(users)) => {
                    handle_local_sync_users(&mut store, &self_id, role, &connection, users);
                }
                Some(SessionCmd::Subscribe(subscriber)) => {
                    store.subscribe(subscriber);
                }
                Some(SessionCmd::Forward(envelope)) => {
                    let _ = match role {
                        Role::Host => connection.broadcast(envelope),
                        Role::Client => connection.send(envelope),
                    };
                }
                None => return,
            },
            event = events.recv() => match event {
                Some(LinkEvent::Message(id, envelope)) => {
                    handle_envelope(&mut store, role, &connection, &mut actors, &relay, id, envelope);
                }
                Some(LinkEvent::PeerConnected(_)) => {
                    // The catch-up snapshot already went out at the
                    // connection layer; nothing to do here.
                }
                Some(LinkEvent::PeerDisconnected(id)) => {
                    if let (Some(actor), Some(relay)) = (actors.remove(&id), relay.as_ref()) {
                        let _ = relay.inbound.send(RelayIn::PeerLeft(actor));
                    }
                }
                None => return,
            },
        }
    }
}

fn make_wire<A: serde::Serialize>(action: &A, actor: &PeerId) -> Option<WireAction> {
    match encode_action(action) {
        Ok((kind, payload)) => Some(WireAction::new(kind, payload, actor.clone())),
        Err(e) => {
            warn!("action failed to encode: {e}");
            None
        }
    }
}

fn wire_snapshot<S: serde::Serialize>(snapshot: &Versioned<S>) -> Option<VersionedState> {
    match serde_json::to_value(&snapshot.state) {
        Ok(value) => Some(VersionedState {
            version: snapshot.version,
            state: value,
        }),
        Err(e) => {
            warn!("state does not serialize: {e}");
            None
        }
    }
}

fn handle_local_action<L: StateLogic>(
    store: &mut StateStore<L>,
    self_id: &PeerId,
    role: Role,
    policy: SyncPolicy,
    connection: &ConnectionHandle,
    action: &L::Action,
) {
    let Some(wire) = make_wire(action, self_id) else {
        return;
    };
    match role {
        Role::Host => {
            if let Some(snapshot) = store.dispatch_authoritative(action, self_id) {
                broadcast_state(connection, Some(wire), &snapshot);
            }
        }
        Role::Client => {
            let wire = match policy {
                SyncPolicy::Optimistic => match store.predict(action, self_id) {
                    Some((applied_on, claimed)) => wire.with_versions(applied_on, claimed),
                    None => {
                        // Our copy may be stale; let the host decide.
                        debug!("local prediction rejected the action, submitting untagged");
                        wire
                    }
                },
                SyncPolicy::SnapshotOnly => wire,
            };
            let _ = connection.send(PeerEnvelope::Action { action: wire });
        }
    }
}

fn handle_local_sync_users<L: StateLogic>(
    store: &mut StateStore<L>,
    self_id: &PeerId,
    role: Role,
    connection: &ConnectionHandle,
    users: Vec<User>,
) {
    let payload = match serde_json::to_value(&users) {
        Ok(value) => value,
        Err(e) => {
            warn!("roster does not serialize: {e}");
            return;
        }
    };
    let wire = WireAction::new(SYNC_USERS_KIND, payload, self_id.clone());
    match role {
        Role::Host => {
            if let Some(snapshot) = store.apply_roster(&users) {
                broadcast_state(connection, Some(wire), &snapshot);
            }
        }
        Role::Client => {
            // Roster sync is never predicted; the host's result lands as a
            // plain snapshot adoption.
            let _ = connection.send(PeerEnvelope::Action { action: wire });
        }
    }
}

fn broadcast_state<S: serde::Serialize>(
    connection: &ConnectionHandle,
    action: Option<WireAction>,
    snapshot: &Versioned<S>,
) {
    let Some(result_state) = wire_snapshot(snapshot) else {
        return;
    };
    let _ = connection.broadcast(PeerEnvelope::State {
        action,
        result_state,
    });
}

fn handle_envelope<L: StateLogic>(
    store: &mut StateStore<L>,
    role: Role,
    connection: &ConnectionHandle,
    actors: &mut HashMap<ConnectionId, PeerId>,
    relay: &Option<RelayPorts>,
    id: ConnectionId,
    envelope: PeerEnvelope,
) {
    match (role, envelope) {
        (Role::Host, PeerEnvelope::Action { action }) => {
            actors.insert(id, action.actor.clone());
            host_dispatch(store, connection, id, action);
        }
        (Role::Host, PeerEnvelope::State { .. }) => {
            warn!(connection = id.get(), "peer sent authoritative state, dropping");
        }
        (Role::Client, PeerEnvelope::State {
            action,
            result_state,
        }) => {
            client_reconcile(store, action, result_state);
        }
        (Role::Client, PeerEnvelope::Action { .. }) => {
            warn!("host channel delivered an action submission, dropping");
        }
        (_, PeerEnvelope::IframeRelay { game_name, message }) => {
            if let IframeBody::Action { action } | IframeBody::ActionResult { action, .. } =
                &message.body
            {
                actors.insert(id, action.actor.clone());
            }
            match relay {
                Some(relay) => {
                    let _ = relay.inbound.send(RelayIn::Message(game_name, message));
                }
                None => warn!("no game relay attached, dropping relayed message"),
            }
        }
    }
}

/// Host-side handling of one submitted action: reduce against our own
/// state no matter what the client predicted, then rebroadcast.
fn host_dispatch<L: StateLogic>(
    store: &mut StateStore<L>,
    connection: &ConnectionHandle,
    from: ConnectionId,
    action: WireAction,
) {
    if action.kind == SYNC_USERS_KIND {
        match serde_json::from_value::<Vec<User>>(action.payload.clone()) {
            Ok(users) => match store.apply_roster(&users) {
                Some(snapshot) => broadcast_state(connection, Some(action), &snapshot),
                // An already-absorbed roster still gets answered so the
                // submitter holds the current state.
                None => {
                    if let Some(result_state) = wire_snapshot(&store.versioned()) {
                        let _ = connection.send_to(
                            from,
                            PeerEnvelope::State {
                                action: Some(action),
                                result_state,
                            },
                        );
                    }
                }
            },
            Err(e) => warn!("malformed roster payload, dropping: {e}"),
        }
        return;
    }

    let Some(typed) = decode_action::<L::Action>(&action.kind, &action.payload) else {
        warn!(kind = %action.kind, "unknown action kind, dropping");
        return;
    };
    match store.dispatch_authoritative(&typed, &action.actor) {
        Some(snapshot) => broadcast_state(connection, Some(action), &snapshot),
        None => {
            // Rejected by a reducer guard: state and version unchanged.
            // Answer the submitter with the current snapshot so a
            // mispredicted client rolls back.
            debug!(kind = %action.kind, actor = %action.actor, "action rejected");
            if let Some(result_state) = wire_snapshot(&store.versioned()) {
                let _ = connection.send_to(
                    from,
                    PeerEnvelope::State {
                        action: Some(action),
                        result_state,
                    },
                );
            }
        }
    }
}

fn client_reconcile<L: StateLogic>(
    store: &mut StateStore<L>,
    action: Option<WireAction>,
    result_state: VersionedState,
) {
    let typed: L::State = match serde_json::from_value(result_state.state) {
        Ok(state) => state,
        Err(e) => {
            warn!("malformed state snapshot, dropping: {e}");
            return;
        }
    };
    let meta = action.map(|a| ActionMeta {
        actor: a.actor,
        applied_on: a.applied_on_version,
        result: a.result_version,
    });
    let outcome = store.reconcile(
        meta.as_ref(),
        Versioned {
            version: result_state.version,
            state: typed,
        },
    );
    debug!(version = result_state.version.get(), ?outcome, "adopted authoritative state");
}
