// Game facade
// What game code sees: submit actions, watch state. Behind it sits either
// a direct peer session or the frame boundary of an embedding room shell

use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::identity::{PeerId, RoomId};
use crate::net::connection::Role;
use crate::net::transport::Transport;
use crate::net::wire::{FrameEnvelope, IframeBody, IframeMessage, WireAction};
use crate::room::frame::FrameLink;
use crate::room::state::User;
use crate::state::logic::{decode_action, encode_action, StateLogic, SYNC_USERS_KIND};
use crate::state::store::{ActionMeta, StateStore, Versioned};
use crate::state::version::Version;
use crate::sync::session::{self, SessionHandle, SyncPolicy};

enum FacadeCmd<L: StateLogic> {
    Action(L::Action),
    Subscribe(Box<dyn FnMut(&L::State, Version) + Send>),
}

struct EmbeddedHandle<L: StateLogic> {
    cmd: mpsc::UnboundedSender<FacadeCmd<L>>,
    current: watch::Receiver<Versioned<L::State>>,
    // An embedded game has no link of its own; the shell gates the UI.
    connected: watch::Receiver<bool>,
    _connected_tx: std::sync::Arc<watch::Sender<bool>>,
}

enum GameInner<L: StateLogic> {
    Direct(SessionHandle<L>),
    Embedded(EmbeddedHandle<L>),
}

/// Per-game facade: `action` in, `on_state_change` out.
///
/// Always dispatches the well-known roster hook first so the game's logic
/// absorbs the room's users into its own player records before anything
/// else happens.
pub struct Game<L: StateLogic> {
    inner: GameInner<L>,
}

impl<L: StateLogic> Game<L> {
    /// Run over a direct peer session, for games that are their own page.
    #[allow(clippy::too_many_arguments)]
    pub fn direct<T: Transport>(
        logic: L,
        self_id: PeerId,
        room: RoomId,
        role: Role,
        policy: SyncPolicy,
        transport: T,
        config: &Config,
        roster: Vec<User>,
    ) -> Result<Self> {
        let session = session::spawn(logic, self_id, room, role, policy, transport, config)?;
        session.sync_users(roster)?;
        Ok(Self {
            inner: GameInner::Direct(session),
        })
    }

    /// Run embedded behind a room shell, talking only through the frame
    /// link handed out by `Room::attach_game`.
    pub fn embedded(
        logic: L,
        self_id: PeerId,
        game_name: &str,
        link: FrameLink,
        roster: Vec<User>,
    ) -> Self {
        let store = StateStore::new(logic, self_id.clone());
        let (current_tx, current_rx) = watch::channel(store.versioned());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (connected_tx, connected_rx) = watch::channel(true);

        tokio::spawn(run_embedded(
            store,
            self_id,
            game_name.to_string(),
            link,
            roster,
            cmd_rx,
            current_tx,
        ));

        Self {
            inner: GameInner::Embedded(EmbeddedHandle {
                cmd: cmd_tx,
                current: current_rx,
                connected: connected_rx,
                _connected_tx: std::sync::Arc::new(connected_tx),
            }),
        }
    }

    /// Submit an action on behalf of this player.
    pub fn action(&self, action: L::Action) -> Result<()> {
        match &self.inner {
            GameInner::Direct(session) => session.action(action),
            GameInner::Embedded(handle) => handle
                .cmd
                .send(FacadeCmd::Action(action))
                .map_err(|_| Error::SessionClosed),
        }
    }

    /// Register a change callback, invoked once per accepted action.
    pub fn on_state_change(
        &self,
        callback: impl FnMut(&L::State, Version) + Send + 'static,
    ) -> Result<()> {
        match &self.inner {
            GameInner::Direct(session) => session.on_state_change(callback),
            GameInner::Embedded(handle) => handle
                .cmd
                .send(FacadeCmd::Subscribe(Box::new(callback)))
                .map_err(|_| Error::SessionClosed),
        }
    }

    pub fn current(&self) -> Versioned<L::State> {
        match &self.inner {
            GameInner::Direct(session) => session.current(),
            GameInner::Embedded(handle) => handle.current.borrow().clone(),
        }
    }

    pub fn state_changes(&self) -> watch::Receiver<Versioned<L::State>> {
        match &self.inner {
            GameInner::Direct(session) => session.state_changes(),
            GameInner::Embedded(handle) => handle.current.clone(),
        }
    }

    pub fn connected(&self) -> watch::Receiver<bool> {
        match &self.inner {
            GameInner::Direct(session) => session.connected(),
            GameInner::Embedded(handle) => handle.connected.clone(),
        }
    }
}

/// The embedded driver: a state store fed entirely by frame messages.
///
/// Whether this peer is the authority is learned from the shell's viewer
/// decoration; until the first decorated message arrives we neither reduce
/// nor predict.
async fn run_embedded<L: StateLogic>(
    mut store: StateStore<L>,
    self_id: PeerId,
    game_name: String,
    mut link: FrameLink,
    roster: Vec<User>,
    mut cmd_rx: mpsc::UnboundedReceiver<FacadeCmd<L>>,
    current_tx: watch::Sender<Versioned<L::State>>,
) {
    store.subscribe(move |state, version| {
        current_tx.send_replace(Versioned {
            version,
            state: state.clone(),
        });
    });

    let mut viewer_is_host: Option<bool> = None;

    // The roster hook goes out before any game action.
    match serde_json::to_value(&roster) {
        Ok(payload) => post_action(
            &link,
            &game_name,
            WireAction::new(SYNC_USERS_KIND, payload, self_id.clone()),
        ),
        Err(e) => warn!("roster does not serialize: {e}"),
    }

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(FacadeCmd::Action(action)) => {
                    submit_action(&mut store, &self_id, viewer_is_host, &link, &game_name, &action);
                }
                Some(FacadeCmd::Subscribe(subscriber)) => store.subscribe(subscriber),
                None => return,
            },
            envelope = link.recv() => match envelope {
                Some(FrameEnvelope::IframeMessage(message)) => {
                    handle_shell_message(
                        &mut store,
                        &self_id,
                        &mut viewer_is_host,
                        &link,
                        &game_name,
                        message,
                    );
                }
                Some(other) => {
                    warn!(?other, "unexpected envelope from the shell, dropping");
                }
                None => return,
            },
        }
    }
}

/// Local action submission: predict when we are a client, then post toward
/// the shell. The authority applies on the echo.
fn submit_action<L: StateLogic>(
    store: &mut StateStore<L>,
    self_id: &PeerId,
    viewer_is_host: Option<bool>,
    link: &FrameLink,
    game_name: &str,
    action: &L::Action,
) {
    let wire = match encode_action(action) {
        Ok((kind, payload)) => WireAction::new(kind, payload, self_id.clone()),
        Err(e) => {
            warn!("action failed to encode: {e}");
            return;
        }
    };
    let wire = match viewer_is_host {
        // A client predicts now and tags the action with its versions.
        Some(false) => match store.predict(action, self_id) {
            Some((applied_on, claimed)) => wire.with_versions(applied_on, claimed),
            None => {
                debug!("local prediction rejected the action, submitting untagged");
                wire
            }
        },
        // The host applies on the echo; predicting here would double-apply.
        // Before the first decoration we do not know which we are.
        _ => wire,
    };
    post_action(link, game_name, wire);
}

fn post_action(link: &FrameLink, game_name: &str, action: WireAction) {
    link.post(FrameEnvelope::IframeMessage(IframeMessage {
        game_name: game_name.to_string(),
        body: IframeBody::Action { action },
        context: None,
    }));
}

fn handle_shell_message<L: StateLogic>(
    store: &mut StateStore<L>,
    self_id: &PeerId,
    viewer_is_host: &mut Option<bool>,
    link: &FrameLink,
    game_name: &str,
    message: IframeMessage,
) {
    if message.game_name != game_name {
        warn!(got = %message.game_name, "shell message for the wrong game, dropping");
        return;
    }
    if let Some(context) = &message.context {
        *viewer_is_host = Some(context.viewer_is_host);
    }

    match message.body {
        IframeBody::Action { action } => {
            if *viewer_is_host == Some(true) {
                host_apply(store, link, game_name, action);
            } else {
                // The echo of our own prediction; it was already applied
                // when we submitted. Anything else is noise.
                if action.actor != *self_id {
                    debug!(actor = %action.actor, "ignoring relayed action, we are not the authority");
                }
            }
        }
        IframeBody::ActionResult {
            action,
            result_state,
        } => {
            if *viewer_is_host == Some(true) {
                // We produced this; nothing to reconcile.
                return;
            }
            let typed: L::State = match serde_json::from_value(result_state.state) {
                Ok(state) => state,
                Err(e) => {
                    warn!("malformed result state, dropping: {e}");
                    return;
                }
            };
            let meta = ActionMeta {
                actor: action.actor,
                applied_on: action.applied_on_version,
                result: action.result_version,
            };
            let outcome = store.reconcile(
                Some(&meta),
                Versioned {
                    version: result_state.version,
                    state: typed,
                },
            );
            debug!(version = result_state.version.get(), ?outcome, "adopted authoritative state");
        }
    }
}

/// Authoritative application at the host's embedded game: reduce against
/// our own state and publish the result for the shell to broadcast.
fn host_apply<L: StateLogic>(
    store: &mut StateStore<L>,
    link: &FrameLink,
    game_name: &str,
    action: WireAction,
) {
    let snapshot = if action.kind == SYNC_USERS_KIND {
        match serde_json::from_value::<Vec<User>>(action.payload.clone()) {
            Ok(users) => match store.apply_roster(&users) {
                Some(snapshot) => snapshot,
                // An already-absorbed roster still gets answered; the
                // joiner needs the current state either way.
                None => store.versioned(),
            },
            Err(e) => {
                warn!("malformed roster payload, dropping: {e}");
                return;
            }
        }
    } else {
        let Some(typed) = decode_action::<L::Action>(&action.kind, &action.payload) else {
            warn!(kind = %action.kind, "unknown action kind, dropping");
            return;
        };
        match store.dispatch_authoritative(&typed, &action.actor) {
            Some(snapshot) => snapshot,
            None => {
                // Rejected: publish the unchanged state so a mispredicted
                // client rolls back.
                debug!(kind = %action.kind, actor = %action.actor, "action rejected");
                store.versioned()
            }
        }
    };

    let state = match serde_json::to_value(&snapshot.state) {
        Ok(value) => value,
        Err(e) => {
            warn!("state does not serialize: {e}");
            return;
        }
    };
    link.post(FrameEnvelope::IframeMessage(IframeMessage {
        game_name: game_name.to_string(),
        body: IframeBody::ActionResult {
            action,
            result_state: crate::net::wire::VersionedState {
                version: snapshot.version,
                state,
            },
        },
        context: None,
    }));
}
