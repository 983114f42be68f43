// Room relay
// Party-shell side: replicates the roster and multiplexes the embedded
// game's messages between its frame and the other peers

use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::Result;
use crate::identity::{PeerId, Profile, RoomId};
use crate::net::connection::Role;
use crate::net::transport::Transport;
use crate::net::wire::{
    FrameEnvelope, IframeBody, IframeMessage, PeerEnvelope, ViewerContext,
};
use crate::room::frame::{frame_pair, FrameLink};
use crate::room::state::{RoomAction, RoomLogic, RoomState, User};
use crate::state::store::Versioned;
use crate::state::version::Version;
use crate::sync::session::{self, RelayIn, RelayPorts, SessionHandle, SyncPolicy};

enum RelayCmd {
    Attach { game_name: String, link: FrameLink },
    Detach,
}

/// A running party room. Owns the roster session and the relay loop; games
/// attach through `attach_game` and talk only to their frame link.
pub struct Room {
    session: SessionHandle<RoomLogic>,
    cmd: mpsc::UnboundedSender<RelayCmd>,
    self_user: User,
}

impl Room {
    /// Join (or host) `room_id` as the player described by `profile`.
    pub fn spawn<T: Transport>(
        profile: Profile,
        room_id: RoomId,
        role: Role,
        transport: T,
        config: &Config,
    ) -> Result<Room> {
        let self_id = profile.id.clone();
        let (relay_tx, relay_rx) = mpsc::unbounded_channel();
        let session = session::spawn_with_relay(
            RoomLogic,
            self_id.clone(),
            room_id,
            role,
            SyncPolicy::SnapshotOnly,
            transport,
            config,
            Some(RelayPorts { inbound: relay_tx }),
        )?;

        let mut user = User::new(profile.id, &profile.name, &profile.color, &profile.emoji);
        if role == Role::Host {
            user = user.host();
        }
        session.action(RoomAction::UserJoin { user: user.clone() })?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_relay(
            session.clone(),
            role,
            self_id,
            relay_rx,
            cmd_rx,
        ));

        Ok(Room {
            session,
            cmd: cmd_tx,
            self_user: user,
        })
    }

    /// Attach the currently selected game. Returns the game's end of the
    /// frame boundary; any previously attached game is detached.
    pub fn attach_game(&self, game_name: &str) -> FrameLink {
        let (shell_end, game_end) = frame_pair();
        let _ = self.cmd.send(RelayCmd::Attach {
            game_name: game_name.to_string(),
            link: shell_end,
        });
        game_end
    }

    pub fn detach_game(&self) {
        let _ = self.cmd.send(RelayCmd::Detach);
    }

    /// Switch the party to another game.
    pub fn set_game(&self, game: &str) -> Result<()> {
        self.session.action(RoomAction::SetGame {
            game: game.to_string(),
        })
    }

    /// Update this player's profile fields in the roster.
    pub fn update_user(&self, user: User) -> Result<()> {
        self.session.action(RoomAction::UpdateUser { user })
    }

    /// Announce departure; the roster keeps the user flagged disconnected.
    pub fn leave(&self) -> Result<()> {
        self.session.action(RoomAction::UserLeave {
            user_id: self.self_user.id.clone(),
        })
    }

    pub fn room_state(&self) -> Versioned<RoomState> {
        self.session.current()
    }

    pub fn room_changes(&self) -> watch::Receiver<Versioned<RoomState>> {
        self.session.state_changes()
    }

    pub fn on_room_change(
        &self,
        callback: impl FnMut(&RoomState, Version) + Send + 'static,
    ) -> Result<()> {
        self.session.on_state_change(callback)
    }

    pub fn connected(&self) -> watch::Receiver<bool> {
        self.session.connected()
    }

    pub fn self_user(&self) -> &User {
        &self.self_user
    }

    pub fn session(&self) -> &SessionHandle<RoomLogic> {
        &self.session
    }
}

async fn run_relay(
    session: SessionHandle<RoomLogic>,
    role: Role,
    self_id: PeerId,
    mut relay_rx: mpsc::UnboundedReceiver<RelayIn>,
    mut cmd_rx: mpsc::UnboundedReceiver<RelayCmd>,
) {
    let mut frame: Option<(String, FrameLink)> = None;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(RelayCmd::Attach { game_name, link }) => {
                    debug!(game = %game_name, "game attached to relay");
                    frame = Some((game_name, link));
                }
                Some(RelayCmd::Detach) => frame = None,
                None => return,
            },
            incoming = relay_rx.recv() => match incoming {
                Some(RelayIn::Message(game_name, message)) => {
                    handle_peer_relay(&session, role, &self_id, &frame, game_name, message);
                }
                Some(RelayIn::PeerLeft(peer)) => {
                    // Host bookkeeping: flag the user behind the dead
                    // channel as disconnected.
                    if role == Role::Host {
                        let _ = session.action(RoomAction::UserLeave { user_id: peer });
                    }
                }
                None => return,
            },
            envelope = next_frame_envelope(&mut frame) => match envelope {
                Some(envelope) => {
                    handle_frame_envelope(&session, role, &self_id, &frame, envelope);
                }
                None => frame = None,
            },
        }
    }
}

/// Pending forever while no game is attached; the select loop just idles
/// on the other sources.
async fn next_frame_envelope(
    frame: &mut Option<(String, FrameLink)>,
) -> Option<FrameEnvelope> {
    match frame {
        Some((_, link)) => link.recv().await,
        None => std::future::pending().await,
    }
}

/// A message posted by the embedded game. The frame is an uncontrolled
/// context; everything is validated before it goes anywhere.
fn handle_frame_envelope(
    session: &SessionHandle<RoomLogic>,
    role: Role,
    self_id: &PeerId,
    frame: &Option<(String, FrameLink)>,
    envelope: FrameEnvelope,
) {
    match envelope {
        FrameEnvelope::IframeMessage(message) => {
            let Some((attached_name, link)) = frame.as_ref() else {
                return;
            };
            if message.game_name != *attached_name {
                warn!(
                    got = %message.game_name,
                    active = %attached_name,
                    "frame message for the wrong game, dropping"
                );
                return;
            }
            if matches!(message.body, IframeBody::Action { .. }) {
                // Echo straight back so the game renders its optimistic
                // prediction, then route toward the authority.
                link.post(FrameEnvelope::IframeMessage(decorate(
                    session,
                    self_id,
                    role,
                    message.clone(),
                )));
                if role == Role::Client {
                    let _ = session.forward(PeerEnvelope::IframeRelay {
                        game_name: message.game_name.clone(),
                        message: strip_context(message),
                    });
                }
            } else if role == Role::Host {
                let _ = session.forward(PeerEnvelope::IframeRelay {
                    game_name: message.game_name.clone(),
                    message: strip_context(message),
                });
            } else {
                warn!("non-host game emitted an action result, dropping");
            }
        }
        FrameEnvelope::PeerMessage(envelope) => {
            // A frame may ask the shell to route peer traffic, but only
            // game relay envelopes; the state protocol is not its to speak.
            match envelope {
                PeerEnvelope::IframeRelay { .. } => {
                    let _ = session.forward(envelope);
                }
                other => {
                    warn!(?other, "frame tried to send a non-relay peer message, dropping");
                }
            }
        }
    }
}

/// A game message relayed from another peer lands in the local frame if it
/// belongs to the game we have on screen.
fn handle_peer_relay(
    session: &SessionHandle<RoomLogic>,
    role: Role,
    self_id: &PeerId,
    frame: &Option<(String, FrameLink)>,
    game_name: String,
    message: IframeMessage,
) {
    let Some((attached_name, link)) = frame.as_ref() else {
        debug!(game = %game_name, "relayed message with no game attached, dropping");
        return;
    };
    if game_name != *attached_name || message.game_name != *attached_name {
        warn!(got = %game_name, active = %attached_name, "relayed message for the wrong game, dropping");
        return;
    }
    link.post(FrameEnvelope::IframeMessage(decorate(
        session,
        self_id,
        role,
        message,
    )));
}

/// Stamp the room context on a frame-bound message.
fn decorate(
    session: &SessionHandle<RoomLogic>,
    self_id: &PeerId,
    role: Role,
    mut message: IframeMessage,
) -> IframeMessage {
    match serde_json::to_value(&session.current().state) {
        Ok(room) => {
            message.context = Some(ViewerContext {
                room,
                viewer_user_id: self_id.clone(),
                viewer_is_host: role == Role::Host,
            });
        }
        Err(e) => warn!("room state does not serialize: {e}"),
    }
    message
}

fn strip_context(mut message: IframeMessage) -> IframeMessage {
    message.context = None;
    message
}
