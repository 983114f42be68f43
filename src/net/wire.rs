// Wire protocol definition
// Envelopes exchanged over peer channels and across the embedded-game boundary

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identity::PeerId;
use crate::state::version::Version;

/// An action as it travels between peers and frames.
///
/// `payload` stays dynamic JSON on the wire; typed game actions are split
/// into the `type`/`payload` pair by the codec in `state::logic`. The
/// version tags are present only on optimistically predicted actions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireAction {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
    pub actor: PeerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_on_version: Option<Version>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_version: Option<Version>,
}

impl WireAction {
    pub fn new(kind: impl Into<String>, payload: Value, actor: PeerId) -> Self {
        Self {
            kind: kind.into(),
            payload,
            actor,
            applied_on_version: None,
            result_version: None,
        }
    }

    /// Tag this action with the version it was predicted against and the
    /// version the prediction produced.
    pub fn with_versions(mut self, applied_on: Version, result: Version) -> Self {
        self.applied_on_version = Some(applied_on);
        self.result_version = Some(result);
        self
    }
}

/// A state snapshot in wire form.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionedState {
    pub version: Version,
    pub state: Value,
}

/// Messages exchanged between peers over the transport channel.
///
/// Tagged with `type`, not `kind`: a frame may carry a whole peer message
/// inside its own `kind`-tagged envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PeerEnvelope {
    /// Authoritative state from the host. Carries the action that produced
    /// it, except for the initial snapshot sent to a late joiner.
    State {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        action: Option<WireAction>,
        #[serde(rename = "resultState")]
        result_state: VersionedState,
    },

    /// Client-to-host action submission.
    Action { action: WireAction },

    /// Embedded-game message relayed between peers by the room shells.
    IframeRelay {
        #[serde(rename = "gameName")]
        game_name: String,
        message: IframeMessage,
    },
}

impl PeerEnvelope {
    /// Serialize for transmission.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize a received payload.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Messages crossing the embedded-game boundary.
///
/// Anything without a recognized `kind` tag fails to parse and is dropped
/// by the relay; the frame is an uncontrolled context.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum FrameEnvelope {
    /// Game-level traffic between the shell and the embedded game.
    IframeMessage(IframeMessage),

    /// Peer-level traffic the embedded game asks the shell to route.
    PeerMessage(PeerEnvelope),
}

/// One game-level message, always tagged with the game it belongs to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IframeMessage {
    pub game_name: String,
    #[serde(flatten)]
    pub body: IframeBody,
    /// Room context stamped on by the shell before delivery into the frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ViewerContext>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum IframeBody {
    /// An action submitted by the embedded game (or relayed toward the
    /// authoritative one).
    Action { action: WireAction },

    /// The authoritative result produced by the host's embedded game.
    ActionResult {
        action: WireAction,
        #[serde(rename = "resultState")]
        result_state: VersionedState,
    },
}

/// What the shell tells the embedded game about the room it lives in.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerContext {
    pub room: Value,
    pub viewer_user_id: PeerId,
    pub viewer_is_host: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn state_envelope_round_trips() {
        let envelope = PeerEnvelope::State {
            action: Some(
                WireAction::new("move", json!({"x": 0, "y": 0}), PeerId::from("AAAA"))
                    .with_versions(Version::INITIAL, Version::INITIAL.next()),
            ),
            result_state: VersionedState {
                version: Version::INITIAL.next(),
                state: json!({"board": [["X", "", ""]]}),
            },
        };
        let bytes = envelope.to_bytes().unwrap();
        let decoded = PeerEnvelope::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn snapshot_without_action_omits_the_field() {
        let envelope = PeerEnvelope::State {
            action: None,
            result_state: VersionedState {
                version: Version::INITIAL,
                state: json!({}),
            },
        };
        let text = serde_json::to_string(&envelope).unwrap();
        assert!(!text.contains("\"action\""));
        assert!(text.contains("\"type\":\"state\""));
    }

    #[test]
    fn frame_envelope_tags_are_kebab_case() {
        let envelope = FrameEnvelope::IframeMessage(IframeMessage {
            game_name: "tic-tac-toe".to_string(),
            body: IframeBody::Action {
                action: WireAction::new("move", json!({"x": 1, "y": 1}), PeerId::from("BBBB")),
            },
            context: None,
        });
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["kind"], "iframe-message");
        assert_eq!(value["type"], "action");
        assert_eq!(value["gameName"], "tic-tac-toe");
    }

    #[test]
    fn garbage_bytes_fail_to_parse() {
        assert!(PeerEnvelope::from_bytes(b"{\"type\":\"mystery\"}").is_err());
        assert!(PeerEnvelope::from_bytes(b"not json").is_err());
    }

    #[test]
    fn a_peer_message_nests_inside_a_frame_envelope() {
        let envelope = FrameEnvelope::PeerMessage(PeerEnvelope::IframeRelay {
            game_name: "connect-4".to_string(),
            message: IframeMessage {
                game_name: "connect-4".to_string(),
                body: IframeBody::Action {
                    action: WireAction::new("drop", json!({"column": 3}), PeerId::from("DDDD")),
                },
                context: None,
            },
        });
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["kind"], "peer-message");
        assert_eq!(value["type"], "iframe-relay");

        let text = serde_json::to_string(&envelope).unwrap();
        let back: FrameEnvelope = serde_json::from_str(&text).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn viewer_context_survives_the_relay_decoration() {
        let message = IframeMessage {
            game_name: "minesweeper".to_string(),
            body: IframeBody::Action {
                action: WireAction::new("reveal", json!({"cell": 7}), PeerId::from("CCCC")),
            },
            context: Some(ViewerContext {
                room: json!({"users": [], "game": "minesweeper"}),
                viewer_user_id: PeerId::from("CCCC"),
                viewer_is_host: false,
            }),
        };
        let text = serde_json::to_string(&message).unwrap();
        let back: IframeMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(back, message);
    }
}
