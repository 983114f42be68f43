// Game logic trait and the action wire codec
// Each game supplies a pure reducer over its own state and action types

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::Error;
use crate::identity::PeerId;
use crate::room::state::User;

/// Per-game reducer surface.
///
/// `Action` must be an adjacently tagged serde enum
/// (`#[serde(tag = "type", content = "payload")]`), one variant per action
/// kind. The wire keeps the `type`/`payload` split so a peer sending an
/// unknown kind is dropped with a warning instead of crashing the session.
pub trait StateLogic: Send + Sync + 'static {
    type State: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static;
    type Action: Clone + Serialize + DeserializeOwned + Send + Sync + 'static;

    fn initial_state(&self) -> Self::State;

    /// Pure reducer: produce the next state, or `None` to reject the action
    /// (state and version stay untouched). The input state is never mutated.
    fn reduce(
        &self,
        state: &Self::State,
        action: &Self::Action,
        actor: &PeerId,
    ) -> Option<Self::State>;

    /// Standard hook absorbing the room roster into game-specific player
    /// records. Invoked through the well-known `syncUsers` action every
    /// facade dispatches at construction. Default: roster changes do not
    /// affect this game's state.
    fn sync_users(&self, _state: &Self::State, _users: &[User]) -> Option<Self::State> {
        None
    }
}

/// Action kind reserved for the roster hook; not part of any game's enum.
pub const SYNC_USERS_KIND: &str = "syncUsers";

/// Split a typed action into its wire `type`/`payload` pair.
pub fn encode_action<A: Serialize>(action: &A) -> Result<(String, Value), Error> {
    let value = serde_json::to_value(action)?;
    let Value::Object(mut map) = value else {
        return Err(Error::ActionShape);
    };
    let kind = match map.remove("type") {
        Some(Value::String(kind)) => kind,
        _ => return Err(Error::ActionShape),
    };
    let payload = map.remove("payload").unwrap_or(Value::Null);
    Ok((kind, payload))
}

/// Rebuild a typed action from its wire `type`/`payload` pair.
/// `None` for unknown kinds or payloads that do not fit the kind.
pub fn decode_action<A: DeserializeOwned>(kind: &str, payload: &Value) -> Option<A> {
    let mut map = serde_json::Map::new();
    map.insert("type".to_string(), Value::String(kind.to_string()));
    if !payload.is_null() {
        map.insert("payload".to_string(), payload.clone());
    }
    serde_json::from_value(Value::Object(map)).ok()
}
