// Room roster state and its reducers
// The room itself is replicated with the same machinery as any game

use serde::{Deserialize, Serialize};

use crate::identity::PeerId;
use crate::state::logic::StateLogic;

/// One member of the room as the rest of the party sees them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: PeerId,
    pub name: String,
    pub color: String,
    pub emoji: String,
    pub is_connected: bool,
    pub is_host: bool,
}

impl User {
    pub fn new(id: PeerId, name: &str, color: &str, emoji: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            color: color.to_string(),
            emoji: emoji.to_string(),
            is_connected: true,
            is_host: false,
        }
    }

    pub fn host(mut self) -> Self {
        self.is_host = true;
        self
    }
}

/// Replicated room state: who is here and which game is selected.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomState {
    pub users: Vec<User>,
    pub game: String,
}

impl RoomState {
    pub fn user(&self, id: &PeerId) -> Option<&User> {
        self.users.iter().find(|u| &u.id == id)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum RoomAction {
    /// A peer entered the room (or came back after a drop).
    UserJoin { user: User },
    /// A peer left; they stay listed, flagged disconnected.
    UserLeave { user_id: PeerId },
    /// Profile fields changed. Connection and host flags are not
    /// updatable through this action.
    UpdateUser { user: User },
    /// The party switched to another game.
    SetGame { game: String },
}

/// Reducers for the room roster.
pub struct RoomLogic;

impl StateLogic for RoomLogic {
    type State = RoomState;
    type Action = RoomAction;

    fn initial_state(&self) -> RoomState {
        RoomState::default()
    }

    fn reduce(&self, state: &RoomState, action: &RoomAction, _actor: &PeerId) -> Option<RoomState> {
        match action {
            RoomAction::UserJoin { user } => {
                let mut next = state.clone();
                match next.users.iter_mut().find(|u| u.id == user.id) {
                    Some(existing) => {
                        // A rejoin refreshes the profile and reconnects;
                        // a byte-identical duplicate join changes nothing.
                        let refreshed = User {
                            is_host: existing.is_host,
                            ..user.clone()
                        };
                        if *existing == refreshed {
                            return None;
                        }
                        *existing = refreshed;
                    }
                    None => next.users.push(user.clone()),
                }
                Some(next)
            }
            RoomAction::UserLeave { user_id } => {
                let mut next = state.clone();
                let user = next.users.iter_mut().find(|u| &u.id == user_id)?;
                if !user.is_connected {
                    return None;
                }
                user.is_connected = false;
                Some(next)
            }
            RoomAction::UpdateUser { user } => {
                let mut next = state.clone();
                let existing = next.users.iter_mut().find(|u| u.id == user.id)?;
                let updated = User {
                    is_connected: existing.is_connected,
                    is_host: existing.is_host,
                    ..user.clone()
                };
                if *existing == updated {
                    return None;
                }
                *existing = updated;
                Some(next)
            }
            RoomAction::SetGame { game } => {
                if state.game == *game {
                    return None;
                }
                let mut next = state.clone();
                next.game = game.clone();
                Some(next)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> User {
        User::new(PeerId::from("ALICE"), "alice", "#f00", "\u{1f984}").host()
    }

    fn bob() -> User {
        User::new(PeerId::from("BOB"), "bob", "#0f0", "\u{1f98a}")
    }

    fn actor() -> PeerId {
        PeerId::from("BOB")
    }

    #[test]
    fn join_adds_a_second_user() {
        let logic = RoomLogic;
        let state = RoomState {
            users: vec![alice()],
            game: String::new(),
        };

        let next = logic
            .reduce(&state, &RoomAction::UserJoin { user: bob() }, &actor())
            .unwrap();
        assert_eq!(next.users.len(), 2);
        assert_eq!(next.user(&PeerId::from("BOB")).unwrap().name, "bob");
    }

    #[test]
    fn duplicate_join_is_rejected_and_length_unchanged() {
        let logic = RoomLogic;
        let state = RoomState {
            users: vec![alice(), bob()],
            game: String::new(),
        };

        assert!(logic
            .reduce(&state, &RoomAction::UserJoin { user: bob() }, &actor())
            .is_none());
        assert_eq!(state.users.len(), 2);
    }

    #[test]
    fn rejoin_after_a_drop_reconnects_without_duplicating() {
        let logic = RoomLogic;
        let mut dropped = bob();
        dropped.is_connected = false;
        let state = RoomState {
            users: vec![alice(), dropped],
            game: String::new(),
        };

        let next = logic
            .reduce(&state, &RoomAction::UserJoin { user: bob() }, &actor())
            .unwrap();
        assert_eq!(next.users.len(), 2);
        assert!(next.user(&PeerId::from("BOB")).unwrap().is_connected);
    }

    #[test]
    fn join_cannot_grant_host() {
        let logic = RoomLogic;
        let state = RoomState {
            users: vec![alice(), bob()],
            game: String::new(),
        };

        // A rejoin that claims the host flag keeps the recorded one.
        let next = logic
            .reduce(
                &state,
                &RoomAction::UserJoin {
                    user: {
                        let mut imposter = bob();
                        imposter.name = "bobby".into();
                        imposter.is_host = true;
                        imposter
                    },
                },
                &actor(),
            )
            .unwrap();
        assert!(!next.user(&PeerId::from("BOB")).unwrap().is_host);
    }

    #[test]
    fn leave_flags_disconnected_but_keeps_the_user() {
        let logic = RoomLogic;
        let state = RoomState {
            users: vec![alice(), bob()],
            game: String::new(),
        };

        let next = logic
            .reduce(
                &state,
                &RoomAction::UserLeave {
                    user_id: PeerId::from("BOB"),
                },
                &actor(),
            )
            .unwrap();
        assert_eq!(next.users.len(), 2);
        assert!(!next.user(&PeerId::from("BOB")).unwrap().is_connected);
    }

    #[test]
    fn update_user_touches_profile_fields_only() {
        let logic = RoomLogic;
        let state = RoomState {
            users: vec![alice(), bob()],
            game: String::new(),
        };

        let mut update = bob();
        update.name = "robert".into();
        update.is_host = true;
        update.is_connected = false;

        let next = logic
            .reduce(&state, &RoomAction::UpdateUser { user: update }, &actor())
            .unwrap();
        let updated = next.user(&PeerId::from("BOB")).unwrap();
        assert_eq!(updated.name, "robert");
        assert!(updated.is_connected);
        assert!(!updated.is_host);
    }

    #[test]
    fn set_game_changes_selection_once() {
        let logic = RoomLogic;
        let state = RoomState::default();

        let next = logic
            .reduce(
                &state,
                &RoomAction::SetGame {
                    game: "tic-tac-toe".into(),
                },
                &actor(),
            )
            .unwrap();
        assert_eq!(next.game, "tic-tac-toe");
        assert!(logic
            .reduce(
                &next,
                &RoomAction::SetGame {
                    game: "tic-tac-toe".into()
                },
                &actor()
            )
            .is_none());
    }

    #[test]
    fn room_action_kinds_match_the_wire_names() {
        use crate::state::logic::encode_action;

        let (kind, _) = encode_action(&RoomAction::UserJoin { user: bob() }).unwrap();
        assert_eq!(kind, "userJoin");
        let (kind, _) = encode_action(&RoomAction::SetGame { game: "x".into() }).unwrap();
        assert_eq!(kind, "setGame");
        let (kind, _) = encode_action(&RoomAction::UserLeave {
            user_id: PeerId::from("BOB"),
        })
        .unwrap();
        assert_eq!(kind, "userLeave");
        let (kind, _) = encode_action(&RoomAction::UpdateUser { user: bob() }).unwrap();
        assert_eq!(kind, "updateUser");
    }
}
