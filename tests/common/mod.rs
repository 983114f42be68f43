// Shared test fixture: a minimal tic-tac-toe rule set driving the protocol

use p2party::{PeerId, StateLogic, User};
use serde::{Deserialize, Serialize};

pub const EMPTY: &str = "";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: String,
    pub symbol: String,
    pub wins: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TttState {
    pub board: Vec<Vec<String>>,
    pub turn: String,
    pub players: Vec<Player>,
}

impl TttState {
    pub fn mark_count(&self) -> usize {
        self.board
            .iter()
            .flatten()
            .filter(|cell| !cell.is_empty())
            .count()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum TttAction {
    Move { x: usize, y: usize },
    Restart,
}

pub struct TicTacToe;

impl StateLogic for TicTacToe {
    type State = TttState;
    type Action = TttAction;

    fn initial_state(&self) -> TttState {
        TttState {
            board: vec![vec![EMPTY.to_string(); 3]; 3],
            turn: "X".to_string(),
            players: Vec::new(),
        }
    }

    fn reduce(&self, state: &TttState, action: &TttAction, _actor: &PeerId) -> Option<TttState> {
        match action {
            TttAction::Move { x, y } => {
                if *x > 2 || *y > 2 {
                    return None;
                }
                // Occupied cells reject the move outright.
                if !state.board[*y][*x].is_empty() {
                    return None;
                }
                let mut next = state.clone();
                next.board[*y][*x] = state.turn.clone();
                next.turn = if state.turn == "X" { "O" } else { "X" }.to_string();
                Some(next)
            }
            TttAction::Restart => {
                let mut next = state.clone();
                next.board = vec![vec![EMPTY.to_string(); 3]; 3];
                next.turn = "X".to_string();
                Some(next)
            }
        }
    }

    fn sync_users(&self, state: &TttState, users: &[User]) -> Option<TttState> {
        let mut players = state.players.clone();
        let mut changed = false;
        for user in users {
            if players.iter().any(|p| p.id == user.id.as_str()) {
                continue;
            }
            // First two joiners play; everyone later spectates.
            let symbol = match players.len() {
                0 => "X",
                1 => "O",
                _ => EMPTY,
            };
            players.push(Player {
                id: user.id.as_str().to_string(),
                symbol: symbol.to_string(),
                wins: 0,
            });
            changed = true;
        }
        changed.then(|| TttState {
            board: state.board.clone(),
            turn: state.turn.clone(),
            players,
        })
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}
