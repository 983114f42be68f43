// p2party: host-authoritative replicated state sync for party games
// One peer owns the truth; everyone else submits actions and reconciles

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod game;
pub mod identity;
pub mod net;
pub mod room;
pub mod state;
pub mod sync;

pub use config::Config;
pub use error::{Error, Result};
pub use game::Game;
pub use identity::{IdentityStore, PeerId, Profile, RoomId};
pub use net::{ConnectionManager, MemoryTransport, Role, Transport};
pub use room::{Room, RoomAction, RoomState, User};
pub use state::{Reconciliation, StateLogic, StateStore, Version, Versioned};
pub use sync::{SessionHandle, SyncPolicy};
