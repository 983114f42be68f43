// Session wiring: one replicated state machine per room

pub mod session;

pub use session::{spawn, SessionHandle, SyncPolicy};
