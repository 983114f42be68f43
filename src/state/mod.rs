// Replicated state: versioning, reducer dispatch, and reconciliation

pub mod logic;
pub mod store;
pub mod version;

pub use logic::{decode_action, encode_action, StateLogic};
pub use store::{ActionMeta, Reconciliation, StateStore, Versioned};
pub use version::Version;
