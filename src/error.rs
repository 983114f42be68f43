// Library error surface
// Transport faults recover internally; these are the conditions callers see

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A session is already established for this connection manager.
    #[error("already connected")]
    AlreadyConnected,

    /// The session task has shut down and can no longer accept work.
    #[error("session closed")]
    SessionClosed,

    /// A value failed to serialize or deserialize.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// An action did not serialize to a `type`/`payload` object.
    #[error("action does not serialize to a type/payload object")]
    ActionShape,
}

pub type Result<T> = std::result::Result<T, Error>;
