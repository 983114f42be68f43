// Peer networking: wire envelopes, the transport seam, and the
// connection manager that keeps a session alive across failures

pub mod connection;
pub mod memory;
pub mod transport;
pub mod wire;

pub use connection::{ConnectionHandle, ConnectionId, ConnectionManager, LinkEvent, Role};
pub use memory::MemoryTransport;
pub use transport::{Channel, Listener, Transport, TransportError};
pub use wire::{FrameEnvelope, IframeBody, IframeMessage, PeerEnvelope, WireAction};
