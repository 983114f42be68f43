// Transport seam
// The protocol consumes an opaque duplex channel; discovery, NAT traversal
// and framing live behind this boundary

use std::future::Future;

use thiserror::Error;

use crate::identity::RoomId;

/// Opaque point-to-point duplex channel.
///
/// Delivery on a single channel is FIFO; nothing is guaranteed across
/// different channels.
pub trait Channel: Send + 'static {
    /// Queue a payload for the remote end. Fails once the channel is closed.
    fn send(&self, payload: Vec<u8>) -> Result<(), ChannelClosed>;

    /// Receive the next payload. `None` means the channel closed, whether by
    /// remote hangup or transport error; the two are not distinguished.
    fn recv(&mut self) -> impl Future<Output = Option<Vec<u8>>> + Send;
}

/// Stream of inbound channels at the host side of a room.
pub trait Listener: Send + 'static {
    type Channel: Channel;

    /// Accept the next inbound channel. `None` when the listener is closed.
    fn accept(&mut self) -> impl Future<Output = Option<Self::Channel>> + Send;
}

/// How sessions reach a room: hosts listen under its identifier, clients
/// dial it.
pub trait Transport: Clone + Send + Sync + 'static {
    type Channel: Channel;
    type Listener: Listener<Channel = Self::Channel>;

    fn listen(
        &self,
        room: &RoomId,
    ) -> impl Future<Output = Result<Self::Listener, TransportError>> + Send;

    fn dial(
        &self,
        room: &RoomId,
    ) -> impl Future<Output = Result<Self::Channel, TransportError>> + Send;
}

/// The channel is gone; the connection manager reacts by reconnecting.
#[derive(Clone, Copy, Debug, Error)]
#[error("channel closed")]
pub struct ChannelClosed;

#[derive(Clone, Debug, Error)]
pub enum TransportError {
    /// Nobody is listening under this room identifier.
    #[error("room `{0}` is unreachable")]
    Unreachable(String),

    /// Another host already listens under this room identifier.
    #[error("room `{0}` is already hosted")]
    AlreadyHosted(String),
}
