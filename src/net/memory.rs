// In-process transport hub
// Backs tests and same-process sessions; rooms are slots in a shared map,
// and reachability can be toggled to exercise the reconnect path

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::identity::RoomId;
use crate::net::transport::{Channel, ChannelClosed, Listener, Transport, TransportError};

#[derive(Debug, Default)]
struct HubInner {
    rooms: HashMap<RoomId, mpsc::UnboundedSender<MemoryChannel>>,
    unreachable: HashSet<RoomId>,
}

/// Process-local transport. Cloning shares the hub.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<Mutex<HubInner>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle whether dials to `room` can go through. Turning a room
    /// unreachable does not cut already established channels.
    pub fn set_reachable(&self, room: &RoomId, reachable: bool) {
        let mut inner = self.inner.lock().expect("hub lock poisoned");
        if reachable {
            inner.unreachable.remove(room);
        } else {
            inner.unreachable.insert(room.clone());
        }
    }

    fn pair() -> (MemoryChannel, MemoryChannel) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            MemoryChannel { tx: a_tx, rx: b_rx },
            MemoryChannel { tx: b_tx, rx: a_rx },
        )
    }
}

impl Transport for MemoryTransport {
    type Channel = MemoryChannel;
    type Listener = MemoryListener;

    async fn listen(&self, room: &RoomId) -> Result<MemoryListener, TransportError> {
        let mut inner = self.inner.lock().expect("hub lock poisoned");
        if inner.rooms.contains_key(room) {
            return Err(TransportError::AlreadyHosted(room.as_str().to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        inner.rooms.insert(room.clone(), tx);
        Ok(MemoryListener {
            room: room.clone(),
            hub: self.inner.clone(),
            inbound: rx,
        })
    }

    async fn dial(&self, room: &RoomId) -> Result<MemoryChannel, TransportError> {
        let mut inner = self.inner.lock().expect("hub lock poisoned");
        if inner.unreachable.contains(room) {
            return Err(TransportError::Unreachable(room.as_str().to_string()));
        }
        let Some(acceptor) = inner.rooms.get(room) else {
            return Err(TransportError::Unreachable(room.as_str().to_string()));
        };
        let (host_end, client_end) = Self::pair();
        if acceptor.send(host_end).is_err() {
            // The listener went away without unregistering; clean up.
            inner.rooms.remove(room);
            return Err(TransportError::Unreachable(room.as_str().to_string()));
        }
        Ok(client_end)
    }
}

/// One end of an in-memory duplex channel.
#[derive(Debug)]
pub struct MemoryChannel {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl Channel for MemoryChannel {
    fn send(&self, payload: Vec<u8>) -> Result<(), ChannelClosed> {
        self.tx.send(payload).map_err(|_| ChannelClosed)
    }

    async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }
}

/// Host-side acceptor for a hosted room. Dropping it unregisters the room.
#[derive(Debug)]
pub struct MemoryListener {
    room: RoomId,
    hub: Arc<Mutex<HubInner>>,
    inbound: mpsc::UnboundedReceiver<MemoryChannel>,
}

impl Listener for MemoryListener {
    type Channel = MemoryChannel;

    async fn accept(&mut self) -> Option<MemoryChannel> {
        self.inbound.recv().await
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.hub.lock() {
            inner.rooms.remove(&self.room);
        }
    }
}
