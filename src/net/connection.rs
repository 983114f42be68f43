// Connection manager
// Keeps exactly one logical session alive: the host listens under the room
// identifier and fans out to every peer, a client dials it and redials
// forever with bounded backoff

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::config::NetworkConfig;
use crate::error::{Error, Result};
use crate::identity::{PeerId, RoomId};
use crate::net::transport::{Channel, Listener, Transport};
use crate::net::wire::{PeerEnvelope, VersionedState};

/// Which side of the session this peer plays. Decided once at construction
/// and threaded through; never re-derived from identifiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Host,
    Client,
}

/// Identifies one remote peer's channel at the host. Clients talk to a
/// single remote, always `ConnectionId::HOST`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const HOST: ConnectionId = ConnectionId(0);

    pub fn get(self) -> u64 {
        self.0
    }
}

/// What the connection layer delivers upward.
#[derive(Debug)]
pub enum LinkEvent {
    /// A remote peer's channel opened (host side).
    PeerConnected(ConnectionId),
    /// A remote peer's channel closed (host side).
    PeerDisconnected(ConnectionId),
    /// An envelope arrived on a channel.
    Message(ConnectionId, PeerEnvelope),
}

enum Command {
    Send(PeerEnvelope),
    SendTo(ConnectionId, PeerEnvelope),
    Broadcast(PeerEnvelope),
    Shutdown,
}

/// Supplies the snapshot a newly connected peer receives. Consulted only
/// by the host.
pub type SnapshotSource = Arc<dyn Fn() -> VersionedState + Send + Sync>;

/// Establishes and maintains the session over a transport.
pub struct ConnectionManager<T: Transport> {
    transport: T,
    network: NetworkConfig,
    active: Arc<AtomicBool>,
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(transport: T, network: NetworkConfig) -> Self {
        Self {
            transport,
            network,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Establish the session. Idempotent: a second call while a session is
    /// live fails with `AlreadyConnected`. Dropping the returned handle
    /// tears the session down.
    pub fn connect(
        &self,
        self_id: PeerId,
        room: RoomId,
        role: Role,
        snapshot: SnapshotSource,
    ) -> Result<ConnectionHandle> {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::AlreadyConnected);
        }

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (connected_tx, connected_rx) = watch::channel(false);

        let transport = self.transport.clone();
        let network = self.network.clone();
        match role {
            Role::Host => {
                tokio::spawn(run_host(
                    transport,
                    room,
                    self_id,
                    snapshot,
                    network,
                    cmd_rx,
                    event_tx,
                    connected_tx,
                ));
            }
            Role::Client => {
                tokio::spawn(run_client(
                    transport,
                    room,
                    self_id,
                    network,
                    cmd_rx,
                    event_tx,
                    connected_tx,
                ));
            }
        }

        Ok(ConnectionHandle {
            cmd: cmd_tx,
            events: Some(event_rx),
            connected: connected_rx,
            active: self.active.clone(),
        })
    }
}

/// Live session handle. All sends are fire-and-forget; delivery is best
/// effort and convergence is restored by snapshots after reconnects.
#[derive(Debug)]
pub struct ConnectionHandle {
    cmd: mpsc::UnboundedSender<Command>,
    events: Option<mpsc::UnboundedReceiver<LinkEvent>>,
    connected: watch::Receiver<bool>,
    active: Arc<AtomicBool>,
}

impl ConnectionHandle {
    /// Client side: submit an envelope to the host. Queued while offline
    /// and flushed in order on reconnect.
    pub fn send(&self, envelope: PeerEnvelope) -> Result<()> {
        self.cmd
            .send(Command::Send(envelope))
            .map_err(|_| Error::SessionClosed)
    }

    /// Host side: send to one connected peer.
    pub fn send_to(&self, id: ConnectionId, envelope: PeerEnvelope) -> Result<()> {
        self.cmd
            .send(Command::SendTo(id, envelope))
            .map_err(|_| Error::SessionClosed)
    }

    /// Host side: send to every connected peer.
    pub fn broadcast(&self, envelope: PeerEnvelope) -> Result<()> {
        self.cmd
            .send(Command::Broadcast(envelope))
            .map_err(|_| Error::SessionClosed)
    }

    /// Take the inbound event stream. Yields once; the session has exactly
    /// one consumer.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<LinkEvent>> {
        self.events.take()
    }

    /// Watchable connected flag, the only failure signal surfaced to UI.
    pub fn connected(&self) -> watch::Receiver<bool> {
        self.connected.clone()
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        let _ = self.cmd.send(Command::Shutdown);
        self.active.store(false, Ordering::SeqCst);
    }
}

/// Delay before reconnect attempt `attempt`: doubles from the configured
/// floor and saturates at the ceiling. Never sleeps below the floor, never
/// grows past the ceiling.
pub(crate) fn retry_delay(attempt: u32, network: &NetworkConfig) -> Duration {
    let floor = network.reconnect_initial_delay_ms.max(1);
    let ceiling = network.reconnect_max_delay_ms.max(floor);
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    Duration::from_millis(floor.saturating_mul(factor).min(ceiling))
}

fn enqueue(queue: &mut VecDeque<PeerEnvelope>, envelope: PeerEnvelope, limit: usize) {
    if queue.len() >= limit {
        warn!("offline queue full, dropping oldest action");
        queue.pop_front();
    }
    queue.push_back(envelope);
}

#[allow(clippy::too_many_arguments)]
async fn run_host<T: Transport>(
    transport: T,
    room: RoomId,
    self_id: PeerId,
    snapshot: SnapshotSource,
    network: NetworkConfig,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    event_tx: mpsc::UnboundedSender<LinkEvent>,
    connected_tx: watch::Sender<bool>,
) {
    // The room identifier may still be held by a dying previous instance;
    // keep trying with the same backoff the clients use.
    let mut attempt: u32 = 0;
    let mut listener = loop {
        match transport.listen(&room).await {
            Ok(listener) => break listener,
            Err(e) => {
                warn!(room = %room, "failed to bind room listener: {e}");
                let delay = retry_delay(attempt, &network);
                attempt = attempt.saturating_add(1);
                if wait_for_retry(&mut cmd_rx, delay).await {
                    return;
                }
            }
        }
    };
    connected_tx.send_replace(true);
    info!(room = %room, peer = %self_id, "hosting room");

    let (closed_tx, mut closed_rx) = mpsc::unbounded_channel::<ConnectionId>();
    let mut peers: HashMap<ConnectionId, mpsc::UnboundedSender<PeerEnvelope>> = HashMap::new();
    let mut next_id: u64 = 1;

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Some(channel) => {
                        let id = ConnectionId(next_id);
                        next_id += 1;

                        // Late joiners catch up from one snapshot, never by
                        // replaying action history.
                        let catch_up = PeerEnvelope::State {
                            action: None,
                            result_state: snapshot(),
                        };
                        let Ok(bytes) = catch_up.to_bytes() else {
                            warn!("failed to encode catch-up snapshot");
                            continue;
                        };
                        if channel.send(bytes).is_err() {
                            debug!(connection = id.get(), "peer vanished before catch-up");
                            continue;
                        }

                        let (out_tx, out_rx) = mpsc::unbounded_channel();
                        peers.insert(id, out_tx);
                        tokio::spawn(peer_loop(
                            id,
                            channel,
                            out_rx,
                            event_tx.clone(),
                            closed_tx.clone(),
                        ));
                        info!(connection = id.get(), "peer connected");
                        if event_tx.send(LinkEvent::PeerConnected(id)).is_err() {
                            return;
                        }
                    }
                    None => {
                        warn!(room = %room, "room listener closed");
                        connected_tx.send_replace(false);
                        return;
                    }
                }
            }
            Some(id) = closed_rx.recv() => {
                peers.remove(&id);
                info!(connection = id.get(), "peer disconnected");
                if event_tx.send(LinkEvent::PeerDisconnected(id)).is_err() {
                    return;
                }
            }
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::SendTo(id, envelope)) => {
                    if let Some(out) = peers.get(&id) {
                        let _ = out.send(envelope);
                    }
                }
                Some(Command::Broadcast(envelope)) => {
                    for out in peers.values() {
                        let _ = out.send(envelope.clone());
                    }
                }
                Some(Command::Send(_)) => {
                    warn!("host has no uplink, dropping send");
                }
                Some(Command::Shutdown) | None => return,
            },
        }
    }
}

/// Owns one peer channel at the host: pumps outbound envelopes in and
/// inbound envelopes up until either side goes away.
async fn peer_loop<C: Channel>(
    id: ConnectionId,
    mut channel: C,
    mut out_rx: mpsc::UnboundedReceiver<PeerEnvelope>,
    event_tx: mpsc::UnboundedSender<LinkEvent>,
    closed_tx: mpsc::UnboundedSender<ConnectionId>,
) {
    loop {
        tokio::select! {
            inbound = channel.recv() => match inbound {
                Some(bytes) => match PeerEnvelope::from_bytes(&bytes) {
                    Ok(envelope) => {
                        if event_tx.send(LinkEvent::Message(id, envelope)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(connection = id.get(), "dropping malformed peer message: {e}");
                    }
                },
                None => break,
            },
            outbound = out_rx.recv() => match outbound {
                Some(envelope) => match envelope.to_bytes() {
                    Ok(bytes) => {
                        if channel.send(bytes).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("failed to encode envelope: {e}"),
                },
                None => break,
            },
        }
    }
    let _ = closed_tx.send(id);
}

async fn run_client<T: Transport>(
    transport: T,
    room: RoomId,
    self_id: PeerId,
    network: NetworkConfig,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    event_tx: mpsc::UnboundedSender<LinkEvent>,
    connected_tx: watch::Sender<bool>,
) {
    let mut queue: VecDeque<PeerEnvelope> = VecDeque::new();
    let mut attempt: u32 = 0;

    loop {
        let mut channel = match transport.dial(&room).await {
            Ok(channel) => channel,
            Err(e) => {
                debug!(room = %room, attempt, "dial failed: {e}");
                let delay = retry_delay(attempt, &network);
                attempt = attempt.saturating_add(1);
                if sleep_and_queue(&mut cmd_rx, &mut queue, delay, network.offline_queue_limit)
                    .await
                {
                    return;
                }
                continue;
            }
        };
        attempt = 0;
        connected_tx.send_replace(true);
        info!(room = %room, peer = %self_id, "connected to host");

        // Flush everything queued while offline, oldest first.
        let mut channel_gone = false;
        while let Some(envelope) = queue.front() {
            match envelope.to_bytes() {
                Ok(bytes) => {
                    if channel.send(bytes).is_err() {
                        channel_gone = true;
                        break;
                    }
                    queue.pop_front();
                }
                Err(e) => {
                    warn!("failed to encode queued envelope: {e}");
                    queue.pop_front();
                }
            }
        }

        while !channel_gone {
            tokio::select! {
                inbound = channel.recv() => match inbound {
                    Some(bytes) => match PeerEnvelope::from_bytes(&bytes) {
                        Ok(envelope) => {
                            if event_tx
                                .send(LinkEvent::Message(ConnectionId::HOST, envelope))
                                .is_err()
                            {
                                return;
                            }
                        }
                        Err(e) => warn!("dropping malformed host message: {e}"),
                    },
                    None => channel_gone = true,
                },
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Send(envelope)) => match envelope.to_bytes() {
                        Ok(bytes) => {
                            if channel.send(bytes).is_err() {
                                enqueue(&mut queue, envelope, network.offline_queue_limit);
                                channel_gone = true;
                            }
                        }
                        Err(e) => warn!("failed to encode envelope: {e}"),
                    },
                    Some(Command::Shutdown) | None => return,
                    Some(_) => warn!("targeted sends are host-side only"),
                },
            }
        }

        connected_tx.send_replace(false);
        info!(room = %room, "disconnected from host, retrying");

        // The drop itself starts the backoff series; an unreachable host
        // then keeps doubling it from here.
        let delay = retry_delay(attempt, &network);
        attempt = attempt.saturating_add(1);
        if sleep_and_queue(&mut cmd_rx, &mut queue, delay, network.offline_queue_limit).await {
            return;
        }
    }
}

/// Sleep out a reconnect delay while still accepting outgoing actions into
/// the offline queue. Returns true when the session was shut down.
async fn sleep_and_queue(
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    queue: &mut VecDeque<PeerEnvelope>,
    delay: Duration,
    limit: usize,
) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        tokio::select! {
            _ = time::sleep_until(deadline) => return false,
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Send(envelope)) => enqueue(queue, envelope, limit),
                Some(Command::Shutdown) | None => return true,
                Some(_) => {}
            },
        }
    }
}

/// Host variant: wait out a listen retry. Commands other than shutdown are
/// dropped; there are no peers yet to receive them.
async fn wait_for_retry(cmd_rx: &mut mpsc::UnboundedReceiver<Command>, delay: Duration) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        tokio::select! {
            _ = time::sleep_until(deadline) => return false,
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Shutdown) | None => return true,
                Some(_) => {}
            },
        }
    }
}
