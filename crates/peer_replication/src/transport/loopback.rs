/// In-memory transport connecting peers inside one process
use super::Transport;
use crate::error::TransportError;
use crate::types::{Origin, PeerId, TransportMode};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, trace};

/// Receives packets delivered by a [`LoopbackNetwork`].
///
/// Implemented for any `Fn(u32, &[u8], Origin, TransportMode)` closure, so a
/// router can be attached with
/// `move |tag, bytes, origin, _| { router.dispatch(tag, bytes, origin); }`.
pub trait InboundSink: Send + Sync {
    fn deliver(&self, tag: u32, bytes: &[u8], origin: Origin, mode: TransportMode);
}

impl<F> InboundSink for F
where
    F: Fn(u32, &[u8], Origin, TransportMode) + Send + Sync,
{
    fn deliver(&self, tag: u32, bytes: &[u8], origin: Origin, mode: TransportMode) {
        self(tag, bytes, origin, mode)
    }
}

#[derive(Default)]
struct NetworkInner {
    peers: DashMap<PeerId, Arc<dyn InboundSink>>,
    server: RwLock<Option<Arc<dyn InboundSink>>>,
    closed: AtomicBool,
    delivered: AtomicU64,
}

/// Hub of an in-memory session.
///
/// Delivery is synchronous: `send_unicast` calls the receiving peer's sink
/// before it returns. Every channel therefore behaves as reliable and ordered,
/// whatever mode the sender asked for.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    inner: Arc<NetworkInner>,
}

impl std::fmt::Debug for LoopbackNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackNetwork")
            .field("peers", &self.inner.peers.len())
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Joins `peer` to the session. Packets addressed to it go to `sink`.
    ///
    /// Reconnecting an existing peer replaces its sink.
    pub fn connect(&self, peer: PeerId, sink: Arc<dyn InboundSink>) -> LoopbackEndpoint {
        self.attach(peer, sink);
        self.endpoint(peer)
    }

    /// Sending handle for `peer`. The peer is not reachable until a sink is
    /// attached, which lets the sink be built from something that needs the
    /// endpoint first.
    pub fn endpoint(&self, peer: PeerId) -> LoopbackEndpoint {
        LoopbackEndpoint {
            local: peer,
            network: self.inner.clone(),
        }
    }

    /// Makes `peer` reachable, delivering its packets to `sink`.
    pub fn attach(&self, peer: PeerId, sink: Arc<dyn InboundSink>) {
        self.inner.peers.insert(peer, sink);
        debug!("🔌 Peer {} joined loopback network", peer);
    }

    /// Removes `peer`; later sends to it fail with `PeerNotConnected`.
    pub fn disconnect(&self, peer: PeerId) -> bool {
        let removed = self.inner.peers.remove(&peer).is_some();
        if removed {
            debug!("🔌 Peer {} left loopback network", peer);
        }
        removed
    }

    /// Attaches the coordinating server's inbound sink.
    pub fn attach_server(&self, sink: Arc<dyn InboundSink>) {
        if let Ok(mut server) = self.inner.server.write() {
            *server = Some(sink);
        }
    }

    /// Delivers a server-originated packet to `peer`.
    pub fn send_from_server(&self, peer: PeerId, tag: u32, bytes: &[u8]) -> Result<(), TransportError> {
        self.inner
            .deliver_to(peer, tag, bytes, Origin::Server, TransportMode::RELIABLE_ORDERED)
    }

    /// Currently connected peers.
    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.inner.peers.iter().map(|entry| *entry.key()).collect();
        peers.sort();
        peers
    }

    pub fn is_connected(&self, peer: PeerId) -> bool {
        self.inner.peers.contains_key(&peer)
    }

    /// Total packets handed to sinks since creation.
    pub fn delivered_packets(&self) -> u64 {
        self.inner.delivered.load(Ordering::Relaxed)
    }

    /// Shuts the session down. Every later send fails with `Closed`.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.peers.clear();
    }
}

impl NetworkInner {
    fn deliver_to(
        &self,
        peer: PeerId,
        tag: u32,
        bytes: &[u8],
        origin: Origin,
        mode: TransportMode,
    ) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        // Clone out of the map so the sink may send without holding a shard lock
        let sink = self
            .peers
            .get(&peer)
            .map(|entry| entry.value().clone())
            .ok_or(TransportError::PeerNotConnected(peer))?;

        trace!("📦 {} -> {} tag={} {} ({} bytes)", origin, peer, tag, mode, bytes.len());
        sink.deliver(tag, bytes, origin, mode);
        self.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// One peer's handle on a [`LoopbackNetwork`].
#[derive(Clone)]
pub struct LoopbackEndpoint {
    local: PeerId,
    network: Arc<NetworkInner>,
}

impl std::fmt::Debug for LoopbackEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackEndpoint")
            .field("local", &self.local)
            .finish()
    }
}

impl Transport for LoopbackEndpoint {
    fn local_peer(&self) -> PeerId {
        self.local
    }

    fn send_unicast(
        &self,
        peer: PeerId,
        tag: u32,
        bytes: &[u8],
        mode: TransportMode,
    ) -> Result<(), TransportError> {
        self.network
            .deliver_to(peer, tag, bytes, Origin::Peer(self.local), mode)
    }

    fn send_to_server(&self, tag: u32, bytes: &[u8]) -> Result<(), TransportError> {
        if self.network.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        let server = self
            .network
            .server
            .read()
            .ok()
            .and_then(|server| server.clone())
            .ok_or(TransportError::NoServer)?;

        server.deliver(tag, bytes, Origin::Peer(self.local), TransportMode::RELIABLE_ORDERED);
        self.network.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
