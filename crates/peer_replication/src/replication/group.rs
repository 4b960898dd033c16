/// Session driver that owns replicators and runs the per-tick pull loop
use super::Replicator;
use crate::config::ReplicationConfig;
use crate::error::ReplicationError;
use crate::transport::{InboundSink, Transport};
use crate::types::{Origin, PeerId, ReplicationTick, TransportMode};
use crossbeam::channel::{self, Receiver, Sender, TryRecvError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Identifies a replicator inside a group. Doubles as its transport tag, so
/// peers must register matching replicators under matching ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReplicatorId(pub u32);

impl std::fmt::Display for ReplicatorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Typed handle returned by [`ReplicationGroup::register`].
pub struct ReplicatorHandle<R> {
    id: ReplicatorId,
    _marker: PhantomData<fn() -> R>,
}

impl<R> ReplicatorHandle<R> {
    pub fn id(&self) -> ReplicatorId {
        self.id
    }
}

impl<R> Clone for ReplicatorHandle<R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R> Copy for ReplicatorHandle<R> {}

impl<R> std::fmt::Debug for ReplicatorHandle<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicatorHandle")
            .field("id", &self.id)
            .field("type", &std::any::type_name::<R>())
            .finish()
    }
}

/// Replicator bytes received from a peer, waiting for the tick thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundPacket {
    pub tag: u32,
    pub sender: PeerId,
    pub mode: TransportMode,
    pub bytes: Vec<u8>,
}

/// Cloneable, thread-safe entry point for inbound replicator traffic.
///
/// Transports call [`push`](Self::push) (or use it as an [`InboundSink`])
/// from whatever thread receives data; packets are applied on the next
/// [`ReplicationGroup::tick`].
#[derive(Debug, Clone)]
pub struct InboundSender {
    tx: Sender<InboundPacket>,
}

impl InboundSender {
    /// Queues a packet. Returns `false` if the group no longer exists.
    pub fn push(&self, packet: InboundPacket) -> bool {
        self.tx.send(packet).is_ok()
    }
}

impl InboundSink for InboundSender {
    fn deliver(&self, tag: u32, bytes: &[u8], origin: Origin, mode: TransportMode) {
        let Origin::Peer(sender) = origin else {
            debug!("Ignoring server packet with tag {} on replication channel", tag);
            return;
        };
        let queued = self.push(InboundPacket {
            tag,
            sender,
            mode,
            bytes: bytes.to_vec(),
        });
        if !queued {
            trace!("Replication group gone, dropping packet from {}", sender);
        }
    }
}

/// What one call to [`ReplicationGroup::tick`] did.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    /// Tick number, starting at 1
    pub tick: u64,
    pub packets_sent: u64,
    pub bytes_sent: u64,
    /// Inbound packets handed to a replicator
    pub inbound_applied: u64,
    /// Inbound packets for unknown replicators or with undecodable payloads
    pub inbound_dropped: u64,
    /// Outbound failures (encoding or transport), logged and skipped
    pub errors: u64,
}

/// Owns the replicators of one session and drives them once per tick.
///
/// Inbound data is funnelled through a single-consumer queue and applied at
/// the start of [`tick`](Self::tick), so replicators are only ever touched on
/// the thread that owns the group. A failing replicator or peer is logged and
/// skipped; it never stops the others from being served.
pub struct ReplicationGroup {
    transport: Arc<dyn Transport>,
    config: ReplicationConfig,
    replicators: BTreeMap<ReplicatorId, Box<dyn Replicator>>,
    next_id: u32,
    peers: BTreeSet<PeerId>,
    /// (replicator, peer) pairs that already received their initial state
    initialized: HashSet<(ReplicatorId, PeerId)>,
    inbound_tx: Sender<InboundPacket>,
    inbound_rx: Receiver<InboundPacket>,
    tick_count: u64,
}

impl std::fmt::Debug for ReplicationGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationGroup")
            .field("local_peer", &self.transport.local_peer())
            .field("replicators", &self.replicators.len())
            .field("peers", &self.peers.len())
            .field("tick_count", &self.tick_count)
            .finish()
    }
}

impl ReplicationGroup {
    pub fn new(transport: Arc<dyn Transport>, config: ReplicationConfig) -> Self {
        let (inbound_tx, inbound_rx) = channel::unbounded();
        Self {
            transport,
            config,
            replicators: BTreeMap::new(),
            next_id: 0,
            peers: BTreeSet::new(),
            initialized: HashSet::new(),
            inbound_tx,
            inbound_rx,
            tick_count: 0,
        }
    }

    pub fn local_peer(&self) -> PeerId {
        self.transport.local_peer()
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// Handle for transports to deliver inbound replicator packets.
    pub fn inbound_sender(&self) -> InboundSender {
        InboundSender {
            tx: self.inbound_tx.clone(),
        }
    }

    /// Registers a replicator under the next free id.
    pub fn register<R: Replicator>(&mut self, replicator: R) -> ReplicatorHandle<R> {
        while self.replicators.contains_key(&ReplicatorId(self.next_id)) {
            self.next_id += 1;
        }
        let id = ReplicatorId(self.next_id);
        self.next_id += 1;
        self.insert(id, replicator)
    }

    /// Registers a replicator under a fixed id.
    pub fn register_with_id<R: Replicator>(
        &mut self,
        id: ReplicatorId,
        replicator: R,
    ) -> Result<ReplicatorHandle<R>, ReplicationError> {
        if self.replicators.contains_key(&id) {
            return Err(ReplicationError::DuplicateReplicator(id.0));
        }
        Ok(self.insert(id, replicator))
    }

    fn insert<R: Replicator>(&mut self, id: ReplicatorId, replicator: R) -> ReplicatorHandle<R> {
        info!("📝 Registered replicator '{}' as {}", replicator.name(), id);
        self.replicators.insert(id, Box::new(replicator));
        ReplicatorHandle {
            id,
            _marker: PhantomData,
        }
    }

    pub fn get<R: Replicator>(&self, handle: ReplicatorHandle<R>) -> Option<&R> {
        self.replicators
            .get(&handle.id)?
            .as_any()
            .downcast_ref::<R>()
    }

    pub fn get_mut<R: Replicator>(&mut self, handle: ReplicatorHandle<R>) -> Option<&mut R> {
        self.replicators
            .get_mut(&handle.id)?
            .as_any_mut()
            .downcast_mut::<R>()
    }

    /// Disposes and removes a replicator. It is never polled again and late
    /// packets for it are dropped.
    pub fn remove(&mut self, id: ReplicatorId) -> bool {
        let Some(mut replicator) = self.replicators.remove(&id) else {
            return false;
        };
        replicator.dispose();
        self.initialized.retain(|(replicator_id, _)| *replicator_id != id);
        info!("🗑️ Removed replicator '{}' ({})", replicator.name(), id);
        true
    }

    pub fn replicator_count(&self) -> usize {
        self.replicators.len()
    }

    /// Connected remote peers, in order.
    pub fn peers(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.peers.iter().copied()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Transport notification: `peer` joined the session.
    pub fn peer_added(&mut self, peer: PeerId) {
        if peer == self.local_peer() {
            return;
        }
        if self.peers.insert(peer) {
            info!("👋 Peer {} added to replication group", peer);
        }
    }

    /// Transport notification: `peer` left the session.
    pub fn peer_removed(&mut self, peer: PeerId) {
        if !self.peers.remove(&peer) {
            return;
        }
        self.initialized.retain(|(_, initialized)| *initialized != peer);
        for replicator in self.replicators.values_mut() {
            replicator.on_peer_removed(peer);
        }
        info!("👋 Peer {} removed from replication group", peer);
    }

    /// Applies queued inbound packets. Called at the start of every tick.
    pub fn process_inbound(&mut self, report: &mut TickReport) {
        loop {
            let packet = match self.inbound_rx.try_recv() {
                Ok(packet) => packet,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            };

            let id = ReplicatorId(packet.tag);
            let Some(replicator) = self.replicators.get_mut(&id) else {
                debug!("Dropping packet from {} for unknown replicator {}", packet.sender, id);
                report.inbound_dropped += 1;
                continue;
            };

            match replicator.on_inbound_received(&packet.bytes, packet.sender, packet.mode) {
                Ok(()) => report.inbound_applied += 1,
                Err(e) => {
                    warn!(
                        "Replicator '{}' rejected packet from {}: {}",
                        replicator.name(),
                        packet.sender,
                        e
                    );
                    report.inbound_dropped += 1;
                }
            }
        }
    }

    /// Runs one replication tick.
    ///
    /// Inbound packets are applied first. Then every replicator is asked, for
    /// every connected peer and every transport mode it supports, what to
    /// send; anything it returns goes out as a unicast tagged with the
    /// replicator id.
    pub fn tick(&mut self) -> TickReport {
        self.tick_count += 1;
        let mut report = TickReport {
            tick: self.tick_count,
            ..Default::default()
        };

        self.process_inbound(&mut report);

        for (id, replicator) in self.replicators.iter_mut() {
            replicator.begin_tick();

            for &peer in &self.peers {
                let is_initial = !self.initialized.contains(&(*id, peer));
                let mut delivered = false;

                for &mode in replicator.supported_modes() {
                    let bytes = match replicator.poll_outbound(peer, ReplicationTick::new(mode, is_initial)) {
                        Ok(Some(bytes)) => bytes,
                        Ok(None) => continue,
                        Err(e) => {
                            error!("Replicator '{}' failed to build payload for {}: {}", replicator.name(), peer, e);
                            report.errors += 1;
                            continue;
                        }
                    };

                    match self.transport.send_unicast(peer, id.0, &bytes, mode) {
                        Ok(()) => {
                            report.packets_sent += 1;
                            report.bytes_sent += bytes.len() as u64;
                            delivered = true;
                        }
                        Err(e) => {
                            warn!("Failed to send '{}' to {}: {}", replicator.name(), peer, e);
                            report.errors += 1;
                        }
                    }
                }

                if delivered {
                    self.initialized.insert((*id, peer));
                }
            }

            replicator.end_tick();
        }

        trace!(
            "Tick {}: {} packets ({} bytes) out, {} applied, {} dropped",
            report.tick,
            report.packets_sent,
            report.bytes_sent,
            report.inbound_applied,
            report.inbound_dropped
        );
        report
    }
}

impl Drop for ReplicationGroup {
    fn drop(&mut self) {
        for replicator in self.replicators.values_mut() {
            replicator.dispose();
        }
    }
}
