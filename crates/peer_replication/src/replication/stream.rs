/// Queued per-peer delivery of discrete messages
use super::listeners::{ListenerId, Listeners};
use super::{ReplicatedValue, Replicator};
use crate::config::ReplicationConfig;
use crate::descriptor::ReplicationDescriptor;
use crate::error::ReplicationError;
use crate::message::Message;
use crate::types::{PeerId, ReplicationTick, TransportMode};
use std::any::Any;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Callback receiving one message and the peer that sent it.
pub type MessageListener<T> = dyn FnMut(&T, PeerId) + Send;

const SUPPORTED_MODES: [TransportMode; 1] = [TransportMode::RELIABLE_ORDERED];

/// Delivers every queued message, in order, to specific peers.
///
/// Messages addressed to a peer wait in that peer's queue until the driver
/// polls it on the reliable-ordered channel, then go out as one batch. A peer
/// that is not (yet) a receiver gets a grace period of
/// [`frames_to_drop_messages`](ReplicationConfig::frames_to_drop_messages)
/// polls; if it never qualifies its queue is discarded.
///
/// Messages addressed to the local peer are delivered immediately without
/// touching the network.
pub struct MessageStreamReplicator<T: ReplicatedValue> {
    name: String,
    descriptor: Arc<dyn ReplicationDescriptor>,
    local: PeerId,
    frames_to_drop: u32,
    queues: BTreeMap<PeerId, VecDeque<T>>,
    drop_counters: BTreeMap<PeerId, u32>,
    on_received: Listeners<MessageListener<T>>,
}

impl<T: ReplicatedValue> MessageStreamReplicator<T> {
    pub fn new(
        name: impl Into<String>,
        descriptor: Arc<dyn ReplicationDescriptor>,
        local: PeerId,
        config: &ReplicationConfig,
    ) -> Self {
        Self {
            name: name.into(),
            descriptor,
            local,
            frames_to_drop: config.frames_to_drop_messages,
            queues: BTreeMap::new(),
            drop_counters: BTreeMap::new(),
            on_received: Listeners::new(),
        }
    }

    /// Queues `message` for every peer in `targets`.
    ///
    /// A target equal to the local peer receives the message synchronously.
    /// Queuing for a peer that is already waiting does not restart its grace
    /// period.
    pub fn send_message(&mut self, message: T, targets: &[PeerId]) {
        for &target in targets {
            if target == self.local {
                for listener in self.on_received.iter_mut() {
                    listener(&message, target);
                }
                continue;
            }

            self.queues
                .entry(target)
                .or_default()
                .push_back(message.clone());
            self.drop_counters.entry(target).or_insert(0);
        }
    }

    /// Drains the queue for the single peer in `targets`.
    ///
    /// Returns `None` on any channel other than reliable-ordered, when more or
    /// fewer than one target is given, when the target is not a receiver, or
    /// when nothing is queued.
    pub fn collect(&mut self, targets: &[PeerId], tick: ReplicationTick) -> Option<Vec<T>> {
        if tick.mode != TransportMode::RELIABLE_ORDERED {
            return None;
        }

        let [target] = targets else {
            return None;
        };
        let target = *target;

        if !self.descriptor.is_receiver(target) {
            let counter = self.drop_counters.get_mut(&target)?;
            *counter += 1;
            if *counter >= self.frames_to_drop {
                let dropped = self.queues.remove(&target).map_or(0, |queue| queue.len());
                self.drop_counters.remove(&target);
                warn!(
                    "Stream '{}' dropped {} messages for {}: not a receiver after {} polls",
                    self.name, dropped, target, self.frames_to_drop
                );
            }
            return None;
        }

        self.drop_counters.remove(&target);
        let batch: Vec<T> = self.queues.remove(&target)?.into();
        if batch.is_empty() {
            return None;
        }

        trace!("Stream '{}' sending {} messages to {}", self.name, batch.len(), target);
        Some(batch)
    }

    /// Delivers a batch received from `sender`, in order.
    ///
    /// Returns `false` and drops the whole batch if `sender` is not a current
    /// sender.
    pub fn receive(&mut self, batch: Vec<T>, sender: PeerId) -> bool {
        if !self.descriptor.is_sender(sender) {
            warn!(
                "Stream '{}' dropped {} messages from {}: not a sender",
                self.name,
                batch.len(),
                sender
            );
            return false;
        }

        for message in &batch {
            for listener in self.on_received.iter_mut() {
                listener(message, sender);
            }
        }
        true
    }

    /// Registers a callback fired for every delivered message.
    pub fn on_message_received(&mut self, listener: impl FnMut(&T, PeerId) + Send + 'static) -> ListenerId {
        self.on_received.add(Box::new(listener))
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.on_received.remove(id)
    }

    /// Messages waiting for `peer`.
    pub fn pending_for(&self, peer: PeerId) -> usize {
        self.queues.get(&peer).map_or(0, VecDeque::len)
    }

    /// Polls `peer` has waited as a non-receiver, if it has queued messages.
    pub fn drop_counter(&self, peer: PeerId) -> Option<u32> {
        self.drop_counters.get(&peer).copied()
    }
}

impl<T: ReplicatedValue> std::fmt::Debug for MessageStreamReplicator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStreamReplicator")
            .field("name", &self.name)
            .field("queued_peers", &self.queues.len())
            .field("frames_to_drop", &self.frames_to_drop)
            .finish()
    }
}

impl<T: ReplicatedValue> Replicator for MessageStreamReplicator<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_modes(&self) -> &'static [TransportMode] {
        &SUPPORTED_MODES
    }

    fn poll_outbound(
        &mut self,
        target: PeerId,
        tick: ReplicationTick,
    ) -> Result<Option<Vec<u8>>, ReplicationError> {
        let Some(batch) = self.collect(&[target], tick) else {
            return Ok(None);
        };
        Ok(Some(batch.encode()?))
    }

    fn on_inbound_received(
        &mut self,
        bytes: &[u8],
        sender: PeerId,
        _mode: TransportMode,
    ) -> Result<(), ReplicationError> {
        let batch = Vec::<T>::decode(bytes)?;
        self.receive(batch, sender);
        Ok(())
    }

    fn on_peer_removed(&mut self, peer: PeerId) {
        if let Some(queue) = self.queues.remove(&peer) {
            debug!(
                "Stream '{}' discarded {} messages for departed peer {}",
                self.name,
                queue.len(),
                peer
            );
        }
        self.drop_counters.remove(&peer);
    }

    fn dispose(&mut self) {
        debug!("Disposing stream '{}'", self.name);
        self.queues.clear();
        self.drop_counters.clear();
        self.on_received.clear();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
