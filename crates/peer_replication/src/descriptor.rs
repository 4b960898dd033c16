//! # Replication Descriptors
//!
//! A descriptor answers three questions about one replicated object: which
//! peers may originate changes (senders), which peers should receive them
//! (receivers) and which transport channel the object prefers. Authority
//! negotiation lives outside this crate; it only has to keep a descriptor up
//! to date. Membership may change between ticks and replicators re-read it on
//! every poll.

use crate::types::{PeerId, TransportMode};
use std::collections::BTreeSet;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Read-only view of an object's replication authority.
pub trait ReplicationDescriptor: Send + Sync {
    /// Peers currently allowed to originate changes.
    fn senders(&self) -> Vec<PeerId>;

    /// Peers that should currently receive changes.
    fn receivers(&self) -> Vec<PeerId>;

    /// Channel this object is replicated on.
    fn preferred_transport(&self) -> TransportMode;

    fn is_sender(&self, peer: PeerId) -> bool {
        self.senders().contains(&peer)
    }

    fn is_receiver(&self, peer: PeerId) -> bool {
        self.receivers().contains(&peer)
    }
}

#[derive(Debug, Clone)]
struct DescriptorState {
    senders: BTreeSet<PeerId>,
    receivers: BTreeSet<PeerId>,
    preferred: TransportMode,
}

/// Thread-safe descriptor that can be cloned into several replicators and
/// mutated by whatever negotiates authority.
///
/// Clones share state.
///
/// ```rust
/// use peer_replication::{PeerId, ReplicationDescriptor, SharedDescriptor, TransportMode};
///
/// let (a, b) = (PeerId::new(), PeerId::new());
/// let descriptor = SharedDescriptor::new(TransportMode::RELIABLE_ORDERED);
/// descriptor.set_senders([a]);
/// descriptor.add_receiver(b);
///
/// assert!(descriptor.is_sender(a));
/// assert!(descriptor.is_receiver(b));
/// assert!(!descriptor.is_receiver(a));
/// ```
#[derive(Debug, Clone)]
pub struct SharedDescriptor {
    state: Arc<RwLock<DescriptorState>>,
}

impl SharedDescriptor {
    /// Creates a descriptor with no senders and no receivers.
    pub fn new(preferred: TransportMode) -> Self {
        Self {
            state: Arc::new(RwLock::new(DescriptorState {
                senders: BTreeSet::new(),
                receivers: BTreeSet::new(),
                preferred,
            })),
        }
    }

    /// One sender, every other listed peer a receiver.
    pub fn owned_by(owner: PeerId, receivers: impl IntoIterator<Item = PeerId>, preferred: TransportMode) -> Self {
        let descriptor = Self::new(preferred);
        descriptor.set_senders([owner]);
        for peer in receivers {
            if peer != owner {
                descriptor.add_receiver(peer);
            }
        }
        descriptor
    }

    fn read(&self) -> RwLockReadGuard<'_, DescriptorState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, DescriptorState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replaces the sender set.
    pub fn set_senders(&self, senders: impl IntoIterator<Item = PeerId>) {
        self.write().senders = senders.into_iter().collect();
    }

    pub fn add_sender(&self, peer: PeerId) -> bool {
        self.write().senders.insert(peer)
    }

    pub fn remove_sender(&self, peer: PeerId) -> bool {
        self.write().senders.remove(&peer)
    }

    /// Replaces the receiver set.
    pub fn set_receivers(&self, receivers: impl IntoIterator<Item = PeerId>) {
        self.write().receivers = receivers.into_iter().collect();
    }

    pub fn add_receiver(&self, peer: PeerId) -> bool {
        self.write().receivers.insert(peer)
    }

    pub fn remove_receiver(&self, peer: PeerId) -> bool {
        self.write().receivers.remove(&peer)
    }

    /// Forgets `peer` in both roles, e.g. when it leaves the session.
    pub fn remove_peer(&self, peer: PeerId) {
        let mut state = self.write();
        state.senders.remove(&peer);
        state.receivers.remove(&peer);
    }

    pub fn set_preferred_transport(&self, mode: TransportMode) {
        self.write().preferred = mode;
    }
}

impl ReplicationDescriptor for SharedDescriptor {
    fn senders(&self) -> Vec<PeerId> {
        self.read().senders.iter().copied().collect()
    }

    fn receivers(&self) -> Vec<PeerId> {
        self.read().receivers.iter().copied().collect()
    }

    fn preferred_transport(&self) -> TransportMode {
        self.read().preferred
    }

    fn is_sender(&self, peer: PeerId) -> bool {
        self.read().senders.contains(&peer)
    }

    fn is_receiver(&self, peer: PeerId) -> bool {
        self.read().receivers.contains(&peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_membership() {
        let descriptor = SharedDescriptor::new(TransportMode::UNRELIABLE_ORDERED);
        let view = descriptor.clone();
        let peer = PeerId::new();

        descriptor.add_receiver(peer);
        assert!(view.is_receiver(peer));

        descriptor.remove_peer(peer);
        assert!(!view.is_receiver(peer));
    }

    #[test]
    fn test_owned_by_excludes_owner_from_receivers() {
        let (owner, other) = (PeerId::new(), PeerId::new());
        let descriptor =
            SharedDescriptor::owned_by(owner, [owner, other], TransportMode::RELIABLE_ORDERED);

        assert_eq!(descriptor.senders(), vec![owner]);
        assert_eq!(descriptor.receivers(), vec![other]);
    }

    #[test]
    fn test_preferred_transport_can_change() {
        let descriptor = SharedDescriptor::new(TransportMode::RELIABLE_ORDERED);
        descriptor.set_preferred_transport(TransportMode::UNRELIABLE_UNORDERED);
        assert_eq!(
            descriptor.preferred_transport(),
            TransportMode::UNRELIABLE_UNORDERED
        );
    }
}
