/// Unreliable transform replication with dirty-piece batching
use super::listeners::{ListenerId, Listeners};
use super::Replicator;
use crate::descriptor::ReplicationDescriptor;
use crate::error::ReplicationError;
use crate::message::Message;
use crate::types::{PeerId, Quat, ReplicationTick, Transform, TransportMode, Vec3};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace, warn};

bitflags! {
    /// Pieces of a transform that can be replicated.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct TransformPieces: u8 {
        const POSITION = 1;
        const ROTATION = 1 << 1;
        const SCALE = 1 << 2;
    }
}

/// Wire form of one transform update.
///
/// Only the pieces named in `dirty_mask` are present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformSnapshot {
    pub dirty_mask: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Vec3>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<Quat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<Vec3>,
}

impl TransformSnapshot {
    /// Builds a snapshot carrying `pieces` of `transform`.
    pub fn capture(transform: &Transform, pieces: TransformPieces) -> Self {
        Self {
            dirty_mask: pieces.bits(),
            position: pieces
                .contains(TransformPieces::POSITION)
                .then_some(transform.position),
            rotation: pieces
                .contains(TransformPieces::ROTATION)
                .then_some(transform.rotation),
            scale: pieces.contains(TransformPieces::SCALE).then_some(transform.scale),
        }
    }

    /// Pieces named in the mask. Unknown bits are ignored.
    pub fn pieces(&self) -> TransformPieces {
        TransformPieces::from_bits_truncate(self.dirty_mask)
    }
}

/// Callback fired after received pieces were applied.
pub type TransformListener = dyn FnMut(&Transform, TransformPieces) + Send;

/// Dirty computation shared by every poll of one logical tick.
#[derive(Debug, Clone, Copy)]
struct TickSnapshot {
    dirty: TransformPieces,
    captured: Transform,
}

/// Replicates position, rotation and scale of one transform from its sender
/// to every receiver.
///
/// Dirtiness is evaluated against the values last broadcast to the whole
/// receiver set, not against anything acknowledged, so a lost update is
/// simply sent again on the next tick while the piece still differs.
///
/// Polling is two-phase: [`begin_tick`](Self::begin_tick) clears the per-tick
/// cache, the first [`collect`](Self::collect) of the tick computes the dirty
/// pieces once, every peer is served from that computation, and
/// [`end_tick`](Self::end_tick) commits the broadcast values only if every
/// current receiver was served.
pub struct TransformBroadcastPacker {
    name: String,
    descriptor: Arc<dyn ReplicationDescriptor>,
    local: PeerId,
    tracked: TransformPieces,
    transform: Transform,
    last_broadcast: Transform,
    sent_peers: HashSet<PeerId>,
    tick: Option<TickSnapshot>,
    served: HashSet<PeerId>,
    on_applied: Listeners<TransformListener>,
}

impl TransformBroadcastPacker {
    /// Creates a packer tracking `tracked` pieces of `initial`.
    pub fn new(
        name: impl Into<String>,
        descriptor: Arc<dyn ReplicationDescriptor>,
        local: PeerId,
        tracked: TransformPieces,
        initial: Transform,
    ) -> Self {
        Self {
            name: name.into(),
            descriptor,
            local,
            tracked,
            transform: initial,
            last_broadcast: initial,
            sent_peers: HashSet::new(),
            tick: None,
            served: HashSet::new(),
            on_applied: Listeners::new(),
        }
    }

    pub fn tracked(&self) -> TransformPieces {
        self.tracked
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    pub fn transform_mut(&mut self) -> &mut Transform {
        &mut self.transform
    }

    pub fn set_transform(&mut self, transform: Transform) {
        self.transform = transform;
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.transform.position = position;
    }

    pub fn set_rotation(&mut self, rotation: Quat) {
        self.transform.rotation = rotation;
    }

    pub fn set_scale(&mut self, scale: Vec3) {
        self.transform.scale = scale;
    }

    /// Whether `peer` has received its initial snapshot.
    pub fn has_sent_to(&self, peer: PeerId) -> bool {
        self.sent_peers.contains(&peer)
    }

    /// Starts a logical tick.
    pub fn begin_tick(&mut self) {
        self.tick = None;
        self.served.clear();
    }

    fn dirty_pieces(&self) -> TransformPieces {
        let mut dirty = TransformPieces::empty();
        if self.transform.position != self.last_broadcast.position {
            dirty |= TransformPieces::POSITION;
        }
        if self.transform.rotation != self.last_broadcast.rotation {
            dirty |= TransformPieces::ROTATION;
        }
        if self.transform.scale != self.last_broadcast.scale {
            dirty |= TransformPieces::SCALE;
        }
        dirty & self.tracked
    }

    fn tick_snapshot(&mut self) -> TickSnapshot {
        if let Some(snapshot) = self.tick {
            return snapshot;
        }
        let snapshot = TickSnapshot {
            dirty: self.dirty_pieces(),
            captured: self.transform,
        };
        self.tick = Some(snapshot);
        snapshot
    }

    /// Builds the snapshot for the single peer in `targets`.
    ///
    /// A peer that never received anything gets every tracked piece even if
    /// `tick.is_initial` is false.
    pub fn collect(&mut self, targets: &[PeerId], tick: ReplicationTick) -> Option<TransformSnapshot> {
        if tick.mode != self.descriptor.preferred_transport() {
            return None;
        }
        if !self.descriptor.is_sender(self.local) {
            return None;
        }

        let [target] = targets else {
            return None;
        };
        let target = *target;

        if !self.descriptor.is_receiver(target) {
            // Changes made while it is away are never sent to it
            self.sent_peers.remove(&target);
            return None;
        }

        let is_initial = tick.is_initial || !self.sent_peers.contains(&target);
        let snapshot = self.tick_snapshot();
        self.served.insert(target);

        let pieces = if is_initial {
            self.tracked
        } else {
            snapshot.dirty
        };
        if pieces.is_empty() {
            return None;
        }

        self.sent_peers.insert(target);
        trace!(
            "Transform '{}' -> {}: {:?}{}",
            self.name,
            target,
            pieces,
            if is_initial { " (initial)" } else { "" }
        );
        Some(TransformSnapshot::capture(&snapshot.captured, pieces))
    }

    /// Ends a logical tick, committing broadcast values if every current
    /// receiver was served.
    pub fn end_tick(&mut self) {
        let receivers = self.descriptor.receivers();
        // Former receivers miss every later change; they need a full
        // snapshot if they come back
        self.sent_peers.retain(|peer| receivers.contains(peer));

        let Some(snapshot) = self.tick.take() else {
            self.served.clear();
            return;
        };

        let all_served = receivers
            .iter()
            .filter(|peer| **peer != self.local)
            .all(|peer| self.served.contains(peer));

        if all_served {
            self.last_broadcast = snapshot.captured;
        } else if !snapshot.dirty.is_empty() {
            trace!(
                "Transform '{}' keeps {:?} dirty: not every receiver was served",
                self.name,
                snapshot.dirty
            );
        }
        self.served.clear();
    }

    /// Applies a snapshot received from `sender`.
    ///
    /// Returns the pieces actually applied. Pieces this packer does not track
    /// are ignored, as are pieces flagged without a value.
    pub fn receive(&mut self, snapshot: TransformSnapshot, sender: PeerId) -> TransformPieces {
        if !self.descriptor.is_sender(sender) {
            warn!(
                "Transform '{}' dropped snapshot from {}: not a sender",
                self.name, sender
            );
            return TransformPieces::empty();
        }

        let wanted = snapshot.pieces() & self.tracked;
        let mut applied = TransformPieces::empty();

        if wanted.contains(TransformPieces::POSITION) {
            match snapshot.position {
                Some(position) => {
                    self.transform.position = position;
                    applied |= TransformPieces::POSITION;
                }
                None => warn!("Transform '{}': position flagged but missing", self.name),
            }
        }
        if wanted.contains(TransformPieces::ROTATION) {
            match snapshot.rotation {
                Some(rotation) => {
                    self.transform.rotation = rotation;
                    applied |= TransformPieces::ROTATION;
                }
                None => warn!("Transform '{}': rotation flagged but missing", self.name),
            }
        }
        if wanted.contains(TransformPieces::SCALE) {
            match snapshot.scale {
                Some(scale) => {
                    self.transform.scale = scale;
                    applied |= TransformPieces::SCALE;
                }
                None => warn!("Transform '{}': scale flagged but missing", self.name),
            }
        }

        if !applied.is_empty() {
            let transform = &self.transform;
            for listener in self.on_applied.iter_mut() {
                listener(transform, applied);
            }
        }
        applied
    }

    /// Registers a callback fired after received pieces were applied.
    pub fn on_applied(&mut self, listener: impl FnMut(&Transform, TransformPieces) + Send + 'static) -> ListenerId {
        self.on_applied.add(Box::new(listener))
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.on_applied.remove(id)
    }
}

impl std::fmt::Debug for TransformBroadcastPacker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformBroadcastPacker")
            .field("name", &self.name)
            .field("tracked", &self.tracked)
            .field("transform", &self.transform)
            .field("sent_peers", &self.sent_peers.len())
            .finish()
    }
}

impl Replicator for TransformBroadcastPacker {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_modes(&self) -> &'static [TransportMode] {
        &TransportMode::ALL
    }

    fn begin_tick(&mut self) {
        TransformBroadcastPacker::begin_tick(self);
    }

    fn poll_outbound(
        &mut self,
        target: PeerId,
        tick: ReplicationTick,
    ) -> Result<Option<Vec<u8>>, ReplicationError> {
        let Some(snapshot) = self.collect(&[target], tick) else {
            return Ok(None);
        };
        Ok(Some(snapshot.encode()?))
    }

    fn end_tick(&mut self) {
        TransformBroadcastPacker::end_tick(self);
    }

    fn on_inbound_received(
        &mut self,
        bytes: &[u8],
        sender: PeerId,
        _mode: TransportMode,
    ) -> Result<(), ReplicationError> {
        let snapshot = TransformSnapshot::decode(bytes)?;
        self.receive(snapshot, sender);
        Ok(())
    }

    fn on_peer_removed(&mut self, peer: PeerId) {
        self.sent_peers.remove(&peer);
        self.served.remove(&peer);
    }

    fn dispose(&mut self) {
        debug!("Disposing transform '{}'", self.name);
        self.sent_peers.clear();
        self.tick = None;
        self.served.clear();
        self.on_applied.clear();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::SharedDescriptor;

    const MODE: TransportMode = TransportMode::UNRELIABLE_UNORDERED;
    const TICK: ReplicationTick = ReplicationTick {
        mode: MODE,
        is_initial: false,
    };

    struct Fixture {
        owner: PeerId,
        b: PeerId,
        c: PeerId,
        descriptor: SharedDescriptor,
    }

    fn fixture() -> Fixture {
        let (owner, b, c) = (PeerId::new(), PeerId::new(), PeerId::new());
        let descriptor = SharedDescriptor::owned_by(owner, [b], MODE);
        Fixture {
            owner,
            b,
            c,
            descriptor,
        }
    }

    fn packer(fx: &Fixture, local: PeerId, tracked: TransformPieces) -> TransformBroadcastPacker {
        TransformBroadcastPacker::new(
            "car",
            Arc::new(fx.descriptor.clone()),
            local,
            tracked,
            Transform::default(),
        )
    }

    /// Runs one logical tick over `peers` and returns what each received.
    fn run_tick(
        packer: &mut TransformBroadcastPacker,
        peers: &[PeerId],
    ) -> Vec<Option<TransformSnapshot>> {
        packer.begin_tick();
        let out = peers.iter().map(|peer| packer.collect(&[*peer], TICK)).collect();
        packer.end_tick();
        out
    }

    #[test]
    fn test_first_contact_gets_full_tracked_snapshot() {
        let fx = fixture();
        let mut packer = packer(&fx, fx.owner, TransformPieces::all());

        let out = run_tick(&mut packer, &[fx.b]);
        let snapshot = out[0].clone().unwrap();
        assert_eq!(snapshot.pieces(), TransformPieces::all());
        assert_eq!(snapshot.scale, Some(Vec3::one()));
        assert!(packer.has_sent_to(fx.b));

        assert_eq!(run_tick(&mut packer, &[fx.b]), vec![None]);
    }

    #[test]
    fn test_dirty_mask_only_contains_tracked_pieces() {
        let fx = fixture();
        let mut packer = packer(&fx, fx.owner, TransformPieces::POSITION);

        let initial = run_tick(&mut packer, &[fx.b])[0].clone().unwrap();
        assert_eq!(initial.pieces(), TransformPieces::POSITION);
        assert!(initial.rotation.is_none() && initial.scale.is_none());

        packer.set_rotation(Quat::from_rotation_y(1.0));
        packer.set_scale(Vec3::new(2.0, 2.0, 2.0));
        assert_eq!(run_tick(&mut packer, &[fx.b]), vec![None]);

        packer.set_position(Vec3::new(1.0, 0.0, 0.0));
        let update = run_tick(&mut packer, &[fx.b])[0].clone().unwrap();
        assert_eq!(update.pieces(), TransformPieces::POSITION);
        assert_eq!(update.position, Some(Vec3::new(1.0, 0.0, 0.0)));
    }

    #[test]
    fn test_only_changed_pieces_are_sent() {
        let fx = fixture();
        let mut packer = packer(&fx, fx.owner, TransformPieces::all());
        run_tick(&mut packer, &[fx.b]);

        packer.set_rotation(Quat::from_rotation_y(0.5));
        let update = run_tick(&mut packer, &[fx.b])[0].clone().unwrap();
        assert_eq!(update.pieces(), TransformPieces::ROTATION);
        assert!(update.position.is_none());
    }

    #[test]
    fn test_commit_waits_for_every_receiver() {
        let fx = fixture();
        fx.descriptor.add_receiver(fx.c);
        let mut packer = packer(&fx, fx.owner, TransformPieces::POSITION);
        run_tick(&mut packer, &[fx.b, fx.c]);

        packer.set_position(Vec3::new(5.0, 0.0, 0.0));

        // Only B is polled, so the change stays dirty
        let out = run_tick(&mut packer, &[fx.b]);
        assert!(out[0].is_some());

        let out = run_tick(&mut packer, &[fx.b, fx.c]);
        assert_eq!(out[0].as_ref().map(|s| s.pieces()), Some(TransformPieces::POSITION));
        assert_eq!(out[1].as_ref().map(|s| s.pieces()), Some(TransformPieces::POSITION));

        assert_eq!(run_tick(&mut packer, &[fx.b, fx.c]), vec![None, None]);
    }

    #[test]
    fn test_all_peers_in_a_tick_see_the_same_values() {
        let fx = fixture();
        fx.descriptor.add_receiver(fx.c);
        let mut packer = packer(&fx, fx.owner, TransformPieces::POSITION);
        run_tick(&mut packer, &[fx.b, fx.c]);

        packer.set_position(Vec3::new(1.0, 0.0, 0.0));
        packer.begin_tick();
        let to_b = packer.collect(&[fx.b], TICK).unwrap();
        packer.set_position(Vec3::new(2.0, 0.0, 0.0));
        let to_c = packer.collect(&[fx.c], TICK).unwrap();
        packer.end_tick();

        assert_eq!(to_b, to_c);
        // The later write is still dirty against what was broadcast
        let next = run_tick(&mut packer, &[fx.b, fx.c]);
        assert_eq!(next[0].as_ref().and_then(|s| s.position), Some(Vec3::new(2.0, 0.0, 0.0)));
    }

    #[test]
    fn test_new_observer_gets_snapshot_without_changes() {
        let fx = fixture();
        let mut packer = packer(&fx, fx.owner, TransformPieces::POSITION | TransformPieces::ROTATION);
        run_tick(&mut packer, &[fx.b]);
        run_tick(&mut packer, &[fx.b]);

        fx.descriptor.add_receiver(fx.c);
        let out = run_tick(&mut packer, &[fx.b, fx.c]);
        assert!(out[0].is_none());
        assert_eq!(
            out[1].as_ref().map(|s| s.pieces()),
            Some(TransformPieces::POSITION | TransformPieces::ROTATION)
        );
    }

    #[test]
    fn test_resumed_observer_gets_full_snapshot() {
        let fx = fixture();
        fx.descriptor.add_receiver(fx.c);
        let mut packer = packer(&fx, fx.owner, TransformPieces::POSITION);
        run_tick(&mut packer, &[fx.b, fx.c]);
        assert!(packer.has_sent_to(fx.c));

        fx.descriptor.remove_receiver(fx.c);
        packer.set_position(Vec3::new(9.0, 0.0, 0.0));
        let out = run_tick(&mut packer, &[fx.b, fx.c]);
        assert!(out[0].is_some());
        assert!(out[1].is_none());
        assert!(!packer.has_sent_to(fx.c));

        fx.descriptor.add_receiver(fx.c);
        let out = run_tick(&mut packer, &[fx.b, fx.c]);
        assert!(out[0].is_none());
        let resumed = out[1].clone().unwrap();
        assert_eq!(resumed.pieces(), TransformPieces::POSITION);
        assert_eq!(resumed.position, Some(Vec3::new(9.0, 0.0, 0.0)));
    }

    #[test]
    fn test_unpolled_former_receiver_is_forgotten_at_tick_end() {
        let fx = fixture();
        let mut packer = packer(&fx, fx.owner, TransformPieces::POSITION);
        run_tick(&mut packer, &[fx.b]);

        fx.descriptor.remove_receiver(fx.b);
        packer.set_position(Vec3::new(3.0, 0.0, 0.0));
        run_tick(&mut packer, &[]);
        assert!(!packer.has_sent_to(fx.b));

        fx.descriptor.add_receiver(fx.b);
        let out = run_tick(&mut packer, &[fx.b]);
        assert_eq!(out[0].as_ref().and_then(|s| s.position), Some(Vec3::new(3.0, 0.0, 0.0)));
    }

    #[test]
    fn test_collect_preconditions() {
        let fx = fixture();
        let mut packer = packer(&fx, fx.owner, TransformPieces::all());
        packer.begin_tick();

        let wrong_mode = ReplicationTick::continuing(TransportMode::RELIABLE_ORDERED);
        assert!(packer.collect(&[fx.b], wrong_mode).is_none());
        assert!(packer.collect(&[fx.c], TICK).is_none());
        assert!(packer.collect(&[fx.b, fx.c], TICK).is_none());
        assert!(!packer.has_sent_to(fx.b));

        let mut observer = packer_for_observer(&fx);
        observer.begin_tick();
        assert!(observer.collect(&[fx.b], TICK).is_none());
    }

    fn packer_for_observer(fx: &Fixture) -> TransformBroadcastPacker {
        packer(fx, fx.b, TransformPieces::all())
    }

    #[test]
    fn test_receiver_applies_only_tracked_pieces() {
        let fx = fixture();
        let mut receiver = packer(&fx, fx.b, TransformPieces::POSITION);

        let snapshot = TransformSnapshot::capture(
            &Transform {
                position: Vec3::new(3.0, 4.0, 5.0),
                rotation: Quat::from_rotation_y(1.0),
                scale: Vec3::new(9.0, 9.0, 9.0),
            },
            TransformPieces::all(),
        );
        let applied = receiver.receive(snapshot, fx.owner);

        assert_eq!(applied, TransformPieces::POSITION);
        assert_eq!(receiver.transform().position, Vec3::new(3.0, 4.0, 5.0));
        assert_eq!(receiver.transform().rotation, Quat::identity());
        assert_eq!(receiver.transform().scale, Vec3::one());
    }

    #[test]
    fn test_receiver_skips_missing_pieces_and_stale_senders() {
        let fx = fixture();
        let mut receiver = packer(&fx, fx.b, TransformPieces::all());

        let flagged_only = TransformSnapshot {
            dirty_mask: (TransformPieces::POSITION | TransformPieces::SCALE).bits(),
            position: None,
            rotation: None,
            scale: Some(Vec3::new(2.0, 2.0, 2.0)),
        };
        assert_eq!(receiver.receive(flagged_only, fx.owner), TransformPieces::SCALE);

        let from_stranger = TransformSnapshot::capture(&Transform::default(), TransformPieces::all());
        assert_eq!(receiver.receive(from_stranger, fx.c), TransformPieces::empty());
        assert_eq!(receiver.transform().scale, Vec3::new(2.0, 2.0, 2.0));
    }

    #[test]
    fn test_wire_format_omits_clean_pieces() {
        let snapshot = TransformSnapshot::capture(&Transform::default(), TransformPieces::ROTATION);
        let json = serde_json::to_value(&snapshot).unwrap();

        assert_eq!(json["dirty_mask"], 2);
        assert!(json.get("rotation").is_some());
        assert!(json.get("position").is_none());
        assert!(json.get("scale").is_none());
    }

    #[test]
    fn test_departed_peer_gets_fresh_initial_on_return() {
        let fx = fixture();
        let mut packer = packer(&fx, fx.owner, TransformPieces::POSITION);
        run_tick(&mut packer, &[fx.b]);

        packer.on_peer_removed(fx.b);
        assert!(!packer.has_sent_to(fx.b));
        let out = run_tick(&mut packer, &[fx.b]);
        assert_eq!(out[0].as_ref().map(|s| s.pieces()), Some(TransformPieces::POSITION));
    }
}
