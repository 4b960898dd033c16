//! # Replicators
//!
//! A replicator keeps one piece of application state in sync between peers.
//! All replicators share a pull/push contract with the session driver
//! ([`ReplicationGroup`]):
//!
//! - once per tick the driver calls [`Replicator::begin_tick`], then asks
//!   [`Replicator::poll_outbound`] "what should I send to this peer now?" for
//!   every connected peer and every supported transport mode, then calls
//!   [`Replicator::end_tick`];
//! - inbound bytes for the replicator are pushed through
//!   [`Replicator::on_inbound_received`] on the tick thread.
//!
//! ## Available replicators
//!
//! - [`NetworkedField`] - last-writer-wins replication of one optional value
//! - [`MessageStreamReplicator`] - queued, ordered, per-peer discrete messages
//! - [`TransformBroadcastPacker`] - unreliable position/rotation/scale with dirty bits
//!
//! Each replicator also exposes a typed `collect`/`receive` API that skips the
//! codec, which is what the byte-level trait methods are built on.

pub mod field;
pub mod group;
pub mod listeners;
pub mod stream;
pub mod transform;
mod tests;

pub use field::{FieldPayload, FieldState, NetworkedField};
pub use group::{
    InboundPacket, InboundSender, ReplicationGroup, ReplicatorHandle, ReplicatorId, TickReport,
};
pub use listeners::{ListenerId, Listeners};
pub use stream::MessageStreamReplicator;
pub use transform::{TransformBroadcastPacker, TransformPieces, TransformSnapshot};

use crate::error::ReplicationError;
use crate::types::{PeerId, ReplicationTick, TransportMode};
use serde::{de::DeserializeOwned, Serialize};
use std::any::Any;
use std::fmt::Debug;

/// Values a replicator can carry: plain serde data that can be cloned into
/// per-peer payloads.
pub trait ReplicatedValue:
    Serialize + DeserializeOwned + Clone + Send + Sync + Debug + 'static
{
}

impl<T> ReplicatedValue for T where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + Debug + 'static
{
}

/// Byte-level contract between a replicator and the session driver.
///
/// Implementations are polled from a single thread; they are `Send` so a
/// group can be moved to the thread that drives it.
pub trait Replicator: Send + 'static {
    /// Name used in log messages.
    fn name(&self) -> &str;

    /// Transport modes this replicator may be polled on.
    fn supported_modes(&self) -> &'static [TransportMode];

    /// Called once per tick before any poll.
    fn begin_tick(&mut self) {}

    /// Bytes to send to `target` for this tick, or `None` when there is
    /// nothing to send.
    fn poll_outbound(
        &mut self,
        target: PeerId,
        tick: ReplicationTick,
    ) -> Result<Option<Vec<u8>>, ReplicationError>;

    /// Called once per tick after every peer was polled.
    fn end_tick(&mut self) {}

    /// Applies bytes received from `sender`.
    fn on_inbound_received(
        &mut self,
        bytes: &[u8],
        sender: PeerId,
        mode: TransportMode,
    ) -> Result<(), ReplicationError>;

    /// Releases per-peer state for a peer that left the session.
    fn on_peer_removed(&mut self, _peer: PeerId) {}

    /// Called when the replicator is removed from its group. It will not be
    /// polled again.
    fn dispose(&mut self) {}

    /// Get the replicator as Any for downcasting
    fn as_any(&self) -> &dyn Any;

    /// Get the replicator as Any for mutable downcasting
    fn as_any_mut(&mut self) -> &mut dyn Any;
}
