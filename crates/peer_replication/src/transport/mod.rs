//! # Transport Boundary
//!
//! The replication layer never opens sockets itself. Everything it sends goes
//! through a [`Transport`], which provides per-peer unicast on any of the four
//! [`TransportMode`]s, a channel to the coordinating server and the identity of
//! the local peer.
//!
//! [`loopback`] contains an in-memory implementation that wires several peers
//! together inside one process; it backs the tests and the simulator binary.

pub mod loopback;

use crate::error::TransportError;
use crate::types::{PeerId, TransportMode};

pub use loopback::{InboundSink, LoopbackEndpoint, LoopbackNetwork};

/// Outbound side of a network session.
///
/// Sends are fire-and-forget: a successful return means the bytes were handed
/// to the transport, not that the peer received them.
pub trait Transport: Send + Sync {
    /// The identity of this process in the session.
    fn local_peer(&self) -> PeerId;

    /// Sends `bytes` under `tag` to a single peer on the given channel.
    fn send_unicast(
        &self,
        peer: PeerId,
        tag: u32,
        bytes: &[u8],
        mode: TransportMode,
    ) -> Result<(), TransportError>;

    /// Sends `bytes` under `tag` to the coordinating server.
    fn send_to_server(&self, tag: u32, bytes: &[u8]) -> Result<(), TransportError>;
}
