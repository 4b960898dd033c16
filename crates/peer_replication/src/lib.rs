//! # Peer Replication
//!
//! Keeps application state synchronized across a small number of networked
//! peers with explicit sender/receiver authority, heterogeneous delivery
//! guarantees and peers that come and go mid-session.
//!
//! ## Core Features
//!
//! - **Typed Messaging**: [`TypedMessageRouter`] binds payload types to wire
//!   tags and dispatches each inbound message to exactly one handler, filtered
//!   by origin (peer or coordinating server)
//! - **Replicated Values**: [`NetworkedField`] gives last-writer-wins
//!   replication of one optional value with per-peer dirty tracking
//! - **Message Streams**: [`MessageStreamReplicator`] delivers queued,
//!   ordered messages with a grace period for peers that are not receivers yet
//! - **Transforms**: [`TransformBroadcastPacker`] sends only the
//!   position/rotation/scale pieces that changed, and full snapshots to new
//!   observers
//! - **Session Driver**: [`ReplicationGroup`] owns replicators, polls them
//!   once per tick and applies inbound packets on the tick thread
//!
//! ## Architecture Overview
//!
//! The crate never owns sockets. Outbound traffic goes through the
//! [`Transport`] trait; inbound traffic is pushed into
//! [`TypedMessageRouter::dispatch`] or a group's [`InboundSender`]. Who may
//! send and who should receive is answered by a [`ReplicationDescriptor`],
//! which authority negotiation keeps up to date.
//!
//! ## Quick Start Example
//!
//! ```rust
//! use peer_replication::*;
//! use std::sync::Arc;
//!
//! let network = LoopbackNetwork::new();
//! let (a, b) = (PeerId::new(), PeerId::new());
//! let descriptor = SharedDescriptor::owned_by(a, [b], TransportMode::RELIABLE_ORDERED);
//!
//! let mut group_a = ReplicationGroup::new(Arc::new(network.endpoint(a)), ReplicationConfig::default());
//! let mut group_b = ReplicationGroup::new(Arc::new(network.endpoint(b)), ReplicationConfig::default());
//! network.attach(a, Arc::new(group_a.inbound_sender()));
//! network.attach(b, Arc::new(group_b.inbound_sender()));
//! group_a.peer_added(b);
//! group_b.peer_added(a);
//!
//! let laps_a = group_a.register(NetworkedField::<u32>::new("laps", Arc::new(descriptor.clone()), a));
//! let laps_b = group_b.register(NetworkedField::<u32>::new("laps", Arc::new(descriptor.clone()), b));
//!
//! group_a.get_mut(laps_a).unwrap().set_value(Some(3))?;
//! group_a.tick();
//! group_b.tick();
//!
//! assert_eq!(group_b.get(laps_b).unwrap().value(), Some(&3));
//! # Ok::<(), FieldError>(())
//! ```

pub mod config;
pub mod descriptor;
pub mod error;
pub mod message;
pub mod replication;
pub mod router;
pub mod transport;
pub mod types;

pub use config::{ReplicationConfig, FRAMES_TO_DROP_MESSAGES};
pub use descriptor::{ReplicationDescriptor, SharedDescriptor};
pub use error::{CodecError, ConfigError, FieldError, ReplicationError, RouterError, TransportError};
pub use message::{Message, MessageHandler, TypedMessageHandler};
pub use replication::{
    FieldPayload, FieldState, InboundPacket, InboundSender, ListenerId, MessageStreamReplicator,
    NetworkedField, ReplicatedValue, ReplicationGroup, Replicator, ReplicatorHandle, ReplicatorId,
    TickReport, TransformBroadcastPacker, TransformPieces, TransformSnapshot,
};
pub use router::{DispatchOutcome, RouterStats, TypedMessageRouter, Unregisterer};
pub use transport::{InboundSink, LoopbackEndpoint, LoopbackNetwork, Transport};
pub use types::*;
