//! # Error Types
//!
//! Every fallible operation in the crate returns one of these enums. Programmer
//! errors (duplicate registration, writing a field without authority) surface
//! as `Err` to the caller. Anomalies caused by network input are logged and
//! dropped instead, so they never appear here unless a caller explicitly asks
//! for the outcome.

use crate::types::PeerId;

/// Payload encoding or decoding failed.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization failed when converting a payload to bytes
    #[error("Serialization error for '{type_name}': {source}")]
    Serialization {
        type_name: &'static str,
        #[source]
        source: serde_json::Error,
    },
    /// Deserialization failed when converting bytes to a payload
    #[error("Deserialization error for '{type_name}' ({len} bytes): {source}")]
    Deserialization {
        type_name: &'static str,
        len: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors raised by [`TypedMessageRouter`](crate::router::TypedMessageRouter).
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// The wire tag is already bound to another type
    #[error("Tag {tag} is already registered to '{existing}'")]
    DuplicateTag { tag: u32, existing: &'static str },
    /// The payload type already owns a tag
    #[error("Type '{type_name}' is already registered with tag {tag}")]
    DuplicateType { type_name: &'static str, tag: u32 },
    /// A handler for the payload type is already installed
    #[error("A handler for '{type_name}' is already registered")]
    DuplicateHandler { type_name: &'static str },
    /// The payload type was never given a tag
    #[error("Type '{type_name}' has no registered tag")]
    UnknownType { type_name: &'static str },
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// A handler reported a failure while processing a message
    #[error("Handler execution error: {0}")]
    HandlerExecution(String),
}

/// Errors raised by local writes to a [`NetworkedField`](crate::replication::NetworkedField).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    /// The local peer is not currently allowed to originate changes
    #[error("Peer {local} is not a sender for this field")]
    NotSender { local: PeerId },
}

/// Errors raised by the transport boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Peer {0} is not connected")]
    PeerNotConnected(PeerId),
    #[error("No coordinating server is attached")]
    NoServer,
    #[error("Transport is closed")]
    Closed,
}

/// Errors raised while driving replicators.
#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// An inbound packet named a replicator that is not (or no longer) registered
    #[error("Replicator {0} is not registered in this group")]
    UnknownReplicator(u32),
    /// A replicator id was requested twice
    #[error("Replicator id {0} is already in use")]
    DuplicateReplicator(u32),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Configuration failed validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
