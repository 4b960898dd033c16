//! # Core Type Definitions
//!
//! Fundamental types shared by the router and every replicator: peer
//! identities, message origins, transport modes and the small amount of
//! spatial math the transform packer needs.
//!
//! ## Key Types
//!
//! - [`PeerId`] - Unique identifier for a participant in a session
//! - [`Origin`] / [`Origins`] - Where an inbound router message came from
//! - [`TransportMode`] - Reliability and ordering of a channel
//! - [`ReplicationTick`] - What the session driver passes when polling a replicator
//! - [`Vec3`], [`Quat`], [`Transform`] - Replicated transform pieces

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Identity
// ============================================================================

/// Unique identifier for a peer taking part in a replication session.
///
/// This is a wrapper around UUID so peer identities cannot be confused with
/// replicator ids or message tags. Ordering is total, which lets per-peer maps
/// iterate deterministically.
///
/// # Examples
///
/// ```rust
/// use peer_replication::PeerId;
///
/// let peer = PeerId::new();
/// let parsed: PeerId = peer.to_string().parse()?;
/// assert_eq!(peer, parsed);
/// # Ok::<(), uuid::Error>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub Uuid);

impl PeerId {
    /// Creates a new random peer ID using UUID v4.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::str::FromStr for PeerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where an inbound router message originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    /// The coordinating server channel
    Server,
    /// Another peer in the session
    Peer(PeerId),
}

impl Origin {
    /// The single [`Origins`] flag matching this origin.
    pub fn flag(&self) -> Origins {
        match self {
            Origin::Server => Origins::SERVER,
            Origin::Peer(_) => Origins::PEER,
        }
    }
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Origin::Server => write!(f, "server"),
            Origin::Peer(peer) => write!(f, "peer {peer}"),
        }
    }
}

bitflags! {
    /// Set of origins a router handler accepts messages from.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Origins: u8 {
        /// Messages relayed by the coordinating server
        const SERVER = 1;
        /// Messages sent directly by another peer
        const PEER = 1 << 1;
    }
}

impl Origins {
    /// Whether a message from `origin` may reach a handler with this mask.
    pub fn allows(&self, origin: Origin) -> bool {
        self.contains(origin.flag())
    }
}

// ============================================================================
// Transport modes
// ============================================================================

/// Delivery guarantee of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reliability {
    Reliable,
    Unreliable,
}

/// Ordering guarantee of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderingMode {
    Ordered,
    Unordered,
}

/// A (reliability, ordering) pair describing a transport channel.
///
/// Not every replicator supports every combination; see
/// [`Replicator::supported_modes`](crate::replication::Replicator::supported_modes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransportMode {
    pub reliability: Reliability,
    pub ordering: OrderingMode,
}

impl TransportMode {
    pub const RELIABLE_ORDERED: Self = Self::new(Reliability::Reliable, OrderingMode::Ordered);
    pub const RELIABLE_UNORDERED: Self = Self::new(Reliability::Reliable, OrderingMode::Unordered);
    pub const UNRELIABLE_ORDERED: Self = Self::new(Reliability::Unreliable, OrderingMode::Ordered);
    pub const UNRELIABLE_UNORDERED: Self =
        Self::new(Reliability::Unreliable, OrderingMode::Unordered);

    /// All four combinations, reliable first.
    pub const ALL: [Self; 4] = [
        Self::RELIABLE_ORDERED,
        Self::RELIABLE_UNORDERED,
        Self::UNRELIABLE_ORDERED,
        Self::UNRELIABLE_UNORDERED,
    ];

    pub const fn new(reliability: Reliability, ordering: OrderingMode) -> Self {
        Self {
            reliability,
            ordering,
        }
    }

    pub fn is_reliable(&self) -> bool {
        self.reliability == Reliability::Reliable
    }

    /// Channels other than unreliable-unordered track which peers already hold
    /// the current state; unreliable-unordered resends every tick.
    pub fn requires_clean_tracking(&self) -> bool {
        *self != Self::UNRELIABLE_UNORDERED
    }
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reliability = match self.reliability {
            Reliability::Reliable => "reliable",
            Reliability::Unreliable => "unreliable",
        };
        let ordering = match self.ordering {
            OrderingMode::Ordered => "ordered",
            OrderingMode::Unordered => "unordered",
        };
        write!(f, "{reliability}-{ordering}")
    }
}

/// Passed to a replicator when the driver asks what to send to one target.
///
/// `is_initial` means the target has never received state for this object and
/// must get a full snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicationTick {
    pub mode: TransportMode,
    pub is_initial: bool,
}

impl ReplicationTick {
    pub fn new(mode: TransportMode, is_initial: bool) -> Self {
        Self { mode, is_initial }
    }

    /// First contact with a target on `mode`.
    pub fn initial(mode: TransportMode) -> Self {
        Self::new(mode, true)
    }

    /// A regular tick for a target that already received state.
    pub fn continuing(mode: TransportMode) -> Self {
        Self::new(mode, false)
    }
}

// ============================================================================
// Spatial types
// ============================================================================

/// A 3D vector with double-precision components.
///
/// # Examples
///
/// ```rust
/// use peer_replication::Vec3;
///
/// let position = Vec3::new(100.5, 64.0, -200.25);
/// assert_eq!(position.distance(Vec3::zero()), position.distance(Vec3::new(0.0, 0.0, 0.0)));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Creates a zero vector (0, 0, 0).
    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    /// Creates a vector with every component set to one.
    pub fn one() -> Self {
        Self::new(1.0, 1.0, 1.0)
    }

    /// Euclidean distance to another vector.
    pub fn distance(&self, other: Vec3) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

impl Default for Vec3 {
    fn default() -> Self {
        Self::zero()
    }
}

/// A rotation quaternion stored as (x, y, z, w).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Quat {
    pub fn new(x: f64, y: f64, z: f64, w: f64) -> Self {
        Self { x, y, z, w }
    }

    pub fn identity() -> Self {
        Self::new(0.0, 0.0, 0.0, 1.0)
    }

    /// Rotation of `angle` radians around the Y axis.
    pub fn from_rotation_y(angle: f64) -> Self {
        let half = angle * 0.5;
        Self::new(0.0, half.sin(), 0.0, half.cos())
    }
}

impl Default for Quat {
    fn default() -> Self {
        Self::identity()
    }
}

/// Position, rotation and scale of one replicated object.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Transform {
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::zero(),
            rotation: Quat::identity(),
            scale: Vec3::one(),
        }
    }
}
