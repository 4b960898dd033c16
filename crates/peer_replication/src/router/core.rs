/// Core TypedMessageRouter implementation
use super::stats::{RouterCounters, RouterStats};
use crate::message::MessageHandler;
use crate::transport::Transport;
use crate::types::{Origins, PeerId};
use dashmap::DashMap;
use std::any::TypeId;
use std::sync::{Arc, Mutex};

/// A registered payload type as seen from its wire tag.
#[derive(Debug, Clone, Copy)]
pub(super) struct TypeEntry {
    pub(super) type_id: TypeId,
    pub(super) type_name: &'static str,
}

/// The single handler installed for a payload type.
#[derive(Debug, Clone)]
pub(super) struct HandlerEntry {
    /// Distinguishes this registration from a later one for the same type
    pub(super) id: u64,
    pub(super) origins: Origins,
    pub(super) handler: Arc<dyn MessageHandler>,
}

/// Lookup tables shared with outstanding [`Unregisterer`](super::Unregisterer)s.
#[derive(Debug, Default)]
pub(super) struct RouterTables {
    /// Wire tag to payload type
    pub(super) tags: DashMap<u32, TypeEntry>,
    /// Payload type to wire tag
    pub(super) types: DashMap<TypeId, u32>,
    /// Payload type to its handler
    pub(super) handlers: DashMap<TypeId, HandlerEntry>,
}

/// Routes typed messages between peers and the coordinating server.
///
/// Every payload type is bound to one numeric wire tag with
/// [`register_type`](Self::register_type). Outbound messages are serialized
/// once and unicast to each target; inbound `(tag, bytes)` pairs are decoded
/// back into their concrete type and handed to the single handler registered
/// for it, provided the message's [`Origin`](crate::Origin) is allowed.
///
/// The router is `Send + Sync`. Registration may happen from any thread, and
/// [`dispatch`](Self::dispatch) may be called from the transport's receive
/// context. Handlers run after every table guard is released, so a handler
/// can register or unregister other handlers.
///
/// # Examples
///
/// ```rust
/// use peer_replication::{LoopbackNetwork, Origin, Origins, PeerId, TransportMode, TypedMessageRouter};
/// use serde::{Deserialize, Serialize};
/// use std::sync::Arc;
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct Ping {
///     value: i32,
/// }
///
/// let network = LoopbackNetwork::new();
/// let endpoint = network.connect(
///     PeerId::new(),
///     Arc::new(|_: u32, _: &[u8], _: Origin, _: TransportMode| {}),
/// );
/// let router = TypedMessageRouter::new(Arc::new(endpoint));
///
/// router.register_type::<Ping>(7)?;
/// let _registration = router.register_handler(
///     |ping: Ping, origin| {
///         println!("ping {} from {}", ping.value, origin);
///         Ok(())
///     },
///     Origins::PEER,
/// )?;
/// # Ok::<(), peer_replication::RouterError>(())
/// ```
pub struct TypedMessageRouter {
    pub(super) transport: Arc<dyn Transport>,
    pub(super) tables: Arc<RouterTables>,
    /// Serializes type registration so `tags` and `types` stay a bijection
    pub(super) registration_lock: Mutex<()>,
    pub(super) next_handler_id: std::sync::atomic::AtomicU64,
    pub(super) counters: RouterCounters,
}

impl std::fmt::Debug for TypedMessageRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedMessageRouter")
            .field("local_peer", &self.transport.local_peer())
            .field("types", &self.tables.tags.len())
            .field("handlers", &self.tables.handlers.len())
            .finish()
    }
}

impl TypedMessageRouter {
    /// Creates a router with no registered types that sends through `transport`.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            tables: Arc::new(RouterTables::default()),
            registration_lock: Mutex::new(()),
            next_handler_id: std::sync::atomic::AtomicU64::new(1),
            counters: RouterCounters::default(),
        }
    }

    /// The local peer as reported by the transport.
    #[inline]
    pub fn local_peer(&self) -> PeerId {
        self.transport.local_peer()
    }

    /// Gets a snapshot of router statistics.
    pub fn stats(&self) -> RouterStats {
        self.counters
            .snapshot(self.tables.tags.len(), self.tables.handlers.len())
    }
}
