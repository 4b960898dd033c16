/// Statistics tracking for the message router
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of router activity for monitoring.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterStats {
    /// Number of registered payload types
    pub registered_types: usize,
    /// Number of installed handlers
    pub registered_handlers: usize,
    /// Packets handed to the transport (one per target, plus the server copy)
    pub packets_sent: u64,
    /// Messages that reached a handler
    pub dispatched: u64,
    /// Inbound messages whose tag was never registered
    pub dropped_unknown_tag: u64,
    /// Inbound messages for a type with no handler
    pub dropped_no_handler: u64,
    /// Inbound messages from an origin the handler does not accept
    pub dropped_origin_rejected: u64,
    /// Inbound messages whose payload failed to decode
    pub dropped_decode_failed: u64,
    /// Handlers that returned an error
    pub handler_failures: u64,
}

impl RouterStats {
    /// Total inbound messages that never reached a handler.
    pub fn total_dropped(&self) -> u64 {
        self.dropped_unknown_tag
            + self.dropped_no_handler
            + self.dropped_origin_rejected
            + self.dropped_decode_failed
    }
}

#[derive(Debug, Default)]
pub(super) struct RouterCounters {
    pub(super) packets_sent: AtomicU64,
    pub(super) dispatched: AtomicU64,
    pub(super) dropped_unknown_tag: AtomicU64,
    pub(super) dropped_no_handler: AtomicU64,
    pub(super) dropped_origin_rejected: AtomicU64,
    pub(super) dropped_decode_failed: AtomicU64,
    pub(super) handler_failures: AtomicU64,
}

impl RouterCounters {
    #[inline]
    pub(super) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn snapshot(&self, registered_types: usize, registered_handlers: usize) -> RouterStats {
        RouterStats {
            registered_types,
            registered_handlers,
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            dropped_unknown_tag: self.dropped_unknown_tag.load(Ordering::Relaxed),
            dropped_no_handler: self.dropped_no_handler.load(Ordering::Relaxed),
            dropped_origin_rejected: self.dropped_origin_rejected.load(Ordering::Relaxed),
            dropped_decode_failed: self.dropped_decode_failed.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
        }
    }
}
