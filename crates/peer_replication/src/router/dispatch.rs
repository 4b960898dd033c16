/// Outbound sending and inbound dispatch
use super::core::TypedMessageRouter;
use super::stats::RouterCounters;
use crate::error::RouterError;
use crate::message::Message;
use crate::types::{Origin, PeerId, TransportMode};
use std::any::TypeId;
use tracing::{debug, error, trace, warn};

/// What happened to one inbound message.
///
/// Every variant except `Delivered` means the message was dropped; the router
/// has already logged why.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The handler ran and returned `Ok`
    Delivered,
    /// No type is registered for the tag
    UnknownTag,
    /// The type is known but has no handler
    NoHandler,
    /// The handler does not accept messages from this origin
    OriginRejected,
    /// The payload could not be decoded into the registered type
    DecodeFailed,
    /// The handler ran and returned an error
    HandlerFailed,
}

impl TypedMessageRouter {
    /// Sends `message` to every peer in `targets` and, optionally, the server.
    ///
    /// The message is serialized exactly once and the same bytes go to every
    /// destination over the unreliable-unordered channel. Transport failures
    /// for individual destinations are logged and do not abort the send.
    ///
    /// # Errors
    ///
    /// * [`RouterError::UnknownType`] if `T` has no tag
    /// * [`RouterError::Codec`] if the message fails to serialize
    pub fn send<T: Message>(
        &self,
        message: &T,
        targets: &[PeerId],
        also_send_to_server: bool,
    ) -> Result<(), RouterError> {
        let type_name = T::type_name();
        let tag = self
            .tables
            .types
            .get(&TypeId::of::<T>())
            .map(|tag| *tag)
            .ok_or(RouterError::UnknownType { type_name })?;

        let bytes = message.encode()?;

        for &peer in targets {
            match self
                .transport
                .send_unicast(peer, tag, &bytes, TransportMode::UNRELIABLE_UNORDERED)
            {
                Ok(()) => RouterCounters::bump(&self.counters.packets_sent),
                Err(e) => warn!("Failed to send {} to {}: {}", type_name, peer, e),
            }
        }

        if also_send_to_server {
            match self.transport.send_to_server(tag, &bytes) {
                Ok(()) => RouterCounters::bump(&self.counters.packets_sent),
                Err(e) => warn!("Failed to send {} to server: {}", type_name, e),
            }
        }

        trace!(
            "📤 Sent {} (tag {}, {} bytes) to {} peers{}",
            type_name,
            tag,
            bytes.len(),
            targets.len(),
            if also_send_to_server { " and server" } else { "" }
        );
        Ok(())
    }

    /// Routes one inbound `(tag, bytes)` pair to its handler.
    ///
    /// Network anomalies never surface as errors. They are logged, counted in
    /// [`RouterStats`](super::RouterStats) and reported through the returned
    /// [`DispatchOutcome`].
    pub fn dispatch(&self, tag: u32, bytes: &[u8], origin: Origin) -> DispatchOutcome {
        let Some(entry) = self.tables.tags.get(&tag).map(|entry| *entry) else {
            debug!("Dropping message with unregistered tag {} from {}", tag, origin);
            RouterCounters::bump(&self.counters.dropped_unknown_tag);
            return DispatchOutcome::UnknownTag;
        };

        // Clone the handler out so no map guard is held while it runs
        let Some((origins, handler)) = self
            .tables
            .handlers
            .get(&entry.type_id)
            .map(|h| (h.origins, h.handler.clone()))
        else {
            debug!("No handler for {} (tag {}), dropping", entry.type_name, tag);
            RouterCounters::bump(&self.counters.dropped_no_handler);
            return DispatchOutcome::NoHandler;
        };

        if !origins.allows(origin) {
            warn!(
                "Rejected {} from {}: handler only accepts {:?}",
                entry.type_name, origin, origins
            );
            RouterCounters::bump(&self.counters.dropped_origin_rejected);
            return DispatchOutcome::OriginRejected;
        }

        match handler.handle(bytes, origin) {
            Ok(()) => {
                RouterCounters::bump(&self.counters.dispatched);
                DispatchOutcome::Delivered
            }
            Err(RouterError::Codec(e)) => {
                warn!("Dropping undecodable message from {}: {}", origin, e);
                RouterCounters::bump(&self.counters.dropped_decode_failed);
                DispatchOutcome::DecodeFailed
            }
            Err(e) => {
                error!("Handler {} failed: {}", handler.handler_name(), e);
                RouterCounters::bump(&self.counters.handler_failures);
                DispatchOutcome::HandlerFailed
            }
        }
    }
}
