/// Last-writer-wins replication of a single optional value
use super::listeners::{ListenerId, Listeners};
use super::{ReplicatedValue, Replicator};
use crate::descriptor::ReplicationDescriptor;
use crate::error::{FieldError, ReplicationError};
use crate::message::Message;
use crate::types::{PeerId, ReplicationTick, TransportMode};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// What a field puts on the wire.
///
/// `Absent` is an explicit "the value is empty" marker. It is distinct from
/// not sending anything at all, which [`NetworkedField::collect`] expresses as
/// `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldPayload<T> {
    Value(T),
    Absent,
}

impl<T> From<Option<T>> for FieldPayload<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => FieldPayload::Value(value),
            None => FieldPayload::Absent,
        }
    }
}

impl<T> From<FieldPayload<T>> for Option<T> {
    fn from(payload: FieldPayload<T>) -> Self {
        match payload {
            FieldPayload::Value(value) => Some(value),
            FieldPayload::Absent => None,
        }
    }
}

/// Lifecycle of a field on the local peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldState {
    /// Never explicitly set by a sender; nothing is replicated
    Default,
    /// Set at least once by a sender
    Assigned,
}

/// Callback receiving the field's new value.
pub type ValueListener<T> = dyn FnMut(Option<&T>) + Send;

/// Replicates one optional value from its current sender to every current
/// receiver.
///
/// Writes are last-writer-wins and there are no acknowledgments. The field
/// remembers which peers already hold the current value ("clean" peers) and
/// skips them on every channel except unreliable-unordered, where it resends
/// on every poll.
///
/// Change notifications come in three flavours: [`on_changed`](Self::on_changed)
/// fires for every change, [`on_changed_if_sender`](Self::on_changed_if_sender)
/// only for local writes and [`on_changed_if_receiver`](Self::on_changed_if_receiver)
/// only for values received from the network.
pub struct NetworkedField<T: ReplicatedValue + PartialEq> {
    name: String,
    descriptor: Arc<dyn ReplicationDescriptor>,
    local: PeerId,
    value: Option<T>,
    is_default: bool,
    clean_peers: HashSet<PeerId>,
    on_changed: Listeners<ValueListener<T>>,
    on_changed_if_sender: Listeners<ValueListener<T>>,
    on_changed_if_receiver: Listeners<ValueListener<T>>,
}

impl<T: ReplicatedValue + PartialEq> NetworkedField<T> {
    /// Creates an empty field in the default state.
    pub fn new(name: impl Into<String>, descriptor: Arc<dyn ReplicationDescriptor>, local: PeerId) -> Self {
        Self {
            name: name.into(),
            descriptor,
            local,
            value: None,
            is_default: true,
            clean_peers: HashSet::new(),
            on_changed: Listeners::new(),
            on_changed_if_sender: Listeners::new(),
            on_changed_if_receiver: Listeners::new(),
        }
    }

    /// The last known value. `None` is a legitimate value.
    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn state(&self) -> FieldState {
        if self.is_default {
            FieldState::Default
        } else {
            FieldState::Assigned
        }
    }

    pub fn is_sender(&self) -> bool {
        self.descriptor.is_sender(self.local)
    }

    /// Peers that already hold the current value.
    pub fn clean_peers(&self) -> &HashSet<PeerId> {
        &self.clean_peers
    }

    /// Writes a new value.
    ///
    /// Writing a value equal to the current one does nothing. Otherwise every
    /// peer becomes dirty and the sender-side and generic listeners fire.
    ///
    /// # Errors
    ///
    /// [`FieldError::NotSender`] if the local peer is not a current sender.
    pub fn set_value(&mut self, value: Option<T>) -> Result<(), FieldError> {
        if !self.is_sender() {
            return Err(FieldError::NotSender { local: self.local });
        }

        if self.value == value {
            return Ok(());
        }

        self.value = value;
        self.is_default = false;
        self.clean_peers.clear();
        trace!("Field '{}' changed locally: {:?}", self.name, self.value);

        let current = self.value.as_ref();
        for listener in self.on_changed_if_sender.iter_mut() {
            listener(current);
        }
        for listener in self.on_changed.iter_mut() {
            listener(current);
        }
        Ok(())
    }

    /// Same as [`set_value`](Self::set_value) but silently ignored when the
    /// local peer is not a sender. Returns whether the write was accepted.
    pub fn set_if_sender(&mut self, value: Option<T>) -> bool {
        self.set_value(value).is_ok()
    }

    /// Decides what to send to the single peer in `targets` on this tick.
    ///
    /// Returns `None` unless the local peer is a sender, the field has been
    /// assigned, `tick.mode` is the preferred transport, exactly one target is
    /// given and that target is a receiver. On clean-tracked channels a peer
    /// that already holds the value gets nothing.
    pub fn collect(&mut self, targets: &[PeerId], tick: ReplicationTick) -> Option<FieldPayload<T>> {
        if !self.is_sender() || self.is_default {
            return None;
        }
        if tick.mode != self.descriptor.preferred_transport() {
            return None;
        }

        let [target] = targets else {
            return None;
        };

        if !self.descriptor.is_receiver(*target) {
            // Resumed receivers must get the value again
            self.clean_peers.remove(target);
            return None;
        }

        if tick.is_initial {
            self.clean_peers.remove(target);
        }

        if tick.mode.requires_clean_tracking() && !self.clean_peers.insert(*target) {
            return None;
        }

        Some(self.value.clone().into())
    }

    /// Applies a value received from `sender`.
    ///
    /// Returns `false` and drops the payload if `sender` is not a current
    /// sender.
    pub fn receive(&mut self, payload: FieldPayload<T>, sender: PeerId) -> bool {
        if !self.descriptor.is_sender(sender) {
            warn!(
                "Field '{}' dropped update from {}: not a sender",
                self.name, sender
            );
            return false;
        }

        self.value = payload.into();
        trace!("Field '{}' received from {}: {:?}", self.name, sender, self.value);

        let current = self.value.as_ref();
        for listener in self.on_changed_if_receiver.iter_mut() {
            listener(current);
        }
        for listener in self.on_changed.iter_mut() {
            listener(current);
        }
        true
    }

    /// Fires on every change, local or remote.
    pub fn on_changed(&mut self, listener: impl FnMut(Option<&T>) + Send + 'static) -> ListenerId {
        self.on_changed.add(Box::new(listener))
    }

    /// Fires only when the local sender changed the value.
    pub fn on_changed_if_sender(&mut self, listener: impl FnMut(Option<&T>) + Send + 'static) -> ListenerId {
        self.on_changed_if_sender.add(Box::new(listener))
    }

    /// Fires only when a value arrived from the network.
    pub fn on_changed_if_receiver(&mut self, listener: impl FnMut(Option<&T>) + Send + 'static) -> ListenerId {
        self.on_changed_if_receiver.add(Box::new(listener))
    }

    /// Removes a listener from whichever collection holds it.
    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.on_changed.remove(id)
            || self.on_changed_if_sender.remove(id)
            || self.on_changed_if_receiver.remove(id)
    }
}

impl<T: ReplicatedValue + PartialEq> std::fmt::Debug for NetworkedField<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkedField")
            .field("name", &self.name)
            .field("value", &self.value)
            .field("is_default", &self.is_default)
            .field("clean_peers", &self.clean_peers.len())
            .finish()
    }
}

impl<T: ReplicatedValue + PartialEq> Replicator for NetworkedField<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_modes(&self) -> &'static [TransportMode] {
        &TransportMode::ALL
    }

    fn poll_outbound(
        &mut self,
        target: PeerId,
        tick: ReplicationTick,
    ) -> Result<Option<Vec<u8>>, ReplicationError> {
        let Some(payload) = self.collect(&[target], tick) else {
            return Ok(None);
        };
        Ok(Some(payload.encode()?))
    }

    fn on_inbound_received(
        &mut self,
        bytes: &[u8],
        sender: PeerId,
        _mode: TransportMode,
    ) -> Result<(), ReplicationError> {
        let payload = FieldPayload::<T>::decode(bytes)?;
        self.receive(payload, sender);
        Ok(())
    }

    fn on_peer_removed(&mut self, peer: PeerId) {
        self.clean_peers.remove(&peer);
    }

    fn dispose(&mut self) {
        debug!("Disposing field '{}'", self.name);
        self.clean_peers.clear();
        self.on_changed.clear();
        self.on_changed_if_sender.clear();
        self.on_changed_if_receiver.clear();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
