/// Type and handler registration methods
use super::core::{HandlerEntry, RouterTables, TypeEntry, TypedMessageRouter};
use crate::error::RouterError;
use crate::message::{Message, TypedMessageHandler};
use crate::types::Origins;
use dashmap::mapref::entry::Entry;
use std::any::TypeId;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

/// Capability to remove one specific handler registration.
///
/// Dropping it leaves the handler installed. Calling
/// [`unregister`](Self::unregister) removes the handler only if it is still
/// the one this token was issued for; a handler registered later for the same
/// type is left alone.
#[derive(Debug)]
pub struct Unregisterer {
    tables: Weak<RouterTables>,
    type_id: TypeId,
    type_name: &'static str,
    handler_id: u64,
}

impl Unregisterer {
    /// Removes the registration. Returns `true` if it was still installed.
    pub fn unregister(self) -> bool {
        let Some(tables) = self.tables.upgrade() else {
            return false;
        };

        let removed = tables
            .handlers
            .remove_if(&self.type_id, |_, entry| entry.id == self.handler_id)
            .is_some();

        if removed {
            debug!("🗑️ Unregistered handler for {}", self.type_name);
        }
        removed
    }
}

impl TypedMessageRouter {
    /// Binds payload type `T` to the wire tag `tag`.
    ///
    /// # Errors
    ///
    /// * [`RouterError::DuplicateTag`] if `tag` is already bound to a type
    /// * [`RouterError::DuplicateType`] if `T` already has a tag
    pub fn register_type<T: Message>(&self, tag: u32) -> Result<(), RouterError> {
        let type_id = TypeId::of::<T>();
        let type_name = T::type_name();

        let _guard = self
            .registration_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(existing) = self.tables.tags.get(&tag) {
            return Err(RouterError::DuplicateTag {
                tag,
                existing: existing.type_name,
            });
        }
        if let Some(existing_tag) = self.tables.types.get(&type_id) {
            return Err(RouterError::DuplicateType {
                type_name,
                tag: *existing_tag,
            });
        }

        self.tables.tags.insert(tag, TypeEntry { type_id, type_name });
        self.tables.types.insert(type_id, tag);

        info!("📝 Registered message type {} with tag {}", type_name, tag);
        Ok(())
    }

    /// Installs the handler for payload type `T`.
    ///
    /// The handler only sees messages whose origin is contained in
    /// `allowed_origins`. Registering a handler does not require `T` to have
    /// a tag yet, but no message can reach it until one is registered.
    ///
    /// # Errors
    ///
    /// [`RouterError::DuplicateHandler`] if `T` already has a handler.
    pub fn register_handler<T, F>(
        &self,
        handler: F,
        allowed_origins: Origins,
    ) -> Result<Unregisterer, RouterError>
    where
        T: Message,
        F: Fn(T, crate::types::Origin) -> Result<(), RouterError> + Send + Sync + 'static,
    {
        let type_id = TypeId::of::<T>();
        let type_name = T::type_name();
        let handler_id = self.next_handler_id.fetch_add(1, Ordering::Relaxed);

        match self.tables.handlers.entry(type_id) {
            Entry::Occupied(_) => return Err(RouterError::DuplicateHandler { type_name }),
            Entry::Vacant(slot) => {
                let typed = TypedMessageHandler::new(format!("{type_name}_handler"), handler);
                slot.insert(HandlerEntry {
                    id: handler_id,
                    origins: allowed_origins,
                    handler: Arc::new(typed),
                });
            }
        }

        info!("📝 Registered handler for {} (origins: {:?})", type_name, allowed_origins);
        Ok(Unregisterer {
            tables: Arc::downgrade(&self.tables),
            type_id,
            type_name,
            handler_id,
        })
    }

    /// Removes whatever handler is installed for `T`.
    ///
    /// Returns `true` if a handler was removed.
    pub fn unregister<T: Message>(&self) -> bool {
        let removed = self.tables.handlers.remove(&TypeId::of::<T>()).is_some();
        if removed {
            debug!("🗑️ Unregistered handler for {}", T::type_name());
        }
        removed
    }

    /// The wire tag bound to `T`, if any.
    pub fn tag_of<T: Message>(&self) -> Option<u32> {
        self.tables.types.get(&TypeId::of::<T>()).map(|tag| *tag)
    }

    /// Whether `T` currently has a handler.
    pub fn has_handler<T: Message>(&self) -> bool {
        self.tables.handlers.contains_key(&TypeId::of::<T>())
    }
}
