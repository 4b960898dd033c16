//! # Message Traits
//!
//! The [`Message`] trait is what every routed or replicated payload
//! implements. It carries the codec (JSON through `serde_json`) and a stable
//! type name for logging. Because it requires `Serialize + DeserializeOwned +
//! 'static`, only concrete data types qualify; open hierarchies such as trait
//! objects cannot be registered, which keeps deserialization deterministic.
//!
//! [`MessageHandler`] is the type-erased form the router stores, and
//! [`TypedMessageHandler`] bridges it back to a concrete payload type.

use crate::error::{CodecError, RouterError};
use crate::types::Origin;
use serde::{de::DeserializeOwned, Serialize};
use std::any::{Any, TypeId};
use std::fmt::Debug;
use std::marker::PhantomData;

/// Core trait that all payloads must implement.
///
/// Most types get it for free through the blanket implementation:
///
/// ```rust
/// use serde::{Deserialize, Serialize};
/// use peer_replication::Message;
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct Ping {
///     value: i32,
/// }
///
/// let bytes = Ping { value: 5 }.encode().unwrap();
/// assert_eq!(Ping::decode(&bytes).unwrap().value, 5);
/// ```
pub trait Message: Send + Sync + Any + Debug {
    /// Stable, unique name of this payload type for logs.
    fn type_name() -> &'static str
    where
        Self: Sized;

    /// Serializes the payload for the wire.
    fn encode(&self) -> Result<Vec<u8>, CodecError>;

    /// Deserializes a payload received from the wire.
    fn decode(data: &[u8]) -> Result<Self, CodecError>
    where
        Self: Sized;
}

impl<T> Message for T
where
    T: Serialize + DeserializeOwned + Send + Sync + Any + Debug + 'static,
{
    fn type_name() -> &'static str {
        std::any::type_name::<T>()
    }

    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(self).map_err(|source| CodecError::Serialization {
            type_name: Self::type_name(),
            source,
        })
    }

    fn decode(data: &[u8]) -> Result<Self, CodecError> {
        serde_json::from_slice(data).map_err(|source| CodecError::Deserialization {
            type_name: Self::type_name(),
            len: data.len(),
            source,
        })
    }
}

/// Type-erased handler stored by the router.
pub trait MessageHandler: Send + Sync + 'static + Debug {
    /// Decodes `data` and runs the handler.
    fn handle(&self, data: &[u8], origin: Origin) -> Result<(), RouterError>;

    /// The `TypeId` of the payload this handler expects.
    fn expected_type_id(&self) -> TypeId;

    /// Human-readable name for debugging.
    fn handler_name(&self) -> &str;
}

/// Type-safe wrapper turning a closure over `T` into a [`MessageHandler`].
pub struct TypedMessageHandler<T, F>
where
    T: Message,
    F: Fn(T, Origin) -> Result<(), RouterError> + Send + Sync,
{
    handler: F,
    name: String,
    _phantom: PhantomData<fn(T)>,
}

impl<T, F> TypedMessageHandler<T, F>
where
    T: Message,
    F: Fn(T, Origin) -> Result<(), RouterError> + Send + Sync,
{
    pub fn new(name: String, handler: F) -> Self {
        Self {
            handler,
            name,
            _phantom: PhantomData,
        }
    }
}

impl<T, F> Debug for TypedMessageHandler<T, F>
where
    T: Message,
    F: Fn(T, Origin) -> Result<(), RouterError> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedMessageHandler")
            .field("name", &self.name)
            .finish()
    }
}

impl<T, F> MessageHandler for TypedMessageHandler<T, F>
where
    T: Message,
    F: Fn(T, Origin) -> Result<(), RouterError> + Send + Sync + 'static,
{
    fn handle(&self, data: &[u8], origin: Origin) -> Result<(), RouterError> {
        let message = T::decode(data)?;
        (self.handler)(message, origin)
    }

    fn expected_type_id(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn handler_name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct ChatLine {
        text: String,
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = ChatLine::decode(b"not json").unwrap_err();
        assert!(matches!(err, CodecError::Deserialization { len: 8, .. }));
    }

    #[test]
    fn test_typed_handler_decodes_and_forwards_origin() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler = TypedMessageHandler::new("chat".to_string(), move |msg: ChatLine, origin| {
            sink.lock().unwrap().push((msg, origin));
            Ok(())
        });

        let bytes = ChatLine { text: "hi".to_string() }.encode().unwrap();
        handler.handle(&bytes, Origin::Server).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0.text, "hi");
        assert_eq!(seen[0].1, Origin::Server);
        assert_eq!(handler.expected_type_id(), TypeId::of::<ChatLine>());
    }
}
