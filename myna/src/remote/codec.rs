//! Wire codec registry and the serialized-object envelope structure.
//!
//! Remote message bodies travel as strings produced by the JSON codec;
//! the registry maps a message tag to its encode/decode pair. `Fault` and
//! `Exit` are pre-registered so links work across nodes out of the box;
//! application types opt in through `Runtime::register_wire`.

use crate::collab::JsonCodec;
use crate::error::RemoteError;
use myna_api::codec::Codec;
use myna_api::fault::{Exit, Fault};
use myna_api::message::{Message, MessageTag};
use myna_api::types::BoxedMessage;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Payload of one sized-envelope packet, exchanged in both directions.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) enum WireEnvelope {
    /// Client to server: deliver `body` to the agent named by `to`.
    Deliver {
        op: u64,
        to: String,
        tag: String,
        body: String,
    },
    /// Server to client: the identified operation could not be delivered.
    Refused { op: u64, reason: String },
}

type WireEncodeFn = Arc<dyn Fn(&dyn Any) -> Result<String, RemoteError> + Send + Sync>;
type WireDecodeFn =
    Arc<dyn Fn(&str) -> Result<(MessageTag, BoxedMessage), RemoteError> + Send + Sync>;

/// Tag-keyed table of wire encode/decode functions.
pub struct WireRegistry {
    encoders: RwLock<HashMap<&'static str, WireEncodeFn>>,
    decoders: RwLock<HashMap<&'static str, WireDecodeFn>>,
}

impl WireRegistry {
    pub fn new() -> Self {
        let registry = Self {
            encoders: RwLock::new(HashMap::new()),
            decoders: RwLock::new(HashMap::new()),
        };
        registry.register::<Fault>();
        registry.register::<Exit>();
        registry
    }

    /// Registers the wire codec for `M`. Registering the same tag again
    /// replaces the previous pair, mirroring handler-table semantics.
    pub fn register<M>(&self)
    where
        M: Message + Serialize + DeserializeOwned,
    {
        let encode: WireEncodeFn = Arc::new(|any| {
            let msg = any.downcast_ref::<M>().ok_or_else(|| {
                RemoteError::Codec(format!("payload does not match tag '{}'", M::TAG))
            })?;
            JsonCodec
                .serialize(msg)
                .map_err(|e| RemoteError::Codec(e.to_string()))
        });
        let decode: WireDecodeFn = Arc::new(|text| {
            let msg: M = JsonCodec
                .deserialize(text)
                .map_err(|e| RemoteError::Codec(e.to_string()))?;
            Ok((M::TAG, Box::new(msg) as BoxedMessage))
        });
        self.encoders.write().unwrap().insert(M::TAG.as_str(), encode);
        self.decoders.write().unwrap().insert(M::TAG.as_str(), decode);
    }

    pub fn encode(&self, tag: MessageTag, msg: &dyn Any) -> Result<String, RemoteError> {
        let encoder = self
            .encoders
            .read()
            .unwrap()
            .get(tag.as_str())
            .cloned()
            .ok_or_else(|| RemoteError::UnregisteredTag(tag.as_str().to_string()))?;
        encoder(msg)
    }

    pub fn decode(&self, tag: &str, body: &str) -> Result<(MessageTag, BoxedMessage), RemoteError> {
        let decoder = self
            .decoders
            .read()
            .unwrap()
            .get(tag)
            .cloned()
            .ok_or_else(|| RemoteError::UnregisteredTag(tag.to_string()))?;
        decoder(body)
    }
}

impl Default for WireRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use myna_api::id::{AgentId, NodeId};

    #[test]
    fn fault_and_exit_are_preregistered() {
        let registry = WireRegistry::new();
        let exit = Exit {
            agent: AgentId::new(NodeId::new("n"), 3),
        };
        let body = registry.encode(Exit::TAG, &exit).unwrap();
        let (tag, boxed) = registry.decode(Exit::TAG.as_str(), &body).unwrap();
        assert_eq!(tag, Exit::TAG);
        assert_eq!(*boxed.downcast::<Exit>().unwrap(), exit);
        assert!(registry.encode(Fault::TAG, &exit).is_err());
    }

    #[test]
    fn unregistered_tag_is_reported() {
        let registry = WireRegistry::new();
        assert!(matches!(
            registry.decode("app/unknown", "{}"),
            Err(RemoteError::UnregisteredTag(_))
        ));
    }
}
