//! String-level serialization contract.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Marshals message bodies to and from strings for transport.
///
/// Implementations are treated as opaque by the engine. The one hard
/// requirement is that `deserialize` is a left inverse of `serialize` for
/// every message type actually sent:
/// `deserialize(serialize(m)) == m`.
pub trait Codec: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    fn serialize<T: Serialize>(&self, value: &T) -> Result<String, Self::Error>;

    fn deserialize<T: DeserializeOwned>(&self, text: &str) -> Result<T, Self::Error>;
}
