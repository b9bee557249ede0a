//! Message contract.
//!
//! Dispatch is keyed by a stable, human-readable [`MessageTag`] rather than
//! runtime type identity: a closed, tag-keyed handler table replaces
//! reflection-based lookup. Each message type declares its tag and its
//! reply type once; the engine's handler tables, wire codecs, and reply
//! extraction all hang off that declaration.

use crate::errors::AgentError;
use crate::types::{AgentResult, BoxedMessage};
use std::fmt;
use uuid::Uuid;

/// Stable dispatch tag of a message type.
///
/// Built-in runtime messages use the `myna/` prefix (for example
/// `myna/fault`); application types pick any other string. Tags must be
/// unique per deployment; the handler table and the wire codec registry
/// both key on them, and a later registration for the same tag replaces
/// the earlier one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageTag(pub &'static str);

impl MessageTag {
    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for MessageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// A typed message an agent can receive.
///
/// `Reply` is what the registered handler returns; fire-and-forget
/// messages use `()`.
pub trait Message: Send + 'static {
    type Reply: Send + 'static;

    const TAG: MessageTag;
}

/// Unique id stamped on every envelope at post time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageId(Uuid);

impl MessageId {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Downcasts a boxed reply back to the reply type declared by `M`.
pub fn extract_reply<M: Message>(boxed: BoxedMessage) -> AgentResult<M::Reply> {
    boxed
        .downcast::<M::Reply>()
        .map(|b| *b)
        .map_err(|_| AgentError::ReplyMismatch(M::TAG.as_str()))
}
