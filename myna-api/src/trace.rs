//! Trace sink contract.
//!
//! The engine emits a trace event at every interesting lifecycle point:
//! registration, dispatch, faults, links, remote sends. The sink is
//! fire-and-forget by contract: it must never block dispatch and must
//! never propagate a failure back into actor fault semantics.

use crate::id::AgentId;

/// Kind of runtime event being traced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraceKind {
    Registered,
    Unregistered,
    Posted,
    Dispatched,
    Dropped,
    Faulted,
    Linked,
    Unlinked,
    RemoteSend,
    RemoteAck,
    RemoteFail,
}

/// One runtime trace event.
#[derive(Clone, Debug)]
pub struct TraceEvent {
    pub kind: TraceKind,
    /// The agent the event concerns, when there is one.
    pub agent: Option<AgentId>,
    /// Free-form context: a message tag, a peer id, an error description.
    pub detail: String,
}

impl TraceEvent {
    pub fn new(kind: TraceKind, agent: Option<AgentId>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            agent,
            detail: detail.into(),
        }
    }
}

/// Receives trace events. Implementations must be cheap and infallible
/// from the caller's point of view.
pub trait TraceSink: Send + Sync + 'static {
    fn trace(&self, event: &TraceEvent);
}

/// Sink that discards every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullTraceSink;

impl TraceSink for NullTraceSink {
    fn trace(&self, _event: &TraceEvent) {}
}
