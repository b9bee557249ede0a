//! `PortContext`: what a handler sees of the runtime while it runs.

use crate::error::RuntimeError;
use crate::port::reference::AgentRef;
use crate::runtime::Runtime;
use myna_api::errors::AgentError;
use myna_api::fault::Fault;
use myna_api::id::AgentId;
use myna_api::message::Message;
use myna_api::types::AgentResult;

/// Handler-side view of the runtime, passed into every handler
/// invocation. Sends issued here are routed exactly like external sends,
/// so handlers are location-transparent senders too.
pub struct PortContext {
    runtime: Runtime,
    self_ref: AgentRef,
    stop: Option<Option<Fault>>,
}

impl PortContext {
    pub(crate) fn new(runtime: Runtime, self_ref: AgentRef) -> Self {
        Self {
            runtime,
            self_ref,
            stop: None,
        }
    }

    /// This agent's own id.
    pub fn id(&self) -> &AgentId {
        self.self_ref.id()
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Resolves a live agent reference; `None` once the target has shut
    /// down.
    pub fn agent(&self, id: &AgentId) -> Option<AgentRef> {
        self.runtime.agent(id)
    }

    pub async fn post<M: Message>(&self, to: &AgentId, msg: M) -> Result<(), RuntimeError> {
        self.runtime.send(to, msg).await
    }

    /// Synchronous send from inside a handler. Addressing the handler's
    /// own mailbox is refused outright: the port cannot process the
    /// message until this handler returns, so the call could never
    /// complete.
    pub async fn post_sync<M: Message>(&self, to: &AgentId, msg: M) -> AgentResult<M::Reply> {
        if to == self.id() {
            return Err(AgentError::WouldDeadlock);
        }
        self.runtime.send_sync(to, msg).await
    }

    /// Request/response from inside a handler, with the same self-send
    /// guard as [`post_sync`](Self::post_sync).
    pub async fn request<M: Message>(&self, to: &AgentId, msg: M) -> AgentResult<M::Reply> {
        if to == self.id() {
            return Err(AgentError::WouldDeadlock);
        }
        self.runtime.request(to, msg).await
    }

    pub async fn interrupt<M: Message>(&self, to: &AgentId, msg: M) -> Result<(), RuntimeError> {
        self.runtime.interrupt(to, msg).await
    }

    /// Links this agent with `peer` (symmetric fault/exit subscription).
    pub fn link(&self, peer: &AgentId) -> Result<(), RuntimeError> {
        self.runtime.link(self.id(), peer)
    }

    pub fn unlink(&self, peer: &AgentId) -> Result<(), RuntimeError> {
        self.runtime.unlink(self.id(), peer)
    }

    /// Requests shutdown of this port once the current handler returns.
    /// `Some` propagates a fault to every linked mailbox, `None` exits
    /// cleanly.
    pub fn stop_self(&mut self, fault: Option<Fault>) {
        self.stop = Some(fault);
    }

    pub(crate) fn take_stop(&mut self) -> Option<Option<Fault>> {
        self.stop.take()
    }
}
