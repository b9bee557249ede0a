//! Routing engine: resolves a destination identifier to a concrete
//! channel.
//!
//! Resolution order: a destination whose node authority is a registered
//! remote node gets a [`RemoteChannel`] bound to that endpoint; otherwise
//! a synchronous request gets a [`SyncChannel`]; otherwise a plain
//! [`LocalChannel`]. A [`MulticastChannel`] wraps any set of resolved
//! channels.

use crate::error::{MailboxError, RemoteError, RuntimeError};
use crate::port::AgentRef;
use crate::remote::{RemoteErrorHandler, RemotingRegistry, WireRegistry};
use crate::runtime::Runtime;
use futures::future::join_all;
use myna_api::errors::AgentError;
use myna_api::id::AgentId;
use myna_api::message::Message;
use myna_api::types::AgentResult;
use std::net::SocketAddr;
use std::sync::Arc;

/// Requested delivery class, as far as routing cares about it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    Normal,
    Synchronous,
}

/// Resolves destination ids against one runtime's registries.
pub struct Router {
    runtime: Runtime,
}

impl Router {
    pub(crate) fn new(runtime: Runtime) -> Self {
        Self { runtime }
    }

    pub fn resolve(&self, to: &AgentId, delivery: Delivery) -> Result<AnyChannel, RuntimeError> {
        if let Some(endpoint) = self.runtime.remoting().endpoint_of(to.node()) {
            return Ok(AnyChannel::Remote(RemoteChannel::new(
                to.clone(),
                endpoint,
                self.runtime.remoting_arc(),
                self.runtime.wire_registry_arc(),
            )));
        }
        let target = self
            .runtime
            .agent(to)
            .ok_or_else(|| RuntimeError::AgentNotFound(to.clone()))?;
        Ok(match delivery {
            Delivery::Synchronous => AnyChannel::Sync(SyncChannel { target }),
            Delivery::Normal => AnyChannel::Local(LocalChannel { target }),
        })
    }
}

// --- Channels ---

/// Plain async delivery to a local mailbox.
pub struct LocalChannel {
    target: AgentRef,
}

impl LocalChannel {
    pub fn agent(&self) -> &AgentRef {
        &self.target
    }

    pub async fn send<M: Message>(&self, msg: M) -> Result<(), RuntimeError> {
        Ok(self.target.post(msg).await?)
    }

    pub async fn request<M: Message>(&self, msg: M) -> AgentResult<M::Reply> {
        self.target.request(msg).await
    }
}

/// Synchronous delivery: completes only after the destination's handler
/// has run, carrying its result.
pub struct SyncChannel {
    target: AgentRef,
}

impl SyncChannel {
    pub async fn send<M: Message>(&self, msg: M) -> AgentResult<M::Reply> {
        self.target.post_sync(msg).await
    }
}

/// Delivery over the wire to a registered remote node. Acknowledge-only:
/// failures arrive through the channel's error handler, matched by
/// operation id; there is no reply value and no built-in retry.
pub struct RemoteChannel {
    to: AgentId,
    endpoint: SocketAddr,
    remoting: Arc<RemotingRegistry>,
    wire: Arc<WireRegistry>,
    on_error: RemoteErrorHandler,
}

impl std::fmt::Debug for RemoteChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteChannel")
            .field("to", &self.to)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl RemoteChannel {
    pub(crate) fn new(
        to: AgentId,
        endpoint: SocketAddr,
        remoting: Arc<RemotingRegistry>,
        wire: Arc<WireRegistry>,
    ) -> Self {
        let default_to = to.clone();
        Self {
            to,
            endpoint,
            remoting,
            wire,
            on_error: Arc::new(move |op, err| {
                tracing::warn!(op, to = %default_to, %err, "remote delivery failed");
            }),
        }
    }

    /// Installs the per-channel delivery-failure handler.
    pub fn on_error(mut self, handler: impl Fn(u64, RemoteError) + Send + Sync + 'static) -> Self {
        self.on_error = Arc::new(handler);
        self
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    /// Posts `msg` and returns its operation id. The message type must be
    /// wire-registered.
    pub async fn send<M: Message>(&self, msg: M) -> Result<u64, RuntimeError> {
        let body = self.wire.encode(M::TAG, &msg)?;
        let op = self
            .remoting
            .post_envelope(
                self.endpoint,
                &self.to,
                M::TAG.as_str(),
                body,
                self.on_error.clone(),
            )
            .await?;
        Ok(op)
    }
}

/// One resolved channel of any kind.
pub enum AnyChannel {
    Local(LocalChannel),
    Sync(SyncChannel),
    Remote(RemoteChannel),
}

impl AnyChannel {
    pub async fn send<M: Message>(&self, msg: M) -> Result<(), RuntimeError> {
        match self {
            AnyChannel::Local(c) => c.send(msg).await,
            AnyChannel::Sync(c) => match c.send(msg).await {
                Err(AgentError::Stopped) => Err(MailboxError::Closed.into()),
                // Handler outcomes travel the fault path; the sender only
                // needed completion.
                _ => Ok(()),
            },
            AnyChannel::Remote(c) => c.send(msg).await.map(|_| ()),
        }
    }

    pub async fn request<M: Message>(&self, msg: M) -> AgentResult<M::Reply> {
        match self {
            AnyChannel::Local(c) => c.request(msg).await,
            AnyChannel::Sync(c) => c.send(msg).await,
            AnyChannel::Remote(_) => Err(AgentError::HandlingFailed(
                "request over a remote channel is not supported; remote delivery is acknowledge-only"
                    .to_string(),
            )),
        }
    }
}

/// Broadcast wrapper over a set of resolved channels.
pub struct MulticastChannel {
    channels: Vec<AnyChannel>,
}

impl MulticastChannel {
    pub fn new(channels: Vec<AnyChannel>) -> Self {
        Self { channels }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Sends `msg` to every wrapped channel, returning per-channel
    /// outcomes in channel order.
    pub async fn broadcast<M: Message + Clone>(&self, msg: M) -> Vec<Result<(), RuntimeError>> {
        join_all(self.channels.iter().map(|c| c.send(msg.clone()))).await
    }

    /// Requests against every wrapped channel, gathering every reply.
    pub async fn request_all<M: Message + Clone>(&self, msg: M) -> Vec<AgentResult<M::Reply>> {
        join_all(self.channels.iter().map(|c| c.request(msg.clone()))).await
    }
}
