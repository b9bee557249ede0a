//! Agent ports: per-actor mailboxes with type-dispatched, strictly
//! sequential processing.
//!
//! A port owns three bounded queues (async, synchronous, interrupt) and a
//! tag-keyed handler table. `PortBuilder` assembles the agent with its
//! handler registrations; `Runtime::spawn` turns the builder into a live
//! port and hands back an [`AgentRef`].

pub(crate) mod context;
pub(crate) mod dispatch;
pub(crate) mod envelope;
pub(crate) mod reference;

pub use context::PortContext;
pub use reference::AgentRef;

use crate::config::PortConfig;
use myna_api::agent::Agent;
use myna_api::errors::AgentError;
use myna_api::message::{Message, MessageTag};
use myna_api::types::{AgentResult, BoxedFuture, BoxedMessage};
use async_trait::async_trait;
use std::collections::HashMap;

/// Declares how agent `Self` processes message type `M`.
///
/// Registered into a port through [`PortBuilder::handle`]; at most one
/// handler is ever active per port, so `&mut self` needs no
/// synchronization.
#[async_trait]
pub trait Handler<M: Message>: Agent {
    async fn handle(&mut self, msg: M, ctx: &mut PortContext) -> AgentResult<M::Reply>;
}

/// Type-erased handler entry: downcasts the payload, runs the typed
/// handler, boxes the reply.
pub(crate) type HandlerFn<A> = Box<
    dyn for<'a> Fn(
            &'a mut A,
            BoxedMessage,
            &'a mut PortContext,
        ) -> BoxedFuture<'a, AgentResult<BoxedMessage>>
        + Send,
>;

fn erase_handler<A, M>() -> HandlerFn<A>
where
    A: Handler<M>,
    M: Message,
{
    Box::new(|agent, payload, ctx| {
        Box::pin(async move {
            let msg = payload.downcast::<M>().map_err(|_| {
                AgentError::HandlingFailed(format!(
                    "payload does not match registered tag '{}'",
                    M::TAG
                ))
            })?;
            let reply = Handler::<M>::handle(agent, *msg, ctx).await?;
            Ok(Box::new(reply) as BoxedMessage)
        })
    })
}

/// Assembles one agent port: the agent instance, its configuration, and
/// its handler table.
pub struct PortBuilder<A: Agent> {
    pub(crate) agent: A,
    pub(crate) config: PortConfig,
    pub(crate) handlers: HashMap<MessageTag, HandlerFn<A>>,
}

impl<A: Agent> PortBuilder<A> {
    pub fn new(agent: A) -> Self {
        Self {
            agent,
            config: PortConfig::default(),
            handlers: HashMap::new(),
        }
    }

    pub fn with_config(mut self, config: PortConfig) -> Self {
        self.config = config;
        self
    }

    /// Mailbox-wide synchronous flag: every plain post to this port
    /// blocks its sender until the handler completes.
    pub fn synchronous(mut self) -> Self {
        self.config.synchronous = true;
        self
    }

    /// Registers the handler for `M`'s tag. Registering the same tag
    /// again replaces the previous entry: last registration wins.
    pub fn handle<M>(mut self) -> Self
    where
        A: Handler<M>,
        M: Message,
    {
        self.handlers.insert(M::TAG, erase_handler::<A, M>());
        self
    }
}
