//! The per-port dispatch loop.
//!
//! One tokio task runs this loop per port; the multi-threaded scheduler
//! is the shared worker pool. A single task per port is what enforces the
//! at-most-one-active-handler guarantee; no per-actor locks exist.

use crate::port::context::PortContext;
use crate::port::envelope::{Envelope, EnvelopeBody, ReplySlot};
use crate::port::reference::PortShared;
use crate::port::HandlerFn;
use crate::runtime::Runtime;
use futures::FutureExt;
use myna_api::agent::Agent;
use myna_api::errors::AgentError;
use myna_api::fault::{Exit, Fault};
use myna_api::message::MessageTag;
use myna_api::trace::{TraceEvent, TraceKind};
use myna_api::types::BoxedMessage;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

pub(crate) struct PortTask<A: Agent> {
    agent: A,
    handlers: HashMap<MessageTag, HandlerFn<A>>,
    ctx: PortContext,
    normal_rx: flume::Receiver<Envelope>,
    sync_rx: flume::Receiver<Envelope>,
    interrupt_rx: flume::Receiver<Envelope>,
    shared: Arc<PortShared>,
    runtime: Runtime,
    dropped: u64,
}

impl<A: Agent> PortTask<A> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agent: A,
        handlers: HashMap<MessageTag, HandlerFn<A>>,
        ctx: PortContext,
        normal_rx: flume::Receiver<Envelope>,
        sync_rx: flume::Receiver<Envelope>,
        interrupt_rx: flume::Receiver<Envelope>,
        shared: Arc<PortShared>,
        runtime: Runtime,
    ) -> Self {
        Self {
            agent,
            handlers,
            ctx,
            normal_rx,
            sync_rx,
            interrupt_rx,
            shared,
            runtime,
            dropped: 0,
        }
    }

    pub async fn run(mut self) {
        if let Err(err) = self.agent.setup().await {
            let fault = Fault::new(
                self.shared.id.clone(),
                self.shared.kind,
                None,
                format!("setup failed: {err}"),
            );
            self.shutdown(Some(fault)).await;
            return;
        }

        loop {
            // Priority merge: the interrupt queue is polled ahead of the
            // others on every iteration, so a pending interrupt preempts
            // the next async item. It never preempts a handler already in
            // flight; preemption points are between messages only.
            let received = tokio::select! {
                biased;
                env = self.interrupt_rx.recv_async() => env,
                env = self.sync_rx.recv_async() => env,
                env = self.normal_rx.recv_async() => env,
            };
            let Ok(envelope) = received else {
                // Every sender is gone; nothing can ever arrive again.
                break;
            };

            match envelope.body {
                EnvelopeBody::Stop(fault) => {
                    self.shutdown(fault).await;
                    return;
                }
                EnvelopeBody::User(payload) => {
                    if let Some(fault) = self.dispatch(envelope.tag, payload, envelope.reply).await
                    {
                        self.shutdown(Some(fault)).await;
                        return;
                    }
                    if let Some(requested) = self.ctx.take_stop() {
                        self.shutdown(requested).await;
                        return;
                    }
                }
            }
        }
        self.shutdown(None).await;
    }

    /// Runs the handler matching `tag`. Returns the fault that should
    /// terminate this port, if the handler failed or panicked.
    async fn dispatch(
        &mut self,
        tag: MessageTag,
        payload: BoxedMessage,
        reply: Option<ReplySlot>,
    ) -> Option<Fault> {
        let Some(handler) = self.handlers.get(&tag) else {
            // Exact-match dispatch only: an unhandled tag is counted,
            // traced, and dropped without faulting the port.
            self.dropped += 1;
            self.runtime.trace(TraceEvent::new(
                TraceKind::Dropped,
                Some(self.shared.id.clone()),
                tag.as_str(),
            ));
            tracing::trace!(agent = %self.shared.id, %tag, dropped = self.dropped, "no handler for tag");
            if let Some(slot) = reply {
                let _ = slot.send(Err(AgentError::HandlingFailed(format!(
                    "no handler registered for tag '{tag}'"
                ))));
            }
            return None;
        };

        self.runtime.trace(TraceEvent::new(
            TraceKind::Dispatched,
            Some(self.shared.id.clone()),
            tag.as_str(),
        ));
        let outcome = AssertUnwindSafe(handler(&mut self.agent, payload, &mut self.ctx))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(boxed)) => {
                if let Some(slot) = reply {
                    let _ = slot.send(Ok(boxed));
                }
                None
            }
            Ok(Err(err)) => {
                let fault = Fault::new(
                    self.shared.id.clone(),
                    self.shared.kind,
                    Some(tag.as_str().to_string()),
                    err.to_string(),
                );
                if let Some(slot) = reply {
                    let _ = slot.send(Err(err));
                }
                Some(fault)
            }
            Err(panic) => {
                let text = panic_text(panic);
                let fault = Fault::new(
                    self.shared.id.clone(),
                    self.shared.kind,
                    Some(tag.as_str().to_string()),
                    format!("handler panicked: {text}"),
                );
                if let Some(slot) = reply {
                    let _ = slot.send(Err(AgentError::HandlingFailed(text)));
                }
                Some(fault)
            }
        }
    }

    /// Terminates this port. Only the first call does anything.
    ///
    /// With a fault: the fault goes to every linked mailbox and into the
    /// runtime fault log. Without: every linked mailbox gets an `Exit`
    /// carrying this id. Either way the port unregisters itself, so later
    /// lookups yield "not found".
    async fn shutdown(&mut self, fault: Option<Fault>) {
        if !self.shared.close() {
            return;
        }

        self.agent.on_stop().await;

        let links = self.shared.take_links();
        match fault {
            Some(fault) => {
                tracing::debug!(agent = %self.shared.id, %fault, "port faulted");
                self.runtime.trace(TraceEvent::new(
                    TraceKind::Faulted,
                    Some(self.shared.id.clone()),
                    fault.error.clone(),
                ));
                self.runtime.fault_log().push(fault.clone());
                for peer in &links {
                    let _ = self.runtime.send(peer, fault.clone()).await;
                }
            }
            None => {
                tracing::debug!(agent = %self.shared.id, "port stopped");
                let exit = Exit {
                    agent: self.shared.id.clone(),
                };
                for peer in &links {
                    let _ = self.runtime.send(peer, exit.clone()).await;
                }
            }
        }

        self.runtime.unregister(&self.shared.id, &links);
        self.shared.mark_done();
    }
}

fn panic_text(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "opaque panic payload".to_string()
    }
}
