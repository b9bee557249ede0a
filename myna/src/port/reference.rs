//! `AgentRef`: the cheap-clone sending handle of one agent port.

use crate::error::MailboxError;
use crate::port::envelope::{Envelope, ReplySlot};
use myna_api::errors::AgentError;
use myna_api::fault::Fault;
use myna_api::id::AgentId;
use myna_api::message::{extract_reply, Message, MessageTag};
use myna_api::types::{AgentResult, BoxedMessage};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

/// State shared between a port's dispatch task and every `AgentRef`
/// pointing at it.
pub(crate) struct PortShared {
    pub id: AgentId,
    pub kind: &'static str,
    /// Mailbox-wide synchronous flag: plain posts are upgraded to
    /// synchronous delivery.
    pub synchronous: bool,
    pub ask_timeout: Duration,
    closed: AtomicBool,
    /// Linked mailbox ids, mutated only under this private lock.
    links: Mutex<HashSet<AgentId>>,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PortShared {
    pub fn new(id: AgentId, kind: &'static str, synchronous: bool, ask_timeout: Duration) -> Self {
        let (done_tx, done_rx) = watch::channel(false);
        Self {
            id,
            kind,
            synchronous,
            ask_timeout,
            closed: AtomicBool::new(false),
            links: Mutex::new(HashSet::new()),
            done_tx,
            done_rx,
            task: Mutex::new(None),
        }
    }

    /// Marks the port closed. Returns true for the one call that actually
    /// performed the transition, making shutdown idempotent.
    pub fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn add_link(&self, peer: &AgentId) {
        self.links.lock().unwrap().insert(peer.clone());
    }

    pub fn remove_link(&self, peer: &AgentId) {
        self.links.lock().unwrap().remove(peer);
    }

    /// Drains the link set for shutdown notification.
    pub fn take_links(&self) -> Vec<AgentId> {
        self.links.lock().unwrap().drain().collect()
    }

    pub fn mark_done(&self) {
        let _ = self.done_tx.send(true);
    }

    pub fn set_task(&self, task: JoinHandle<()>) {
        *self.task.lock().unwrap() = Some(task);
    }

    pub fn abort_task(&self) {
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
    }
}

/// Handle for sending messages to one agent's mailbox.
///
/// Cloning is cheap; every clone addresses the same port. The handle
/// stays valid after the port shuts down, at which point every send
/// reports the mailbox closed.
#[derive(Clone)]
pub struct AgentRef {
    pub(crate) shared: Arc<PortShared>,
    pub(crate) normal_tx: flume::Sender<Envelope>,
    pub(crate) sync_tx: flume::Sender<Envelope>,
    pub(crate) interrupt_tx: flume::Sender<Envelope>,
}

impl AgentRef {
    pub fn id(&self) -> &AgentId {
        &self.shared.id
    }

    /// Type name of the agent behind this port.
    pub fn kind(&self) -> &'static str {
        self.shared.kind
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    async fn push(
        &self,
        tx: &flume::Sender<Envelope>,
        envelope: Envelope,
    ) -> Result<(), MailboxError> {
        if self.shared.is_closed() {
            return Err(MailboxError::Closed);
        }
        tx.send_async(envelope)
            .await
            .map_err(|_| MailboxError::Closed)
    }

    /// Posts onto the async queue. On a port built with the mailbox-wide
    /// synchronous flag this blocks until the handler has processed the
    /// message (acknowledge-before-proceed), discarding the reply value.
    pub async fn post<M: Message>(&self, msg: M) -> Result<(), MailboxError> {
        if self.shared.synchronous {
            let (tx, rx) = oneshot::channel();
            self.push(&self.sync_tx, Envelope::user(msg, Some(tx))).await?;
            // Error outcomes travel the fault path; the caller only needs
            // completion.
            let _ = rx.await.map_err(|_| MailboxError::Closed)?;
            Ok(())
        } else {
            self.push(&self.normal_tx, Envelope::user(msg, None)).await
        }
    }

    /// Non-blocking post onto the async queue. Reports the queue full
    /// instead of waiting for capacity.
    pub fn try_post<M: Message>(&self, msg: M) -> Result<(), MailboxError> {
        if self.shared.is_closed() {
            return Err(MailboxError::Closed);
        }
        self.normal_tx
            .try_send(Envelope::user(msg, None))
            .map_err(|err| match err {
                flume::TrySendError::Full(_) => MailboxError::Full {
                    capacity: self.normal_tx.capacity().unwrap_or(0),
                },
                flume::TrySendError::Disconnected(_) => MailboxError::Closed,
            })
    }

    /// Synchronous send: queued on the sync queue, completing only after
    /// the handler returns, with the handler's result.
    ///
    /// Never issue this from inside a handler for the same mailbox; the
    /// handler cannot finish while its own caller blocks on it.
    pub async fn post_sync<M: Message>(&self, msg: M) -> AgentResult<M::Reply> {
        let (tx, rx) = oneshot::channel();
        self.push(&self.sync_tx, Envelope::user(msg, Some(tx)))
            .await
            .map_err(mailbox_to_agent)?;
        let boxed = rx.await.map_err(|_| AgentError::ReplyDropped)??;
        extract_reply::<M>(boxed)
    }

    /// Posts onto the interrupt queue, which preempts the next async item
    /// but never a handler already in flight.
    pub async fn interrupt<M: Message>(&self, msg: M) -> Result<(), MailboxError> {
        self.push(&self.interrupt_tx, Envelope::user(msg, None)).await
    }

    /// Async request with a typed reply future: queued on the normal
    /// queue, resolving when the handler replies, bounded by the port's
    /// ask timeout.
    pub async fn request<M: Message>(&self, msg: M) -> AgentResult<M::Reply> {
        let (tx, rx) = oneshot::channel();
        self.push(&self.normal_tx, Envelope::user(msg, Some(tx)))
            .await
            .map_err(mailbox_to_agent)?;
        let boxed = tokio::time::timeout(self.shared.ask_timeout, rx)
            .await
            .map_err(|_| AgentError::Timeout)?
            .map_err(|_| AgentError::ReplyDropped)??;
        extract_reply::<M>(boxed)
    }

    /// Queues a graceful stop ahead of pending async work.
    pub(crate) async fn post_stop(&self, fault: Option<Fault>) {
        let _ = self.push(&self.interrupt_tx, Envelope::stop(fault)).await;
    }

    /// Posts an already-erased payload (wire delivery path).
    pub(crate) async fn post_boxed(
        &self,
        tag: MessageTag,
        payload: BoxedMessage,
    ) -> Result<(), MailboxError> {
        self.push(&self.normal_tx, Envelope::user_boxed(tag, payload))
            .await
    }

    /// Waits until the dispatch task has fully terminated, up to
    /// `timeout`. Returns whether it did.
    pub async fn wait_done(&self, timeout: Duration) -> bool {
        let mut rx = self.shared.done_rx.clone();
        tokio::time::timeout(timeout, async move {
            loop {
                if *rx.borrow() {
                    return true;
                }
                if rx.changed().await.is_err() {
                    return *rx.borrow();
                }
            }
        })
        .await
        .unwrap_or(false)
    }

    pub(crate) fn add_link(&self, peer: &AgentId) {
        self.shared.add_link(peer);
    }

    pub(crate) fn remove_link(&self, peer: &AgentId) {
        self.shared.remove_link(peer);
    }
}

impl fmt::Debug for AgentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentRef")
            .field("id", &self.shared.id)
            .field("kind", &self.shared.kind)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn mailbox_to_agent(err: MailboxError) -> AgentError {
    match err {
        MailboxError::Closed => AgentError::Stopped,
        other => AgentError::HandlingFailed(other.to_string()),
    }
}
