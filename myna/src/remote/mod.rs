//! Remoting: node registry, connection cache, and in-flight operation
//! tracking.
//!
//! The registry owns the authoritative node-id to endpoint map plus a
//! separate bounded, endpoint-keyed connection cache. Remote delivery is
//! best-effort: each outbound send is recorded as a pending operation,
//! acknowledged FIFO per connection, failed by explicit refusal or
//! transport error, and purged silently once its timeout elapses.

pub(crate) mod codec;
pub(crate) mod server;
pub(crate) mod tcp;

pub use codec::WireRegistry;
pub use server::ServerHandle;
pub use tcp::TcpConnector;

use crate::error::RemoteError;
use crate::wire;
use async_trait::async_trait;
use codec::WireEnvelope;
use myna_api::id::{AgentId, NodeId};
use myna_api::trace::{TraceEvent, TraceKind, TraceSink};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

/// Called with (operation id, error) when a recorded remote operation
/// fails. Per-channel; retry policy is the caller's business.
pub type RemoteErrorHandler = Arc<dyn Fn(u64, RemoteError) + Send + Sync>;

// --- Connector seam ---

/// One live outbound connection.
#[async_trait]
pub trait RemoteLink: Send + Sync + 'static {
    async fn send_frame(&self, frame: &[u8]) -> Result<(), RemoteError>;

    fn is_alive(&self) -> bool;

    /// Tears the connection down. May be called more than once; the cache
    /// guarantees it calls this at most once per cached entry.
    fn close(&self);
}

/// Everything a connector needs to wire a new link's receive side into
/// the runtime's operation tracking.
pub struct LinkContext {
    pub endpoint: SocketAddr,
    pub pending: Arc<PendingOps>,
    pub window: Arc<OpWindow>,
    pub trace: Arc<dyn TraceSink>,
}

/// Produces connections. `TcpConnector` in production; tests inject
/// fakes through `RuntimeBuilder::connector`.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, ctx: LinkContext) -> Result<Arc<dyn RemoteLink>, RemoteError>;
}

// --- Operation tracking ---

/// FIFO of unacknowledged operation ids on one connection. A zero-length
/// ack record acknowledges the oldest outstanding operation.
#[derive(Default)]
pub struct OpWindow {
    ops: Mutex<VecDeque<u64>>,
}

impl OpWindow {
    pub fn push(&self, op: u64) {
        self.ops.lock().unwrap().push_back(op);
    }

    pub fn pop_oldest(&self) -> Option<u64> {
        self.ops.lock().unwrap().pop_front()
    }

    pub fn forget(&self, op: u64) {
        self.ops.lock().unwrap().retain(|&o| o != op);
    }

    pub fn drain(&self) -> Vec<u64> {
        self.ops.lock().unwrap().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.ops.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct PostedOp {
    handler: RemoteErrorHandler,
    timeout: Duration,
    created: Instant,
}

/// Table of in-flight remote operations, ids monotonically increasing
/// per runtime.
pub struct PendingOps {
    next: AtomicU64,
    inner: Mutex<HashMap<u64, PostedOp>>,
}

impl PendingOps {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn record(&self, handler: RemoteErrorHandler, timeout: Duration) -> u64 {
        let op = self.next.fetch_add(1, Ordering::SeqCst);
        self.inner.lock().unwrap().insert(
            op,
            PostedOp {
                handler,
                timeout,
                created: Instant::now(),
            },
        );
        op
    }

    /// Resolves an acknowledged operation. False if the id was unknown
    /// (already purged or acked).
    pub fn ack(&self, op: u64) -> bool {
        self.inner.lock().unwrap().remove(&op).is_some()
    }

    /// Routes a delivery failure to the recorded error handler.
    pub fn fail(&self, op: u64, err: RemoteError) {
        let posted = self.inner.lock().unwrap().remove(&op);
        if let Some(posted) = posted {
            (posted.handler)(op, err);
        }
    }

    /// Silently drops every operation whose timeout has elapsed
    /// unacknowledged. Best-effort delivery: no notification.
    pub fn purge_expired(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.len();
        inner.retain(|_, posted| posted.created.elapsed() <= posted.timeout);
        before - inner.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PendingOps {
    fn default() -> Self {
        Self::new()
    }
}

// --- Connection cache ---

/// Cached connection plus its close-once guard and ack window.
pub(crate) struct CachedLink {
    pub endpoint: SocketAddr,
    pub link: Arc<dyn RemoteLink>,
    pub window: Arc<OpWindow>,
    // Serializes window push + frame write: the ack record names no id,
    // so window order must equal wire order on every connection.
    send_lock: tokio::sync::Mutex<()>,
    closed: AtomicBool,
}

impl CachedLink {
    fn close_once(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.link.close();
        }
    }
}

/// Bounded, endpoint-keyed LRU cache. Eviction closes the evicted
/// connection exactly once.
struct ConnectionCache {
    capacity: usize,
    // Most recently used at the back.
    inner: tokio::sync::Mutex<Vec<Arc<CachedLink>>>,
}

// --- Registry ---

/// Process-wide (per runtime) remoting state: node map, connection
/// cache, pending operations.
pub struct RemotingRegistry {
    nodes: RwLock<HashMap<NodeId, SocketAddr>>,
    cache: ConnectionCache,
    pending: Arc<PendingOps>,
    connector: Arc<dyn Connector>,
    trace: Arc<dyn TraceSink>,
    op_timeout: Duration,
}

impl RemotingRegistry {
    pub(crate) fn new(
        cache_capacity: usize,
        op_timeout: Duration,
        connector: Arc<dyn Connector>,
        trace: Arc<dyn TraceSink>,
    ) -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            cache: ConnectionCache {
                capacity: cache_capacity,
                inner: tokio::sync::Mutex::new(Vec::new()),
            },
            pending: Arc::new(PendingOps::new()),
            connector,
            trace,
            op_timeout,
        }
    }

    /// Registers (or re-points) a remote node's endpoint.
    pub fn register_node(&self, node: NodeId, endpoint: SocketAddr) {
        self.nodes.write().unwrap().insert(node, endpoint);
    }

    /// Removes a node registration and drops any cached connection to its
    /// endpoint.
    pub async fn unregister_node(&self, node: &NodeId) {
        let endpoint = self.nodes.write().unwrap().remove(node);
        if let Some(endpoint) = endpoint {
            let mut cache = self.cache.inner.lock().await;
            if let Some(pos) = cache.iter().position(|c| c.endpoint == endpoint) {
                cache.remove(pos).close_once();
            }
        }
    }

    /// The registered endpoint of a node, if any.
    pub fn endpoint_of(&self, node: &NodeId) -> Option<SocketAddr> {
        self.nodes.read().unwrap().get(node).copied()
    }

    pub fn pending_ops(&self) -> &Arc<PendingOps> {
        &self.pending
    }

    /// Returns a live cached connection to `endpoint`, reconnecting if
    /// the cached one has died, evicting the least-recently-used entry
    /// when the cache is full.
    pub(crate) async fn ensure_link(
        &self,
        endpoint: SocketAddr,
    ) -> Result<Arc<CachedLink>, RemoteError> {
        let mut cache = self.cache.inner.lock().await;

        if let Some(pos) = cache.iter().position(|c| c.endpoint == endpoint) {
            let entry = cache.remove(pos);
            if entry.link.is_alive() {
                cache.push(entry.clone());
                return Ok(entry);
            }
            entry.close_once();
        }

        let window = Arc::new(OpWindow::default());
        let link = self
            .connector
            .connect(LinkContext {
                endpoint,
                pending: self.pending.clone(),
                window: window.clone(),
                trace: self.trace.clone(),
            })
            .await?;
        let entry = Arc::new(CachedLink {
            endpoint,
            link,
            window,
            send_lock: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
        });

        if cache.len() >= self.cache.capacity {
            cache.remove(0).close_once();
        }
        cache.push(entry.clone());
        Ok(entry)
    }

    /// Posts one envelope to `endpoint`, recording it as a pending
    /// operation. Returns the operation id.
    ///
    /// A failure during the send itself is reported synchronously and the
    /// operation forgotten; later failures reach `handler` matched by id.
    pub(crate) async fn post_envelope(
        &self,
        endpoint: SocketAddr,
        to: &AgentId,
        tag: &str,
        body: String,
        handler: RemoteErrorHandler,
    ) -> Result<u64, RemoteError> {
        let entry = self.ensure_link(endpoint).await?;
        let op = self.pending.record(handler, self.op_timeout);
        let envelope = WireEnvelope::Deliver {
            op,
            to: to.to_string(),
            tag: tag.to_string(),
            body,
        };
        let payload =
            serde_json::to_vec(&envelope).map_err(|e| RemoteError::Codec(e.to_string()))?;
        let frame = wire::frame(None, &payload)?;

        let sent = {
            let _sending = entry.send_lock.lock().await;
            entry.window.push(op);
            entry.link.send_frame(&frame).await
        };
        if let Err(err) = sent {
            entry.window.forget(op);
            self.pending.ack(op);
            self.trace.trace(&TraceEvent::new(
                TraceKind::RemoteFail,
                Some(to.clone()),
                err.to_string(),
            ));
            return Err(err);
        }
        self.trace
            .trace(&TraceEvent::new(TraceKind::RemoteSend, Some(to.clone()), tag));
        Ok(op)
    }

    /// Closes every cached connection, for runtime shutdown.
    pub(crate) async fn close_all(&self) {
        let mut cache = self.cache.inner.lock().await;
        for entry in cache.drain(..) {
            entry.close_once();
        }
    }
}
