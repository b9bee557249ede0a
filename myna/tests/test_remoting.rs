// Remoting: connection cache behavior against a fake connector, and
// end-to-end delivery between two runtimes over loopback TCP.

use async_trait::async_trait;
use myna::{
    Agent, AgentId, AgentResult, Connector, Handler, LinkContext, Message, MessageTag, NodeId,
    OpWindow, PendingOps, PortBuilder, PortContext, RemoteError, RemoteLink, Runtime,
    RuntimeError, TraceEvent, TraceKind, TraceSink,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Clone, Serialize, Deserialize)]
struct Ping {
    seq: u64,
}

impl Message for Ping {
    type Reply = ();

    const TAG: MessageTag = MessageTag("test/ping");
}

// --- Fake transport ---

struct FakeLink {
    alive: AtomicBool,
    closes: AtomicUsize,
    frames: Mutex<Vec<Vec<u8>>>,
}

impl FakeLink {
    fn new() -> Self {
        Self {
            alive: AtomicBool::new(true),
            closes: AtomicUsize::new(0),
            frames: Mutex::new(Vec::new()),
        }
    }

    fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn frame_count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }
}

#[async_trait]
impl RemoteLink for FakeLink {
    async fn send_frame(&self, frame: &[u8]) -> Result<(), RemoteError> {
        self.frames.lock().unwrap().push(frame.to_vec());
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.alive.store(false, Ordering::SeqCst);
    }
}

struct Connected {
    link: Arc<FakeLink>,
    window: Arc<OpWindow>,
    pending: Arc<PendingOps>,
}

#[derive(Default)]
struct FakeConnector {
    connections: Arc<Mutex<Vec<Connected>>>,
}

impl FakeConnector {
    fn connection_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    fn connection(&self, index: usize) -> (Arc<FakeLink>, Arc<OpWindow>, Arc<PendingOps>) {
        let connections = self.connections.lock().unwrap();
        let c = &connections[index];
        (c.link.clone(), c.window.clone(), c.pending.clone())
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, ctx: LinkContext) -> Result<Arc<dyn RemoteLink>, RemoteError> {
        let link = Arc::new(FakeLink::new());
        self.connections.lock().unwrap().push(Connected {
            link: link.clone(),
            window: ctx.window,
            pending: ctx.pending,
        });
        Ok(link)
    }
}

fn fake_runtime(cache_capacity: usize) -> (Runtime, Arc<FakeConnector>) {
    let connector = Arc::new(FakeConnector::default());
    let rt = Runtime::builder()
        .node_name("local")
        .connection_cache_capacity(cache_capacity)
        .connector(connector.clone())
        .build();
    rt.register_wire::<Ping>();
    (rt, connector)
}

fn endpoint(port: u16) -> SocketAddr {
    format!("127.0.0.1:{port}").parse().unwrap()
}

fn remote_id(node: &str, key: u64) -> AgentId {
    AgentId::new(NodeId::new(node), key)
}

#[tokio::test]
async fn cache_reuses_a_live_connection() {
    let (rt, connector) = fake_runtime(4);
    rt.register_node(NodeId::new("peer"), endpoint(9001));
    let channel = rt.remote_channel(&remote_id("peer", 1)).unwrap();

    channel.send(Ping { seq: 1 }).await.unwrap();
    channel.send(Ping { seq: 2 }).await.unwrap();

    assert_eq!(connector.connection_count(), 1);
    let (link, _, _) = connector.connection(0);
    assert_eq!(link.frame_count(), 2);
    rt.shutdown().await;
}

#[tokio::test]
async fn lru_eviction_closes_the_evicted_link_exactly_once() {
    let (rt, connector) = fake_runtime(2);
    for (i, node) in ["one", "two", "three"].iter().enumerate() {
        rt.register_node(NodeId::new(*node), endpoint(9101 + i as u16));
    }

    for node in ["one", "two", "three"] {
        let channel = rt.remote_channel(&remote_id(node, 1)).unwrap();
        channel.send(Ping { seq: 0 }).await.unwrap();
    }

    assert_eq!(connector.connection_count(), 3);
    let (first, _, _) = connector.connection(0);
    let (second, _, _) = connector.connection(1);
    let (third, _, _) = connector.connection(2);
    // The oldest entry was evicted when the third connection arrived.
    assert_eq!(first.close_count(), 1);
    assert_eq!(second.close_count(), 0);
    assert_eq!(third.close_count(), 0);

    // Going back to the evicted endpoint opens a fresh connection (and
    // never re-closes the old link).
    let channel = rt.remote_channel(&remote_id("one", 1)).unwrap();
    channel.send(Ping { seq: 1 }).await.unwrap();
    assert_eq!(connector.connection_count(), 4);
    assert_eq!(first.close_count(), 1);
    rt.shutdown().await;
}

#[tokio::test]
async fn a_dead_link_is_replaced_on_the_next_send() {
    let (rt, connector) = fake_runtime(4);
    rt.register_node(NodeId::new("peer"), endpoint(9201));
    let channel = rt.remote_channel(&remote_id("peer", 1)).unwrap();

    channel.send(Ping { seq: 1 }).await.unwrap();
    let (first, _, _) = connector.connection(0);
    first.kill();

    channel.send(Ping { seq: 2 }).await.unwrap();
    assert_eq!(connector.connection_count(), 2);
    let (second, _, _) = connector.connection(1);
    assert_eq!(second.frame_count(), 1);
    rt.shutdown().await;
}

#[tokio::test]
async fn acks_resolve_operations_oldest_first() {
    let (rt, connector) = fake_runtime(4);
    rt.register_node(NodeId::new("peer"), endpoint(9301));
    let channel = rt.remote_channel(&remote_id("peer", 1)).unwrap();

    let op1 = channel.send(Ping { seq: 1 }).await.unwrap();
    let op2 = channel.send(Ping { seq: 2 }).await.unwrap();
    assert_ne!(op1, op2);

    let (_, window, pending) = connector.connection(0);
    assert_eq!(window.len(), 2);
    assert_eq!(pending.len(), 2);

    // A zero-length ack names no id: it resolves the oldest op.
    let acked = window.pop_oldest().unwrap();
    assert_eq!(acked, op1);
    assert!(pending.ack(acked));
    assert_eq!(pending.len(), 1);
    rt.shutdown().await;
}

/// Parks the first frame write until the test releases it, so a second
/// send can race it.
struct ParkingLink {
    alive: AtomicBool,
    parked: AtomicBool,
    entered: Arc<Notify>,
    release: Arc<Notify>,
    frames: Mutex<Vec<Vec<u8>>>,
}

impl ParkingLink {
    fn new(entered: Arc<Notify>, release: Arc<Notify>) -> Self {
        Self {
            alive: AtomicBool::new(true),
            parked: AtomicBool::new(false),
            entered,
            release,
            frames: Mutex::new(Vec::new()),
        }
    }

    /// Operation ids in the order their frames finished writing.
    fn wire_ops(&self) -> Vec<u64> {
        self.frames
            .lock()
            .unwrap()
            .iter()
            .map(|frame| {
                let (_, payload) = myna::wire::unframe(frame).unwrap();
                let envelope: serde_json::Value = serde_json::from_slice(&payload).unwrap();
                envelope["Deliver"]["op"].as_u64().unwrap()
            })
            .collect()
    }
}

#[async_trait]
impl RemoteLink for ParkingLink {
    async fn send_frame(&self, frame: &[u8]) -> Result<(), RemoteError> {
        if !self.parked.swap(true, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.frames.lock().unwrap().push(frame.to_vec());
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

struct ParkingConnector {
    link: Arc<ParkingLink>,
    window: Mutex<Option<Arc<OpWindow>>>,
}

#[async_trait]
impl Connector for ParkingConnector {
    async fn connect(&self, ctx: LinkContext) -> Result<Arc<dyn RemoteLink>, RemoteError> {
        *self.window.lock().unwrap() = Some(ctx.window);
        Ok(self.link.clone())
    }
}

#[tokio::test]
async fn concurrent_sends_keep_window_order_matching_wire_order() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let link = Arc::new(ParkingLink::new(entered.clone(), release.clone()));
    let connector = Arc::new(ParkingConnector {
        link: link.clone(),
        window: Mutex::new(None),
    });
    let rt = Runtime::builder()
        .node_name("local")
        .connector(connector.clone())
        .build();
    rt.register_wire::<Ping>();
    rt.register_node(NodeId::new("peer"), endpoint(9701));

    let slow = rt.remote_channel(&remote_id("peer", 1)).unwrap();
    let fast = rt.remote_channel(&remote_id("peer", 2)).unwrap();

    let first = tokio::spawn(async move { slow.send(Ping { seq: 1 }).await.unwrap() });
    entered.notified().await;
    // The first write is parked in flight. A second send on the same
    // link must queue behind it, not overtake it onto the wire.
    let second = tokio::spawn(async move { fast.send(Ping { seq: 2 }).await.unwrap() });
    tokio::time::sleep(Duration::from_millis(50)).await;
    release.notify_one();
    let op1 = first.await.unwrap();
    let op2 = second.await.unwrap();

    // FIFO ack correlation is only sound if these two orders agree.
    assert_eq!(link.wire_ops(), vec![op1, op2]);
    let window = connector.window.lock().unwrap().clone().unwrap();
    assert_eq!(window.drain(), vec![op1, op2]);
    rt.shutdown().await;
}

#[tokio::test]
async fn a_refusal_reaches_the_channel_error_handler() {
    let (rt, connector) = fake_runtime(4);
    rt.register_node(NodeId::new("peer"), endpoint(9401));

    let seen: Arc<Mutex<Vec<(u64, RemoteError)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let channel = rt
        .remote_channel(&remote_id("peer", 1))
        .unwrap()
        .on_error(move |op, err| sink.lock().unwrap().push((op, err)));

    let op = channel.send(Ping { seq: 1 }).await.unwrap();
    let (_, window, pending) = connector.connection(0);
    window.forget(op);
    pending.fail(op, RemoteError::Refused("agent not found".to_string()));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, op);
    assert!(matches!(seen[0].1, RemoteError::Refused(_)));
    assert!(pending.is_empty());
    rt.shutdown().await;
}

#[tokio::test]
async fn expired_operations_are_purged_silently() {
    let connector = Arc::new(FakeConnector::default());
    let rt = Runtime::builder()
        .node_name("local")
        .op_timeout(Duration::from_millis(10))
        .connector(connector.clone())
        .build();
    rt.register_wire::<Ping>();
    rt.register_node(NodeId::new("peer"), endpoint(9501));

    let channel = rt.remote_channel(&remote_id("peer", 1)).unwrap();
    channel.send(Ping { seq: 1 }).await.unwrap();

    let pending = rt.remoting().pending_ops().clone();
    assert_eq!(pending.len(), 1);
    tokio::time::sleep(Duration::from_millis(50)).await;
    // Either the housekeeping job already swept it or this call does.
    pending.purge_expired();
    assert!(pending.is_empty());
    rt.shutdown().await;
}

#[tokio::test]
async fn unregistered_nodes_are_not_routable() {
    let (rt, _connector) = fake_runtime(4);
    let err = rt.remote_channel(&remote_id("nowhere", 1)).unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Remote(RemoteError::UnknownNode(_))
    ));
    rt.shutdown().await;
}

#[tokio::test]
async fn sending_an_unregistered_type_fails() {
    let connector = Arc::new(FakeConnector::default());
    let rt = Runtime::builder()
        .node_name("local")
        .connector(connector.clone())
        .build();
    // Ping deliberately not wire-registered.
    rt.register_node(NodeId::new("peer"), endpoint(9601));

    let channel = rt.remote_channel(&remote_id("peer", 1)).unwrap();
    let err = channel.send(Ping { seq: 1 }).await.unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Remote(RemoteError::UnregisteredTag(_))
    ));
    rt.shutdown().await;
}

// --- Real TCP ---

#[derive(Default)]
struct RecordingSink {
    kinds: Mutex<Vec<TraceKind>>,
}

impl TraceSink for RecordingSink {
    fn trace(&self, event: &TraceEvent) {
        self.kinds.lock().unwrap().push(event.kind);
    }
}

impl RecordingSink {
    fn count(&self, kind: TraceKind) -> usize {
        self.kinds.lock().unwrap().iter().filter(|k| **k == kind).count()
    }
}

#[derive(Default)]
struct Echo {
    received: Arc<Mutex<Vec<u64>>>,
}

impl Agent for Echo {}

#[async_trait]
impl Handler<Ping> for Echo {
    async fn handle(&mut self, msg: Ping, _ctx: &mut PortContext) -> AgentResult<()> {
        self.received.lock().unwrap().push(msg.seq);
        Ok(())
    }
}

#[tokio::test]
async fn delivery_between_two_runtimes_over_tcp() {
    let sink = Arc::new(RecordingSink::default());
    let alpha = Runtime::builder()
        .node_name("alpha")
        .trace_sink(sink.clone())
        .build();
    let beta = Runtime::builder().node_name("beta").build();
    alpha.register_wire::<Ping>();
    beta.register_wire::<Ping>();

    let server = beta.listen(endpoint(0)).await.unwrap();
    alpha.register_node(NodeId::new("beta"), server.addr());

    let echo = Echo::default();
    let received = echo.received.clone();
    let target = beta.spawn(PortBuilder::new(echo).handle::<Ping>()).unwrap();

    for seq in 1..=3 {
        alpha.send(target.id(), Ping { seq }).await.unwrap();
    }

    let mut delivered = false;
    for _ in 0..100 {
        if received.lock().unwrap().len() == 3 {
            delivered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(delivered, "pings never arrived at the remote agent");
    assert_eq!(*received.lock().unwrap(), vec![1, 2, 3]);

    // All three operations get acked back over the same connection.
    for _ in 0..100 {
        if alpha.remoting().pending_ops().is_empty() && sink.count(TraceKind::RemoteAck) == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(alpha.remoting().pending_ops().is_empty());
    assert_eq!(sink.count(TraceKind::RemoteAck), 3);
    assert_eq!(sink.count(TraceKind::RemoteSend), 3);

    alpha.shutdown().await;
    beta.shutdown().await;
}

#[tokio::test]
async fn a_missing_remote_agent_is_refused_over_tcp() {
    let alpha = Runtime::builder().node_name("alpha").build();
    let beta = Runtime::builder().node_name("beta").build();
    alpha.register_wire::<Ping>();
    beta.register_wire::<Ping>();

    let server = beta.listen(endpoint(0)).await.unwrap();
    alpha.register_node(NodeId::new("beta"), server.addr());

    let seen: Arc<Mutex<Vec<(u64, RemoteError)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let channel = alpha
        .remote_channel(&remote_id("beta", 424242))
        .unwrap()
        .on_error(move |op, err| sink.lock().unwrap().push((op, err)));

    let op = channel.send(Ping { seq: 1 }).await.unwrap();

    let mut refused = false;
    for _ in 0..100 {
        if !seen.lock().unwrap().is_empty() {
            refused = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(refused, "the refusal never came back");
    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].0, op);
    assert!(matches!(seen[0].1, RemoteError::Refused(_)));

    alpha.shutdown().await;
    beta.shutdown().await;
}
