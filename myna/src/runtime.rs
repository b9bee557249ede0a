//! The runtime: a cheap-clone facade over one node's registries and
//! services.
//!
//! Every registry (agents, nodes, connections, pending operations, fault
//! log) is owned by the `RuntimeCore` instance and injected through the
//! builder rather than held in ambient statics, so multiple independent runtimes
//! coexist in one process and in one test.

use crate::config::RuntimeConfig;
use crate::error::{RemoteError, RuntimeError, SpawnError};
use crate::port::context::PortContext;
use crate::port::dispatch::PortTask;
use crate::port::reference::PortShared;
use crate::port::{AgentRef, PortBuilder};
use crate::registry::{AgentRegistry, FaultLog};
use crate::remote::server::{self, ServerHandle};
use crate::remote::{Connector, RemotingRegistry, TcpConnector, WireRegistry};
use crate::router::{AnyChannel, Delivery, MulticastChannel, RemoteChannel, Router};
use crate::collab::{LogTraceSink, TokioScheduler};
use myna_api::agent::Agent;
use myna_api::errors::AgentError;
use myna_api::fault::Fault;
use myna_api::id::{AgentId, NodeId};
use myna_api::message::Message;
use myna_api::scheduler::{ScheduleHandle, Scheduler, TaskFn};
use myna_api::trace::{TraceEvent, TraceKind, TraceSink};
use myna_api::types::AgentResult;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Builder for a [`Runtime`], configuring the node and injecting
/// collaborator implementations.
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    trace: Option<Arc<dyn TraceSink>>,
    scheduler: Option<Arc<dyn Scheduler>>,
    connector: Option<Arc<dyn Connector>>,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
            trace: None,
            scheduler: None,
            connector: None,
        }
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn node_name(mut self, name: impl Into<String>) -> Self {
        self.config.node_name = name.into();
        self
    }

    pub fn pool_capacity(mut self, capacity: usize) -> Self {
        self.config.pool_capacity = capacity;
        self
    }

    pub fn connection_cache_capacity(mut self, capacity: usize) -> Self {
        self.config.connection_cache_capacity = capacity;
        self
    }

    pub fn ask_timeout(mut self, timeout: Duration) -> Self {
        self.config.ask_timeout = timeout;
        self
    }

    pub fn op_timeout(mut self, timeout: Duration) -> Self {
        self.config.op_timeout = timeout;
        self
    }

    pub fn trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace = Some(sink);
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Builds the runtime and starts its housekeeping job. Must run
    /// inside a tokio runtime.
    pub fn build(self) -> Runtime {
        let trace = self.trace.unwrap_or_else(|| Arc::new(LogTraceSink));
        let scheduler: Arc<dyn Scheduler> =
            self.scheduler.unwrap_or_else(|| Arc::new(TokioScheduler));
        let connector = self.connector.unwrap_or_else(|| Arc::new(TcpConnector));

        let node = NodeId::new(self.config.node_name.clone());
        let remoting = Arc::new(RemotingRegistry::new(
            self.config.connection_cache_capacity,
            self.config.op_timeout,
            connector,
            trace.clone(),
        ));

        let runtime = Runtime {
            core: Arc::new(RuntimeCore {
                registry: AgentRegistry::new(node, self.config.pool_capacity),
                remoting,
                wire: Arc::new(WireRegistry::new()),
                faults: Arc::new(FaultLog::new(256)),
                trace,
                scheduler,
                down: AtomicBool::new(false),
                housekeeping: Mutex::new(None),
                server: Mutex::new(None),
                config: self.config,
            }),
        };

        // Housekeeping: purge remote operations whose timeout elapsed
        // unacknowledged.
        let pending = runtime.core.remoting.pending_ops().clone();
        let interval = runtime.core.config.purge_interval;
        let handle = runtime.core.scheduler.schedule_repeating(
            interval,
            interval,
            Box::new(move || {
                let purged = pending.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, "purged expired remote operations");
                }
            }),
        );
        *runtime.core.housekeeping.lock().unwrap() = Some(handle);

        tracing::info!(node = %runtime.core.registry.node(), "runtime started");
        runtime
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) struct RuntimeCore {
    config: RuntimeConfig,
    registry: AgentRegistry,
    remoting: Arc<RemotingRegistry>,
    wire: Arc<WireRegistry>,
    faults: Arc<FaultLog>,
    trace: Arc<dyn TraceSink>,
    scheduler: Arc<dyn Scheduler>,
    down: AtomicBool,
    housekeeping: Mutex<Option<ScheduleHandle>>,
    server: Mutex<Option<Arc<ServerHandle>>>,
}

/// Handle to one node's runtime. Clones share the same core.
#[derive(Clone)]
pub struct Runtime {
    core: Arc<RuntimeCore>,
}

impl Runtime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    pub fn node_id(&self) -> &NodeId {
        self.core.registry.node()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.core.config
    }

    // --- Agent lifecycle ---

    /// Spawns the agent described by `builder` into its own port.
    /// Registration is synchronous: pool exhaustion fails here, not
    /// later.
    pub fn spawn<A: Agent>(&self, builder: PortBuilder<A>) -> Result<AgentRef, SpawnError> {
        if self.core.down.load(Ordering::SeqCst) {
            return Err(SpawnError::ShuttingDown);
        }
        let effective = self.core.config.merge_with_port_config(&builder.config);
        let id = self.core.registry.reserve()?;

        let (normal_tx, normal_rx) = flume::bounded(effective.queue_capacity);
        let (sync_tx, sync_rx) = flume::bounded(effective.queue_capacity);
        let (interrupt_tx, interrupt_rx) = flume::bounded(effective.interrupt_capacity);

        let shared = Arc::new(PortShared::new(
            id.clone(),
            builder.agent.kind(),
            effective.synchronous,
            effective.ask_timeout,
        ));
        let agent_ref = AgentRef {
            shared: shared.clone(),
            normal_tx,
            sync_tx,
            interrupt_tx,
        };
        self.core.registry.commit(&id, agent_ref.clone());

        let ctx = PortContext::new(self.clone(), agent_ref.clone());
        let task = PortTask::new(
            builder.agent,
            builder.handlers,
            ctx,
            normal_rx,
            sync_rx,
            interrupt_rx,
            shared.clone(),
            self.clone(),
        );
        shared.set_task(tokio::spawn(task.run()));

        self.trace(TraceEvent::new(
            TraceKind::Registered,
            Some(id),
            agent_ref.kind(),
        ));
        Ok(agent_ref)
    }

    /// Resolves a live local reference; `None` once the agent has shut
    /// down (never an error).
    pub fn agent(&self, id: &AgentId) -> Option<AgentRef> {
        self.core.registry.lookup(id)
    }

    pub fn agent_count(&self) -> usize {
        self.core.registry.len()
    }

    /// Links two mailboxes: each will receive the other's `Fault` or
    /// `Exit`. Symmetric for local ids; a remote peer records its half on
    /// its own node.
    pub fn link(&self, a: &AgentId, b: &AgentId) -> Result<(), RuntimeError> {
        let mut found = false;
        if let Some(agent) = self.core.registry.lookup(a) {
            agent.add_link(b);
            found = true;
        }
        if let Some(agent) = self.core.registry.lookup(b) {
            agent.add_link(a);
            found = true;
        }
        if !found {
            return Err(RuntimeError::AgentNotFound(a.clone()));
        }
        self.trace(TraceEvent::new(
            TraceKind::Linked,
            Some(a.clone()),
            b.to_string(),
        ));
        Ok(())
    }

    pub fn unlink(&self, a: &AgentId, b: &AgentId) -> Result<(), RuntimeError> {
        if let Some(agent) = self.core.registry.lookup(a) {
            agent.remove_link(b);
        }
        if let Some(agent) = self.core.registry.lookup(b) {
            agent.remove_link(a);
        }
        self.trace(TraceEvent::new(
            TraceKind::Unlinked,
            Some(a.clone()),
            b.to_string(),
        ));
        Ok(())
    }

    /// Gracefully stops an agent, jumping its queue of pending async
    /// work. `Some(fault)` propagates the fault to the agent's links.
    /// Killing an already-dead id is a no-op: shutdown is idempotent
    /// everywhere.
    pub async fn kill(&self, id: &AgentId, fault: Option<Fault>) -> Result<(), RuntimeError> {
        if let Some(agent) = self.core.registry.lookup(id) {
            agent.post_stop(fault).await;
        }
        Ok(())
    }

    /// Aborts an unresponsive agent's task outright, then runs the
    /// registry cleanup and Exit notification the task can no longer do
    /// itself.
    pub async fn force_kill(&self, id: &AgentId) -> Result<(), RuntimeError> {
        let Some(agent) = self.core.registry.remove(id) else {
            return Ok(());
        };
        agent.shared.close();
        agent.shared.abort_task();
        let links = agent.shared.take_links();
        let exit = myna_api::fault::Exit { agent: id.clone() };
        for peer in &links {
            if let Some(p) = self.core.registry.lookup(peer) {
                p.remove_link(id);
            }
            let _ = self.send(peer, exit.clone()).await;
        }
        agent.shared.mark_done();
        self.trace(TraceEvent::new(
            TraceKind::Unregistered,
            Some(id.clone()),
            "force-killed",
        ));
        Ok(())
    }

    /// Registry cleanup run by a port's own shutdown path.
    pub(crate) fn unregister(&self, id: &AgentId, peers: &[AgentId]) {
        self.core.registry.remove(id);
        for peer in peers {
            if let Some(p) = self.core.registry.lookup(peer) {
                p.remove_link(id);
            }
        }
        self.trace(TraceEvent::new(
            TraceKind::Unregistered,
            Some(id.clone()),
            "",
        ));
    }

    // --- Sending (location-transparent) ---

    pub fn router(&self) -> Router {
        Router::new(self.clone())
    }

    pub async fn send<M: Message>(&self, to: &AgentId, msg: M) -> Result<(), RuntimeError> {
        let channel = self.router().resolve(to, Delivery::Normal)?;
        self.trace_posted::<M>(to);
        channel.send(msg).await
    }

    pub async fn send_sync<M: Message>(&self, to: &AgentId, msg: M) -> AgentResult<M::Reply> {
        let channel = self
            .router()
            .resolve(to, Delivery::Synchronous)
            .map_err(runtime_to_agent)?;
        self.trace_posted::<M>(to);
        channel.request(msg).await
    }

    pub async fn request<M: Message>(&self, to: &AgentId, msg: M) -> AgentResult<M::Reply> {
        let channel = self
            .router()
            .resolve(to, Delivery::Normal)
            .map_err(runtime_to_agent)?;
        self.trace_posted::<M>(to);
        channel.request(msg).await
    }

    /// Interrupt delivery: jumps the destination's async queue. To a
    /// remote destination this degrades to normal-class wire delivery.
    pub async fn interrupt<M: Message>(&self, to: &AgentId, msg: M) -> Result<(), RuntimeError> {
        let channel = self.router().resolve(to, Delivery::Normal)?;
        self.trace_posted::<M>(to);
        match channel {
            AnyChannel::Local(channel) => Ok(channel.agent().interrupt(msg).await?),
            other => other.send(msg).await,
        }
    }

    fn trace_posted<M: Message>(&self, to: &AgentId) {
        self.trace(TraceEvent::new(
            TraceKind::Posted,
            Some(to.clone()),
            M::TAG.as_str(),
        ));
    }

    /// A remote channel to `to`, for callers that want a per-channel
    /// error handler.
    pub fn remote_channel(&self, to: &AgentId) -> Result<RemoteChannel, RuntimeError> {
        let endpoint = self
            .core
            .remoting
            .endpoint_of(to.node())
            .ok_or_else(|| RemoteError::UnknownNode(to.node().clone()))?;
        Ok(RemoteChannel::new(
            to.clone(),
            endpoint,
            self.core.remoting.clone(),
            self.core.wire.clone(),
        ))
    }

    /// Resolves every id and wraps the channels for broadcast.
    pub fn multicast(&self, ids: &[AgentId]) -> Result<MulticastChannel, RuntimeError> {
        let router = self.router();
        let channels = ids
            .iter()
            .map(|id| router.resolve(id, Delivery::Normal))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(MulticastChannel::new(channels))
    }

    // --- Remoting ---

    pub fn register_node(&self, node: NodeId, endpoint: SocketAddr) {
        self.core.remoting.register_node(node, endpoint);
    }

    pub async fn unregister_node(&self, node: &NodeId) {
        self.core.remoting.unregister_node(node).await;
    }

    /// Registers the wire codec for `M`, making it routable across nodes.
    pub fn register_wire<M>(&self)
    where
        M: Message + Serialize + DeserializeOwned,
    {
        self.core.wire.register::<M>();
    }

    /// Starts accepting wire sessions on `addr`.
    pub async fn listen(&self, addr: SocketAddr) -> Result<Arc<ServerHandle>, RemoteError> {
        let handle = Arc::new(server::listen(self.clone(), addr).await?);
        *self.core.server.lock().unwrap() = Some(handle.clone());
        Ok(handle)
    }

    pub fn remoting(&self) -> &RemotingRegistry {
        &self.core.remoting
    }

    pub(crate) fn remoting_arc(&self) -> Arc<RemotingRegistry> {
        self.core.remoting.clone()
    }

    pub(crate) fn wire_registry(&self) -> &WireRegistry {
        &self.core.wire
    }

    pub(crate) fn wire_registry_arc(&self) -> Arc<WireRegistry> {
        self.core.wire.clone()
    }

    // --- Services ---

    pub fn fault_log(&self) -> &FaultLog {
        &self.core.faults
    }

    pub fn schedule(&self, delay: Duration, task: TaskFn) -> ScheduleHandle {
        self.core.scheduler.schedule(delay, task)
    }

    pub fn schedule_repeating(
        &self,
        delay: Duration,
        period: Duration,
        task: TaskFn,
    ) -> ScheduleHandle {
        self.core.scheduler.schedule_repeating(delay, period, task)
    }

    pub(crate) fn trace(&self, event: TraceEvent) {
        self.core.trace.trace(&event);
    }

    /// Stops every port, the housekeeping job, the listener, and every
    /// cached connection. Idempotent.
    pub async fn shutdown(&self) {
        if self.core.down.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.core.housekeeping.lock().unwrap().take() {
            handle.cancel();
        }
        if let Some(server) = self.core.server.lock().unwrap().take() {
            server.shutdown();
        }
        for agent in self.core.registry.live_refs() {
            agent.post_stop(None).await;
        }
        self.core.remoting.close_all().await;
        tracing::info!(node = %self.core.registry.node(), "runtime shut down");
    }
}

fn runtime_to_agent(err: RuntimeError) -> AgentError {
    match err {
        RuntimeError::AgentNotFound(_) => AgentError::Stopped,
        other => AgentError::HandlingFailed(other.to_string()),
    }
}
