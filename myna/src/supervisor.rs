//! Supervision trees.
//!
//! A supervisor is itself an agent: it holds an ordered list of child
//! specifications, links itself to every child it starts, and reacts to
//! their `Fault` and `Exit` notifications through ordinary handlers. Its
//! control surface (start, stop, delete, restart, introspection) is
//! ordinary messages too, so it serializes naturally with the restart
//! logic.

use crate::error::{SpawnError, SupervisorError};
use crate::port::{AgentRef, Handler, PortBuilder, PortContext};
use crate::runtime::Runtime;
use async_trait::async_trait;
use myna_api::agent::Agent;
use myna_api::fault::{Exit, Fault};
use myna_api::id::AgentId;
use myna_api::message::{Message, MessageTag};
use myna_api::supervision::{ChildStatus, RestartMode, RestartStrategy, SupervisionMode};
use myna_api::types::AgentResult;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How to (re)create one supervised child.
pub type StartFn = Arc<dyn Fn(&Runtime) -> Result<AgentRef, SpawnError> + Send + Sync>;

/// Specification of one supervised child.
#[derive(Clone)]
pub struct ChildSpec {
    /// Stable name, unique within the supervisor. Restarts keep the name;
    /// the mailbox id is fresh every incarnation.
    pub name: String,
    pub restart: RestartMode,
    /// How long a graceful stop may take before the child is killed
    /// forcibly.
    pub shutdown_timeout: Duration,
    pub start: StartFn,
}

impl ChildSpec {
    pub fn new(name: impl Into<String>, restart: RestartMode, start: StartFn) -> Self {
        Self {
            name: name.into(),
            restart,
            shutdown_timeout: Duration::from_secs(5),
            start,
        }
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

// --- Control messages ---

pub struct StartChild(pub ChildSpec);

impl Message for StartChild {
    type Reply = Result<AgentId, SupervisorError>;

    const TAG: MessageTag = MessageTag("myna/sup/start-child");
}

pub struct StopChild {
    pub name: String,
}

impl Message for StopChild {
    type Reply = Result<(), SupervisorError>;

    const TAG: MessageTag = MessageTag("myna/sup/stop-child");
}

/// Removes a stopped child's specification. Fails while the child runs.
pub struct DeleteChild {
    pub name: String,
}

impl Message for DeleteChild {
    type Reply = Result<(), SupervisorError>;

    const TAG: MessageTag = MessageTag("myna/sup/delete-child");
}

/// Administrative restart: stop if running, then start a fresh
/// incarnation. Does not count against the restart strategy.
pub struct RestartChild {
    pub name: String,
}

impl Message for RestartChild {
    type Reply = Result<AgentId, SupervisorError>;

    const TAG: MessageTag = MessageTag("myna/sup/restart-child");
}

pub struct GetChildId {
    pub name: String,
}

impl Message for GetChildId {
    type Reply = Option<AgentId>;

    const TAG: MessageTag = MessageTag("myna/sup/get-child-id");
}

pub struct GetAllChildren;

impl Message for GetAllChildren {
    type Reply = Vec<ChildStatus>;

    const TAG: MessageTag = MessageTag("myna/sup/get-all-children");
}

// --- The supervisor agent ---

enum ChildState {
    Unstarted,
    Running(AgentRef),
    /// Stopped administratively; the coming exit notification must not
    /// trigger a restart.
    Terminating(AgentRef),
    Stopped,
}

impl ChildState {
    fn running_ref(&self) -> Option<&AgentRef> {
        match self {
            ChildState::Running(r) => Some(r),
            _ => None,
        }
    }

    fn live_ref(&self) -> Option<&AgentRef> {
        match self {
            ChildState::Running(r) | ChildState::Terminating(r) => Some(r),
            _ => None,
        }
    }
}

struct ChildEntry {
    spec: ChildSpec,
    state: ChildState,
}

/// Supervisor agent. Spawn through [`spawn_supervisor`], which registers
/// its handlers and starts the initial children.
pub struct Supervisor {
    strategy: RestartStrategy,
    children: Vec<ChildEntry>,
    restarts: u32,
    window_start: Instant,
}

impl Supervisor {
    pub fn new(strategy: RestartStrategy) -> Self {
        Self {
            strategy,
            children: Vec::new(),
            restarts: 0,
            window_start: Instant::now(),
        }
    }

    fn index_of_name(&self, name: &str) -> Option<usize> {
        self.children.iter().position(|c| c.spec.name == name)
    }

    fn index_of_id(&self, id: &AgentId) -> Option<usize> {
        self.children
            .iter()
            .position(|c| c.state.live_ref().is_some_and(|r| r.id() == id))
    }

    /// Starts the child at `index` and links the supervisor to it.
    fn start_child(&mut self, index: usize, ctx: &PortContext) -> Result<AgentId, SupervisorError> {
        let entry = &mut self.children[index];
        let child = (entry.spec.start)(ctx.runtime()).map_err(|err| {
            SupervisorError::StartFailed(entry.spec.name.clone(), err.to_string())
        })?;
        let id = child.id().clone();
        entry.state = ChildState::Running(child);
        ctx.link(&id).map_err(|err| {
            SupervisorError::StartFailed(entry.spec.name.clone(), err.to_string())
        })?;
        tracing::debug!(supervisor = %ctx.id(), child = %self.children[index].spec.name, %id, "child started");
        Ok(id)
    }

    /// Stops the child at `index` gracefully, force-killing it if it
    /// misses its shutdown timeout. Marks the entry `Terminating` so the
    /// resulting exit notification is recognized as administrative.
    async fn stop_child(&mut self, index: usize, ctx: &PortContext) {
        let entry = &mut self.children[index];
        let Some(child) = entry.state.running_ref().cloned() else {
            return;
        };
        entry.state = ChildState::Terminating(child.clone());

        let _ = ctx.runtime().kill(child.id(), None).await;
        let timeout = entry.spec.shutdown_timeout;
        if !child.wait_done(timeout).await {
            tracing::warn!(child = %child.id(), "graceful stop timed out, force-killing");
            let _ = ctx.runtime().force_kill(child.id()).await;
        }
    }

    /// Reacts to a child's termination. `fault` is `Some` for a crash,
    /// `None` for a clean stop.
    async fn on_child_down(&mut self, id: &AgentId, fault: Option<Fault>, ctx: &mut PortContext) {
        let Some(index) = self.index_of_id(id) else {
            // A stale notification for an incarnation already replaced.
            return;
        };

        let administrative = matches!(self.children[index].state, ChildState::Terminating(_));
        if administrative {
            if self.children[index].spec.restart == RestartMode::Temporary {
                self.children.remove(index);
            } else {
                self.children[index].state = ChildState::Stopped;
            }
            return;
        }

        let name = self.children[index].spec.name.clone();
        let faulted = fault.is_some();
        tracing::debug!(supervisor = %ctx.id(), child = %name, faulted, "child down");

        if self.children[index].spec.restart == RestartMode::Temporary {
            self.children.remove(index);
            return;
        }
        if !self.children[index].spec.restart.restarts_after(faulted) {
            self.children[index].state = ChildState::Stopped;
            return;
        }

        if self.window_start.elapsed() > self.strategy.within {
            self.restarts = 0;
            self.window_start = Instant::now();
        }
        self.restarts += 1;
        if self.restarts > self.strategy.max_restarts {
            self.give_up(fault, ctx).await;
            return;
        }

        self.children[index].state = ChildState::Stopped;
        match self.strategy.mode {
            SupervisionMode::OneForOne => {
                if let Err(err) = self.start_child(index, ctx) {
                    tracing::warn!(child = %name, %err, "restart failed");
                }
            }
            SupervisionMode::OneForAll => self.restart_all(faulted, ctx).await,
        }
    }

    /// One-for-all sweep: stop every running sibling, then restart every
    /// eligible specification in declaration order.
    async fn restart_all(&mut self, faulted: bool, ctx: &mut PortContext) {
        for index in 0..self.children.len() {
            self.stop_child(index, ctx).await;
        }
        let mut index = 0;
        while index < self.children.len() {
            let restart = self.children[index].spec.restart;
            if restart == RestartMode::Temporary {
                self.children.remove(index);
                continue;
            }
            if restart.restarts_after(faulted) {
                let name = self.children[index].spec.name.clone();
                if let Err(err) = self.start_child(index, ctx) {
                    tracing::warn!(child = %name, %err, "restart failed");
                    self.children[index].state = ChildState::Stopped;
                }
            } else {
                self.children[index].state = ChildState::Stopped;
            }
            index += 1;
        }
    }

    /// Restart limit exceeded: stop everything and escalate by faulting
    /// out, chaining the triggering child fault as the cause.
    async fn give_up(&mut self, cause: Option<Fault>, ctx: &mut PortContext) {
        tracing::warn!(supervisor = %ctx.id(), restarts = self.restarts, "restart limit exceeded, shutting down");
        for index in 0..self.children.len() {
            self.stop_child(index, ctx).await;
        }
        let mut fault = Fault::new(
            ctx.id().clone(),
            "Supervisor",
            None,
            format!(
                "restart limit exceeded: {} restarts within {:?}",
                self.restarts, self.strategy.within
            ),
        );
        if let Some(cause) = cause {
            fault = fault.caused_by(cause);
        }
        ctx.stop_self(Some(fault));
    }
}

impl Agent for Supervisor {
    fn kind(&self) -> &'static str {
        "Supervisor"
    }
}

#[async_trait]
impl Handler<StartChild> for Supervisor {
    async fn handle(
        &mut self,
        msg: StartChild,
        ctx: &mut PortContext,
    ) -> AgentResult<Result<AgentId, SupervisorError>> {
        let spec = msg.0;
        if self.index_of_name(&spec.name).is_some() {
            return Ok(Err(SupervisorError::DuplicateChild(spec.name)));
        }
        self.children.push(ChildEntry {
            spec,
            state: ChildState::Unstarted,
        });
        Ok(self.start_child(self.children.len() - 1, ctx))
    }
}

#[async_trait]
impl Handler<StopChild> for Supervisor {
    async fn handle(
        &mut self,
        msg: StopChild,
        ctx: &mut PortContext,
    ) -> AgentResult<Result<(), SupervisorError>> {
        let Some(index) = self.index_of_name(&msg.name) else {
            return Ok(Err(SupervisorError::NoSuchChild(msg.name)));
        };
        self.stop_child(index, ctx).await;
        Ok(Ok(()))
    }
}

#[async_trait]
impl Handler<DeleteChild> for Supervisor {
    async fn handle(
        &mut self,
        msg: DeleteChild,
        _ctx: &mut PortContext,
    ) -> AgentResult<Result<(), SupervisorError>> {
        let Some(index) = self.index_of_name(&msg.name) else {
            return Ok(Err(SupervisorError::NoSuchChild(msg.name)));
        };
        if self.children[index].state.live_ref().is_some() {
            return Ok(Err(SupervisorError::ChildRunning(msg.name)));
        }
        self.children.remove(index);
        Ok(Ok(()))
    }
}

#[async_trait]
impl Handler<RestartChild> for Supervisor {
    async fn handle(
        &mut self,
        msg: RestartChild,
        ctx: &mut PortContext,
    ) -> AgentResult<Result<AgentId, SupervisorError>> {
        let Some(index) = self.index_of_name(&msg.name) else {
            return Ok(Err(SupervisorError::NoSuchChild(msg.name)));
        };
        self.stop_child(index, ctx).await;
        Ok(self.start_child(index, ctx))
    }
}

#[async_trait]
impl Handler<GetChildId> for Supervisor {
    async fn handle(
        &mut self,
        msg: GetChildId,
        _ctx: &mut PortContext,
    ) -> AgentResult<Option<AgentId>> {
        Ok(self
            .index_of_name(&msg.name)
            .and_then(|i| self.children[i].state.running_ref())
            .map(|r| r.id().clone()))
    }
}

#[async_trait]
impl Handler<GetAllChildren> for Supervisor {
    async fn handle(
        &mut self,
        _msg: GetAllChildren,
        _ctx: &mut PortContext,
    ) -> AgentResult<Vec<ChildStatus>> {
        Ok(self
            .children
            .iter()
            .map(|c| ChildStatus {
                name: c.spec.name.clone(),
                restart: c.spec.restart,
                id: c.state.running_ref().map(|r| r.id().clone()),
            })
            .collect())
    }
}

#[async_trait]
impl Handler<Fault> for Supervisor {
    async fn handle(&mut self, fault: Fault, ctx: &mut PortContext) -> AgentResult<()> {
        let id = fault.agent.clone();
        self.on_child_down(&id, Some(fault), ctx).await;
        Ok(())
    }
}

#[async_trait]
impl Handler<Exit> for Supervisor {
    async fn handle(&mut self, exit: Exit, ctx: &mut PortContext) -> AgentResult<()> {
        self.on_child_down(&exit.agent, None, ctx).await;
        Ok(())
    }
}

/// Spawns a supervisor with `strategy` and starts `specs` in order.
/// A child that fails to start fails the whole call.
pub async fn spawn_supervisor(
    runtime: &Runtime,
    strategy: RestartStrategy,
    specs: Vec<ChildSpec>,
) -> Result<AgentRef, SpawnError> {
    let supervisor = runtime.spawn(
        PortBuilder::new(Supervisor::new(strategy))
            .handle::<StartChild>()
            .handle::<StopChild>()
            .handle::<DeleteChild>()
            .handle::<RestartChild>()
            .handle::<GetChildId>()
            .handle::<GetAllChildren>()
            .handle::<Fault>()
            .handle::<Exit>(),
    )?;

    for spec in specs {
        let name = spec.name.clone();
        match supervisor.post_sync(StartChild(spec)).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                let _ = runtime.kill(supervisor.id(), None).await;
                return Err(SpawnError::StartFailed(format!("child '{name}': {err}")));
            }
            Err(err) => {
                let _ = runtime.kill(supervisor.id(), None).await;
                return Err(SpawnError::StartFailed(format!("child '{name}': {err}")));
            }
        }
    }
    Ok(supervisor)
}
