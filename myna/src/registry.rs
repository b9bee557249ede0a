//! Per-runtime agent registry and fault log.
//!
//! Both are constructor-injected services owned by one `RuntimeCore`,
//! never ambient statics, so independent runtimes coexist in one process
//! (and in one test).

use crate::collab::MemoryPool;
use crate::error::SpawnError;
use crate::port::AgentRef;
use myna_api::errors::PoolError;
use myna_api::fault::Fault;
use myna_api::id::{AgentId, NodeId};
use myna_api::pool::ResourcePool;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Name-to-mailbox registry of one runtime. Identifier allocation is
/// delegated to the resource pool; keys are never reused, so a dead
/// `AgentId` stays dead.
pub(crate) struct AgentRegistry {
    node: NodeId,
    pool: MemoryPool<AgentRef>,
}

impl AgentRegistry {
    pub fn new(node: NodeId, capacity: usize) -> Self {
        Self {
            node,
            pool: MemoryPool::new(capacity),
        }
    }

    pub fn node(&self) -> &NodeId {
        &self.node
    }

    /// Allocates the id for a port about to be built. Pool exhaustion
    /// surfaces synchronously to the caller of spawn.
    pub fn reserve(&self) -> Result<AgentId, SpawnError> {
        match self.pool.reserve() {
            Ok(key) => Ok(AgentId::new(self.node.clone(), key)),
            Err(PoolError::LimitExceeded { capacity }) => {
                Err(SpawnError::ResourceExhausted { capacity })
            }
        }
    }

    /// Stores the built reference behind its reserved id.
    pub fn commit(&self, id: &AgentId, agent: AgentRef) {
        self.pool.fill(id.key(), agent);
    }

    /// Resolves a live local reference. `None` for remote ids, for ids
    /// never registered, and for ports that have shut down.
    pub fn lookup(&self, id: &AgentId) -> Option<AgentRef> {
        if id.node() != &self.node {
            return None;
        }
        self.pool.get(id.key()).filter(|r| !r.is_closed())
    }

    pub fn remove(&self, id: &AgentId) -> Option<AgentRef> {
        if id.node() != &self.node {
            return None;
        }
        self.pool.delete(id.key())
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    /// Snapshot of every live reference, for runtime shutdown.
    pub fn live_refs(&self) -> Vec<AgentRef> {
        self.pool.values()
    }
}

/// Bounded, front-evicting record of every fault registered by a port
/// shutdown on this runtime.
pub struct FaultLog {
    capacity: usize,
    inner: Mutex<VecDeque<Fault>>,
}

impl FaultLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, fault: Fault) {
        let mut log = self.inner.lock().unwrap();
        if log.len() == self.capacity {
            log.pop_front();
        }
        log.push_back(fault);
    }

    /// Most recent faults, oldest first.
    pub fn recent(&self) -> Vec<Fault> {
        self.inner.lock().unwrap().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
