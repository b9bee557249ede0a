//! Supervision policy types.
//!
//! A supervisor owns an ordered set of child specifications and a restart
//! strategy. The strategy bounds restart storms (max restarts within a
//! sliding window) and decides whether a child failure affects only that
//! child or every sibling; the per-child restart mode decides whether a
//! given exit kind warrants a restart at all.

use crate::id::AgentId;
use std::time::Duration;

/// Per-child restart policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestartMode {
    /// Restarted unconditionally, whether it stopped cleanly or crashed.
    Permanent,
    /// Restarted only after a fault; a clean stop is final.
    Transient,
    /// Never restarted; its specification is removed once it stops, on
    /// fault and on clean stop alike.
    Temporary,
}

impl RestartMode {
    /// Whether a child with this mode should be restarted after the given
    /// exit kind (`faulted` = crashed, otherwise clean stop).
    pub fn restarts_after(&self, faulted: bool) -> bool {
        match self {
            RestartMode::Permanent => true,
            RestartMode::Transient => faulted,
            RestartMode::Temporary => false,
        }
    }
}

/// Sibling scope of a restart.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SupervisionMode {
    /// Only the failed child is acted on.
    OneForOne,
    /// Every running child is stopped, then every eligible spec restarted.
    OneForAll,
}

/// Restart strategy owned by one supervisor.
#[derive(Clone, Copy, Debug)]
pub struct RestartStrategy {
    pub mode: SupervisionMode,
    /// Maximum restart-eligible exits tolerated within `within` before the
    /// supervisor gives up and shuts itself down.
    pub max_restarts: u32,
    /// Width of the sliding restart-counting window.
    pub within: Duration,
}

impl RestartStrategy {
    pub fn one_for_one(max_restarts: u32, within: Duration) -> Self {
        Self {
            mode: SupervisionMode::OneForOne,
            max_restarts,
            within,
        }
    }

    pub fn one_for_all(max_restarts: u32, within: Duration) -> Self {
        Self {
            mode: SupervisionMode::OneForAll,
            max_restarts,
            within,
        }
    }
}

impl Default for RestartStrategy {
    fn default() -> Self {
        Self::one_for_one(3, Duration::from_secs(10))
    }
}

/// Snapshot of one supervised child, as reported by `GetAllChildren`.
#[derive(Clone, Debug)]
pub struct ChildStatus {
    pub name: String,
    pub restart: RestartMode,
    /// Live mailbox id while the child runs, `None` otherwise.
    pub id: Option<AgentId>,
}
