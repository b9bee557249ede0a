//! Fault and exit notifications.
//!
//! A fault is data, not a thrown exception: when a handler fails, the
//! engine converts the error into a [`Fault`] value and sends it to every
//! linked mailbox. Faults chain: a supervisor escalating a child crash
//! wraps the child's fault as its own cause, preserving causal history
//! across supervision layers. Both `Fault` and [`Exit`] serialize, so they
//! cross the wire to remote links unchanged.

use crate::id::AgentId;
use crate::message::{Message, MessageTag};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Immutable description of one mailbox failure, with its causal chain.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Fault {
    /// The agent whose handler failed.
    pub agent: AgentId,
    /// Type name of the failing agent.
    pub kind: String,
    /// Tag of the message being processed when the failure happened, if any.
    pub tag: Option<String>,
    /// Human-readable error description.
    pub error: String,
    /// The prior fault this one escalates, if any.
    pub cause: Option<Box<Fault>>,
}

impl Fault {
    pub fn new(
        agent: AgentId,
        kind: impl Into<String>,
        tag: Option<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            agent,
            kind: kind.into(),
            tag,
            error: error.into(),
            cause: None,
        }
    }

    /// Chains `cause` underneath this fault.
    pub fn caused_by(mut self, cause: Fault) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Walks the chain outermost-first.
    pub fn chain(&self) -> impl Iterator<Item = &Fault> {
        std::iter::successors(Some(self), |f| f.cause.as_deref())
    }

    /// Number of faults in the chain, including this one.
    pub fn depth(&self) -> usize {
        self.chain().count()
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fault in {} ({})", self.agent, self.kind)?;
        if let Some(tag) = &self.tag {
            write!(f, " while handling '{}'", tag)?;
        }
        write!(f, ": {}", self.error)?;
        if let Some(cause) = &self.cause {
            write!(f, "; caused by: {}", cause)?;
        }
        Ok(())
    }
}

impl Message for Fault {
    type Reply = ();

    const TAG: MessageTag = MessageTag("myna/fault");
}

/// Clean-stop notification delivered to linked mailboxes, carrying the id
/// of the agent that stopped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exit {
    pub agent: AgentId,
}

impl Message for Exit {
    type Reply = ();

    const TAG: MessageTag = MessageTag("myna/exit");
}
