//! Error types shared between the interface layer and the engine.
//!
//! `AgentError` is what handlers return; the engine converts a non-`Ok`
//! outcome into a `Fault` value and runs the mailbox shutdown path, so an
//! error here never unwinds through the dispatch loop.

use thiserror::Error;

/// Error type returned by agent handlers and lifecycle hooks.
#[derive(Error, Debug)]
pub enum AgentError {
    /// The agent's `setup` hook failed; the mailbox never dispatched a
    /// message.
    #[error("agent setup failed: {0}")]
    SetupFailed(String),

    /// A handler could not process its message.
    #[error("message handling failed: {0}")]
    HandlingFailed(String),

    /// The destination mailbox has shut down.
    #[error("agent stopped")]
    Stopped,

    /// A synchronous send was addressed to the sender's own mailbox, which
    /// can never complete.
    #[error("synchronous send to own mailbox would deadlock")]
    WouldDeadlock,

    /// The reply channel was dropped before a reply arrived, typically
    /// because the destination shut down mid-request.
    #[error("reply channel closed before a reply arrived")]
    ReplyDropped,

    /// A reply payload did not match the reply type declared for the tag.
    #[error("reply type mismatch for message tag '{0}'")]
    ReplyMismatch(&'static str),

    /// The operation did not complete within its timeout.
    #[error("timeout")]
    Timeout,

    /// Catch-all preserving the original error context through source
    /// chaining.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors raised by a resource pool.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The pool is at its configured maximum; signaled synchronously to
    /// the caller of `add`, never silently dropped.
    #[error("resource pool limit exceeded (capacity: {capacity})")]
    LimitExceeded { capacity: usize },
}
