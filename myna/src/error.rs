use myna_api::id::{AgentId, IdParseError, NodeId};
use std::net::SocketAddr;
use thiserror::Error;

/// Errors related to mailbox queue operations.
#[derive(Error, Debug, Clone)]
pub enum MailboxError {
    #[error("mailbox is full (capacity: {capacity})")]
    Full { capacity: usize },
    #[error("mailbox is closed")]
    Closed,
    #[error("internal channel error: {0}")]
    ChannelError(String),
}

/// Errors related to spawning agents.
#[derive(Error, Debug, Clone)]
pub enum SpawnError {
    /// The agent registry is at its configured maximum.
    #[error("agent registry limit exceeded (capacity: {capacity})")]
    ResourceExhausted { capacity: usize },
    #[error("runtime is shutting down")]
    ShuttingDown,
    #[error("failed to start agent: {0}")]
    StartFailed(String),
}

/// Errors surfaced by runtime-level operations (routing, lookup, send).
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("agent {0} not found")]
    AgentNotFound(AgentId),
    #[error(transparent)]
    InvalidAgentId(#[from] IdParseError),
    #[error(transparent)]
    Mailbox(#[from] MailboxError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("runtime is shut down")]
    ShutDown,
}

/// Errors on the remoting path. Clonable so one transport failure can be
/// fanned out to every outstanding operation on the connection.
#[derive(Error, Debug, Clone)]
pub enum RemoteError {
    #[error("node '{0}' is not registered")]
    UnknownNode(NodeId),
    #[error("failed to connect to {0}: {1}")]
    ConnectFailed(SocketAddr, String),
    #[error("connection to {0} is closed")]
    LinkClosed(SocketAddr),
    #[error("remote delivery refused: {0}")]
    Refused(String),
    #[error("remote operation {0} timed out")]
    OpTimedOut(u64),
    #[error("no wire codec registered for tag '{0}'")]
    UnregisteredTag(String),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("codec failure: {0}")]
    Codec(String),
    #[error("i/o error: {0}")]
    Io(String),
}

/// Packet-level fault codes carried by the `0x07` wire record.
pub const PACKET_FAULT_INVALID_FORMAT: u8 = 0x01;
pub const PACKET_FAULT_UNEXPECTED_END: u8 = 0x02;

/// Errors raised while framing or unframing packets.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Unknown record id, out-of-range enum byte, or otherwise malformed
    /// input.
    #[error("invalid packet format: {0}")]
    InvalidFormat(String),
    /// The buffer ended mid-record.
    #[error("unexpected end of message")]
    UnexpectedEnd,
    /// A "via" URI longer than the 2-byte length prefix can carry. Never
    /// truncated, always rejected.
    #[error("via URI of {0} bytes exceeds the 65535-byte limit")]
    ViaTooLong(usize),
}

impl WireError {
    /// The fault code emitted on the wire for this error.
    pub fn fault_code(&self) -> u8 {
        match self {
            WireError::UnexpectedEnd => PACKET_FAULT_UNEXPECTED_END,
            _ => PACKET_FAULT_INVALID_FORMAT,
        }
    }
}

/// Errors returned by supervisor operations.
#[derive(Error, Debug, Clone)]
pub enum SupervisorError {
    #[error("a child named '{0}' already exists")]
    DuplicateChild(String),
    #[error("no child named '{0}'")]
    NoSuchChild(String),
    #[error("child '{0}' is still running")]
    ChildRunning(String),
    #[error("failed to start child '{0}': {1}")]
    StartFailed(String, String),
}
