// Myna agent runtime.
//
// This crate provides the engine behind the `myna-api` contracts: agent
// ports with prioritized mailboxes and tag dispatch, supervision trees,
// location-transparent routing, and wire remoting between nodes.

pub mod collab;
pub mod config;
pub mod error;
pub mod logging;
pub mod port;
pub mod registry;
pub mod remote;
pub mod router;
pub mod runtime;
pub mod supervisor;
pub mod wire;

// Re-export commonly used types
pub use collab::{JsonCodec, LogTraceSink, MemoryPool, TokioScheduler};
pub use config::{PortConfig, RuntimeConfig};
pub use error::{
    MailboxError, RemoteError, RuntimeError, SpawnError, SupervisorError, WireError,
};
pub use port::{AgentRef, Handler, PortBuilder, PortContext};
pub use registry::FaultLog;
pub use remote::{
    Connector, LinkContext, OpWindow, PendingOps, RemoteLink, ServerHandle, TcpConnector,
    WireRegistry,
};
pub use router::{AnyChannel, Delivery, MulticastChannel, RemoteChannel, Router};
pub use runtime::{Runtime, RuntimeBuilder};
pub use supervisor::{
    spawn_supervisor, ChildSpec, DeleteChild, GetAllChildren, GetChildId, RestartChild,
    StartChild, StartFn, StopChild, Supervisor,
};

// The API crate's surface, re-exported so most applications depend on
// `myna` alone.
pub use myna_api::agent::Agent;
pub use myna_api::errors::AgentError;
pub use myna_api::fault::{Exit, Fault};
pub use myna_api::id::{AgentId, NodeId};
pub use myna_api::message::{Message, MessageTag};
pub use myna_api::supervision::{ChildStatus, RestartMode, RestartStrategy, SupervisionMode};
pub use myna_api::trace::{NullTraceSink, TraceEvent, TraceKind, TraceSink};
pub use myna_api::types::AgentResult;
