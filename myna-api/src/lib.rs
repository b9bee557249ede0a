//! # Myna Agent Runtime API
//!
//! Myna is a distributed actor-model messaging runtime: independent agents
//! exchange typed messages through mailboxes, a routing layer resolves
//! destinations to local or remote channels, and supervision trees provide
//! fault isolation and automatic restart.
//!
//! This crate is the interface layer. It defines the core vocabulary shared
//! by the runtime engine and by application code:
//!
//! - **Identifiers**: globally unique, URI-shaped names for agent mailboxes
//! - **Messages**: the typed message contract and its stable dispatch tags
//! - **Agents**: the lifecycle trait implemented by application actors
//! - **Faults**: explicit, chainable fault values that replace thrown errors
//! - **Supervision**: restart modes and strategies bounding restart storms
//! - **Collaborators**: contracts for serialization, tracing, resource
//!   pooling, and scheduling that the engine consumes but does not own
//!
//! The runtime engine lives in the `myna` crate; nothing here spawns tasks
//! or opens sockets.
//!
//! ## Module Organization
//!
//! - [`agent`]: the `Agent` lifecycle trait
//! - [`id`]: node and agent identifiers
//! - [`message`]: the `Message` trait, tags, and message ids
//! - [`fault`]: `Fault` chains and `Exit` notifications
//! - [`supervision`]: restart modes, strategies, and child status
//! - [`errors`]: `AgentError` and `PoolError`
//! - [`codec`]: string-level serialization contract
//! - [`trace`]: fire-and-forget trace sink contract
//! - [`pool`]: resource pool contract used for identifier allocation
//! - [`scheduler`]: timer/scheduler contract with cancellable handles
//! - [`types`]: common type aliases

pub mod agent;
pub mod codec;
pub mod errors;
pub mod fault;
pub mod id;
pub mod message;
pub mod pool;
pub mod scheduler;
pub mod supervision;
pub mod trace;
pub mod types;

pub use agent::Agent;
pub use errors::{AgentError, PoolError};
pub use fault::{Exit, Fault};
pub use id::{AgentId, IdParseError, NodeId};
pub use message::{Message, MessageId, MessageTag};
pub use supervision::{ChildStatus, RestartMode, RestartStrategy, SupervisionMode};
pub use types::{AgentResult, BoxedFuture, BoxedMessage};
