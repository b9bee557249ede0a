//! Node and agent identifiers.
//!
//! Every mailbox in a Myna deployment is named by an [`AgentId`]: the id of
//! the node hosting it plus a numeric key allocated by that node's resource
//! pool. Ids render as `agent://<node>/<key>` and round-trip through
//! `Display`/`FromStr`, which is what lets them cross the wire as plain
//! strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The node authority part of an agent identifier.
///
/// A node is one runtime instance; remote routing consults the registered
/// node map to decide whether a destination is local or reachable over TCP.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

/// Globally unique identifier of one agent mailbox.
///
/// Created when the agent is registered into its runtime's registry and
/// gone after unregistration; looking up a dead id yields "not found"
/// rather than an error.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId {
    node: NodeId,
    key: u64,
}

impl AgentId {
    pub fn new(node: NodeId, key: u64) -> Self {
        Self { node, key }
    }

    /// The node hosting this agent's mailbox.
    pub fn node(&self) -> &NodeId {
        &self.node
    }

    /// The pool-allocated key, unique within the node for the lifetime of
    /// its runtime (keys are never reused).
    pub fn key(&self) -> u64 {
        self.key
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "agent://{}/{}", self.node, self.key)
    }
}

/// Failure to parse an `agent://` URI.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid agent id '{0}'")]
pub struct IdParseError(pub String);

impl FromStr for AgentId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix("agent://")
            .ok_or_else(|| IdParseError(s.to_string()))?;
        let (node, key) = rest
            .rsplit_once('/')
            .ok_or_else(|| IdParseError(s.to_string()))?;
        if node.is_empty() {
            return Err(IdParseError(s.to_string()));
        }
        let key = key.parse::<u64>().map_err(|_| IdParseError(s.to_string()))?;
        Ok(AgentId::new(NodeId::new(node), key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_round_trip() {
        let id = AgentId::new(NodeId::new("alpha"), 42);
        let rendered = id.to_string();
        assert_eq!(rendered, "agent://alpha/42");
        assert_eq!(rendered.parse::<AgentId>().unwrap(), id);
    }

    #[test]
    fn rejects_malformed() {
        assert!("agent:/alpha/1".parse::<AgentId>().is_err());
        assert!("agent://alpha".parse::<AgentId>().is_err());
        assert!("agent:///7".parse::<AgentId>().is_err());
        assert!("agent://alpha/seven".parse::<AgentId>().is_err());
    }
}
