//! Resource pool contract.
//!
//! The engine allocates mailbox identifiers out of a pool: `add` hands
//! back a fresh numeric id, `get` resolves a live id, `delete` releases
//! it. Ids are never reused within one pool instance, which is what makes
//! a dead `AgentId` permanently dead.

use crate::errors::PoolError;

/// Bounded id-keyed store of live resources.
pub trait ResourcePool<T: Clone + Send + 'static>: Send + Sync + 'static {
    /// Stores `resource` and returns its freshly allocated id. Raises
    /// `PoolError::LimitExceeded` at the configured maximum.
    fn add(&self, resource: T) -> Result<u64, PoolError>;

    /// Resolves a live id; `None` for ids never allocated or already
    /// deleted.
    fn get(&self, id: u64) -> Option<T>;

    /// Releases an id, returning the resource it held.
    fn delete(&self, id: u64) -> Option<T>;

    /// Number of live entries.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
