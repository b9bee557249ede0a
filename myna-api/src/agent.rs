//! The agent lifecycle trait.

use crate::types::AgentResult;
use async_trait::async_trait;

/// One logical actor: owned by exactly one mailbox, processing one message
/// at a time.
///
/// Message handling itself is declared per message type through the
/// engine's `Handler<M>` trait; this trait only carries the lifecycle
/// hooks common to every agent.
#[async_trait]
pub trait Agent: Send + 'static {
    /// Runs before the first message is dispatched. A failed setup faults
    /// the mailbox exactly like a failed handler would.
    async fn setup(&mut self) -> AgentResult<()> {
        Ok(())
    }

    /// Runs during teardown, after the last message. Best effort: the
    /// mailbox is already closed and errors here cannot fault it again.
    async fn on_stop(&mut self) {}

    /// Type name recorded in faults and trace events.
    fn kind(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}
