//! Timer/scheduler contract.
//!
//! Used by the engine for supervisor shutdown waits and housekeeping jobs
//! such as purging timed-out remote operations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Callback run by a scheduled job.
pub type TaskFn = Box<dyn FnMut() + Send + 'static>;

/// Cancellation handle for a scheduled job.
///
/// Cancellation is cooperative: the flag is checked immediately before
/// each callback run, so a job cancelled mid-sleep never fires again but
/// a callback already executing runs to completion.
#[derive(Clone, Debug, Default)]
pub struct ScheduleHandle {
    cancelled: Arc<AtomicBool>,
}

impl ScheduleHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Deferred and repeating execution of callbacks.
pub trait Scheduler: Send + Sync + 'static {
    /// Runs `task` once after `delay`, unless the handle is cancelled
    /// first.
    fn schedule(&self, delay: Duration, task: TaskFn) -> ScheduleHandle;

    /// Runs `task` after `delay` and then every `period` until the handle
    /// is cancelled.
    fn schedule_repeating(&self, delay: Duration, period: Duration, task: TaskFn)
        -> ScheduleHandle;
}
