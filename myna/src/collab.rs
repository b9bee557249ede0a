//! Default collaborator implementations.
//!
//! The engine consumes the collaborator contracts from `myna-api` but does
//! not insist on any particular implementation; these are the defaults a
//! `RuntimeBuilder` installs when the caller injects nothing else.

use myna_api::errors::PoolError;
use myna_api::pool::ResourcePool;
use myna_api::scheduler::{ScheduleHandle, Scheduler, TaskFn};
use myna_api::trace::{TraceEvent, TraceSink};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

// --- Codec ---

/// `serde_json`-backed codec. Left inverse of itself for every type that
/// round-trips through serde, which covers every wire-registered message.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl myna_api::codec::Codec for JsonCodec {
    type Error = serde_json::Error;

    fn serialize<T: serde::Serialize>(&self, value: &T) -> Result<String, Self::Error> {
        serde_json::to_string(value)
    }

    fn deserialize<T: serde::de::DeserializeOwned>(&self, text: &str) -> Result<T, Self::Error> {
        serde_json::from_str(text)
    }
}

// --- Trace sink ---

/// Trace sink that forwards events to the `tracing` subscriber at DEBUG
/// level. Never blocks and never fails.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogTraceSink;

impl TraceSink for LogTraceSink {
    fn trace(&self, event: &TraceEvent) {
        match &event.agent {
            Some(agent) => {
                tracing::debug!(kind = ?event.kind, agent = %agent, detail = %event.detail, "trace")
            }
            None => tracing::debug!(kind = ?event.kind, detail = %event.detail, "trace"),
        }
    }
}

// --- Resource pool ---

/// In-memory bounded resource pool with monotonically increasing ids.
///
/// Ids are never reused within one pool instance, so a deleted id stays
/// dead for the lifetime of the runtime that owns the pool.
#[derive(Debug)]
pub struct MemoryPool<T> {
    capacity: usize,
    next_id: AtomicU64,
    entries: Mutex<HashMap<u64, Option<T>>>,
}

impl<T: Clone + Send + 'static> MemoryPool<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            next_id: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Allocates an id without a resource, counted against capacity, so a
    /// resource that embeds its own id can be built before [`fill`]
    /// stores it. A reserved-but-unfilled id resolves to `None`.
    ///
    /// [`fill`]: Self::fill
    pub fn reserve(&self) -> Result<u64, PoolError> {
        let mut entries = self.entries.lock().unwrap();
        if entries.len() >= self.capacity {
            return Err(PoolError::LimitExceeded {
                capacity: self.capacity,
            });
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        entries.insert(id, None);
        Ok(id)
    }

    /// Stores the resource behind a previously reserved id.
    pub fn fill(&self, id: u64, resource: T) {
        if let Some(slot) = self.entries.lock().unwrap().get_mut(&id) {
            *slot = Some(resource);
        }
    }

    /// Snapshot of every filled entry.
    pub fn values(&self) -> Vec<T> {
        self.entries
            .lock()
            .unwrap()
            .values()
            .filter_map(Clone::clone)
            .collect()
    }
}

impl<T: Clone + Send + 'static> ResourcePool<T> for MemoryPool<T> {
    fn add(&self, resource: T) -> Result<u64, PoolError> {
        let id = self.reserve()?;
        self.fill(id, resource);
        Ok(id)
    }

    fn get(&self, id: u64) -> Option<T> {
        self.entries.lock().unwrap().get(&id).and_then(Clone::clone)
    }

    fn delete(&self, id: u64) -> Option<T> {
        self.entries.lock().unwrap().remove(&id).flatten()
    }

    fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

// --- Scheduler ---

/// Scheduler backed by tokio timers.
///
/// The cancel flag is checked immediately before each callback run, never
/// during one.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, mut task: TaskFn) -> ScheduleHandle {
        let handle = ScheduleHandle::new();
        let flag = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !flag.is_cancelled() {
                task();
            }
        });
        handle
    }

    fn schedule_repeating(
        &self,
        delay: Duration,
        period: Duration,
        mut task: TaskFn,
    ) -> ScheduleHandle {
        let handle = ScheduleHandle::new();
        let flag = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            loop {
                if flag.is_cancelled() {
                    return;
                }
                task();
                tokio::time::sleep(period).await;
            }
        });
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use myna_api::codec::Codec;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn pool_allocates_fresh_ids_and_enforces_capacity() {
        let pool = MemoryPool::new(2);
        let a = pool.add("a").unwrap();
        let b = pool.add("b").unwrap();
        assert_ne!(a, b);
        assert!(matches!(
            pool.add("c"),
            Err(PoolError::LimitExceeded { capacity: 2 })
        ));

        assert_eq!(pool.delete(a), Some("a"));
        assert_eq!(pool.get(a), None);
        // Freed capacity is usable again, but the old id stays dead.
        let c = pool.add("c").unwrap();
        assert_ne!(c, a);
        assert_eq!(pool.get(b), Some("b"));
    }

    #[test]
    fn codec_round_trip() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Ping {
            seq: u32,
            note: String,
        }

        let codec = JsonCodec;
        let msg = Ping {
            seq: 7,
            note: "hello".into(),
        };
        let text = codec.serialize(&msg).unwrap();
        let back: Ping = codec.deserialize(&text).unwrap();
        assert_eq!(back, msg);
    }

    #[tokio::test]
    async fn scheduler_cancel_flag_checked_before_run() {
        let fired = Arc::new(AtomicUsize::new(0));
        let scheduler = TokioScheduler;

        let counted = fired.clone();
        let handle = scheduler.schedule(
            Duration::from_millis(50),
            Box::new(move || {
                counted.fetch_add(1, Ordering::SeqCst);
            }),
        );
        handle.cancel();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        let counted = fired.clone();
        let handle = scheduler.schedule_repeating(
            Duration::from_millis(10),
            Duration::from_millis(10),
            Box::new(move || {
                counted.fetch_add(1, Ordering::SeqCst);
            }),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.cancel();
        let settled = fired.load(Ordering::SeqCst);
        assert!(settled >= 2, "repeating job fired {settled} times");
        tokio::time::sleep(Duration::from_millis(50)).await;
        // At most one in-flight run after cancel.
        assert!(fired.load(Ordering::SeqCst) <= settled + 1);
    }
}
