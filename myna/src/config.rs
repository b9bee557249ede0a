use std::time::Duration;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_INTERRUPT_CAPACITY: usize = 64;

// --- Runtime Configuration ---

/// Configuration for one `Runtime` instance.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Name of this node; the authority part of every local `AgentId`.
    pub node_name: String,

    /// Maximum number of live agents; `spawn` beyond this fails with
    /// `SpawnError::ResourceExhausted`.
    pub pool_capacity: usize,

    /// Default capacity of a port's normal and synchronous queues.
    pub default_queue_capacity: usize,

    /// Capacity of a port's interrupt queue.
    pub interrupt_capacity: usize,

    /// Maximum number of cached remote connections before LRU eviction.
    pub connection_cache_capacity: usize,

    /// Default timeout for `request` operations.
    pub ask_timeout: Duration,

    /// How long an unacknowledged remote operation is kept before being
    /// purged silently.
    pub op_timeout: Duration,

    /// Period of the housekeeping job that purges expired remote
    /// operations.
    pub purge_interval: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            node_name: "local".to_string(),
            pool_capacity: 10_240,
            default_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            interrupt_capacity: DEFAULT_INTERRUPT_CAPACITY,
            connection_cache_capacity: 32,
            ask_timeout: Duration::from_secs(5),
            op_timeout: Duration::from_secs(10),
            purge_interval: Duration::from_secs(1),
        }
    }
}

impl RuntimeConfig {
    /// Merge runtime defaults into a port-specific configuration,
    /// filling every field the port config leaves unset.
    pub fn merge_with_port_config(&self, port: &PortConfig) -> EffectivePortConfig {
        EffectivePortConfig {
            queue_capacity: port.queue_capacity.unwrap_or(self.default_queue_capacity),
            interrupt_capacity: self.interrupt_capacity,
            synchronous: port.synchronous,
            ask_timeout: port.ask_timeout.unwrap_or(self.ask_timeout),
        }
    }
}

// --- Port Configuration ---

/// Per-agent configuration, potentially overriding runtime defaults.
#[derive(Clone, Debug, Default)]
pub struct PortConfig {
    /// Capacity of this port's normal and synchronous queues.
    pub queue_capacity: Option<usize>,

    /// Mailbox-wide synchronous flag: every plain `post` to this port is
    /// upgraded to synchronous delivery.
    pub synchronous: bool,

    /// Timeout for `request` operations against this port.
    pub ask_timeout: Option<Duration>,
}

/// A `PortConfig` with every default applied.
#[derive(Clone, Debug)]
pub struct EffectivePortConfig {
    pub queue_capacity: usize,
    pub interrupt_capacity: usize,
    pub synchronous: bool,
    pub ask_timeout: Duration,
}
