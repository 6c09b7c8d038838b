//! Store configuration.

use std::time::Duration;

/// Configuration for a [`Configstore`](crate::Configstore).
#[derive(Debug, Clone)]
pub struct Config {
    /// Namespace substituted for an empty partition id.
    pub default_namespace: String,

    /// Service name recorded on every trace event.
    pub operator_id: String,

    /// Page size used when a list request asks for `limit == 0`.
    pub default_list_limit: u32,

    /// Number of most recent batches whose bodies the log keeps for replay.
    pub max_retained_batches: usize,

    /// Number of most recent transaction records the log keeps.
    pub max_retained_records: usize,

    /// Capacity of each subscriber's delivery queue.
    pub subscriber_queue_capacity: usize,

    /// How long a transaction may wait for the commit lock before it is
    /// reported as stalled.
    pub stall_threshold: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_namespace: "default".to_string(),
            operator_id: "configstore".to_string(),
            default_list_limit: 100,
            max_retained_batches: 10_000,
            max_retained_records: 100_000,
            subscriber_queue_capacity: 1024,
            stall_threshold: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default namespace.
    #[must_use]
    pub fn default_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.default_namespace = namespace.into();
        self
    }

    /// Sets the operator id recorded on trace events.
    #[must_use]
    pub fn operator_id(mut self, operator_id: impl Into<String>) -> Self {
        self.operator_id = operator_id.into();
        self
    }

    /// Sets the default list page size.
    #[must_use]
    pub const fn default_list_limit(mut self, limit: u32) -> Self {
        self.default_list_limit = limit;
        self
    }

    /// Sets how many batch bodies are retained for replay.
    #[must_use]
    pub const fn max_retained_batches(mut self, count: usize) -> Self {
        self.max_retained_batches = count;
        self
    }

    /// Sets how many transaction records are retained.
    #[must_use]
    pub const fn max_retained_records(mut self, count: usize) -> Self {
        self.max_retained_records = count;
        self
    }

    /// Sets the per-subscriber queue capacity.
    #[must_use]
    pub const fn subscriber_queue_capacity(mut self, capacity: usize) -> Self {
        self.subscriber_queue_capacity = capacity;
        self
    }

    /// Sets the commit-lock stall threshold.
    #[must_use]
    pub const fn stall_threshold(mut self, threshold: Duration) -> Self {
        self.stall_threshold = threshold;
        self
    }
}
