//! Process-wide counters and gauges.
//!
//! The scheduler loop and the flush task share one `Arc<Metrics>`; every
//! update is a single locked `set` or `incr`, so the two never race on
//! anything else.

pub mod sinks;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

pub use sinks::{LogSink, MetricsSink, NopSink, PrometheusSink, metrics_routes};

pub const OWA_API_FAILURE_COUNT: &str = "owa_api_failure_count";
pub const MESSAGE_RELAY_SUCCESS_COUNT: &str = "message_relay_success_count";
pub const MESSAGE_RELAY_FAILURE_COUNT: &str = "message_relay_failure_count";
pub const TOTAL_INBOX_COUNT: &str = "total_inbox_count";
pub const UNREAD_INBOX_COUNT: &str = "unread_inbox_count";
pub const MESSAGE_PROCESS_COUNT: &str = "message_process_count";
pub const MESSAGE_IGNORE_COUNT: &str = "message_ignore_count";
pub const UPTIME: &str = "uptime";

/// Every metric the relay reports, all zero at startup.
pub const DEFAULT_METRICS: [&str; 8] = [
    OWA_API_FAILURE_COUNT,
    MESSAGE_RELAY_SUCCESS_COUNT,
    MESSAGE_RELAY_FAILURE_COUNT,
    TOTAL_INBOX_COUNT,
    UNREAD_INBOX_COUNT,
    MESSAGE_PROCESS_COUNT,
    MESSAGE_IGNORE_COUNT,
    UPTIME,
];

/// A point-in-time copy of every metric, sorted by name.
pub type Snapshot = Vec<(String, u64)>;

/// Named counters and gauges.
#[derive(Debug)]
pub struct Metrics {
    app: String,
    values: Mutex<BTreeMap<String, u64>>,
}

impl Metrics {
    /// Create a registry with the given names initialised to zero.
    pub fn new(app: impl Into<String>, names: &[&str]) -> Arc<Self> {
        let values = names.iter().map(|n| (n.to_string(), 0)).collect();
        Arc::new(Self {
            app: app.into(),
            values: Mutex::new(values),
        })
    }

    /// Registry holding the relay's default metric set.
    pub fn with_defaults(app: impl Into<String>) -> Arc<Self> {
        Self::new(app, &DEFAULT_METRICS)
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    /// Overwrite a gauge.
    pub fn set(&self, name: &str, value: u64) {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.insert(name.to_string(), value);
    }

    /// Bump a counter by one.
    pub fn incr(&self, name: &str) {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        *values.entry(name.to_string()).or_insert(0) += 1;
    }

    /// Current value of a metric (zero if never touched).
    pub fn get(&self, name: &str) -> u64 {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.get(name).copied().unwrap_or(0)
    }

    pub fn snapshot(&self) -> Snapshot {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.iter().map(|(k, v)| (k.clone(), *v)).collect()
    }
}

/// Spawn the background task that flushes metrics into `sink` every `interval`.
pub fn spawn_flush_task(
    metrics: Arc<Metrics>,
    sink: Arc<dyn MetricsSink>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip immediate first tick
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let snapshot = metrics.snapshot();
            sink.emit(metrics.app(), &snapshot);
        }
    })
}
