//! Metrics sinks: where a flushed snapshot ends up.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, extract::State, http::header, response::IntoResponse, routing::get};
use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::{
    MESSAGE_IGNORE_COUNT, MESSAGE_PROCESS_COUNT, MESSAGE_RELAY_FAILURE_COUNT,
    MESSAGE_RELAY_SUCCESS_COUNT, OWA_API_FAILURE_COUNT, Snapshot, TOTAL_INBOX_COUNT,
    UNREAD_INBOX_COUNT, UPTIME,
};
use crate::error::MetricsError;

/// Monotonic metrics, exported as Prometheus counters.
const COUNTERS: [(&str, &str); 4] = [
    (OWA_API_FAILURE_COUNT, "Failed calls to the mailbox provider."),
    (MESSAGE_RELAY_SUCCESS_COUNT, "Messages accepted by the incident API."),
    (MESSAGE_RELAY_FAILURE_COUNT, "Messages the incident API did not accept."),
    (MESSAGE_IGNORE_COUNT, "Messages dropped as headerless or automated."),
];

/// Point-in-time metrics, exported as Prometheus gauges.
const GAUGES: [(&str, &str); 4] = [
    (TOTAL_INBOX_COUNT, "Messages in the polled mailbox."),
    (UNREAD_INBOX_COUNT, "Unread messages in the polled mailbox."),
    (MESSAGE_PROCESS_COUNT, "Messages iterated by the last poll cycle."),
    (UPTIME, "Seconds since the relay started."),
];

/// Receives a snapshot on every flush.
pub trait MetricsSink: Send + Sync {
    fn emit(&self, app: &str, snapshot: &Snapshot);
}

/// Drops every snapshot.
#[derive(Debug, Clone, Copy)]
pub struct NopSink;

impl MetricsSink for NopSink {
    fn emit(&self, _app: &str, _snapshot: &Snapshot) {}
}

/// Writes each snapshot as one structured log line.
#[derive(Debug, Clone, Copy)]
pub struct LogSink;

impl MetricsSink for LogSink {
    fn emit(&self, app: &str, snapshot: &Snapshot) {
        let rendered = snapshot
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join(" ");
        info!(app = %app, "metrics {rendered}");
    }
}

enum Series {
    Counter(IntCounter),
    Gauge(IntGauge),
}

impl Series {
    fn set(&self, value: u64) {
        match self {
            // Counters only move forward; catch up to the registry's total.
            Series::Counter(counter) => {
                let current = counter.get();
                if value > current {
                    counter.inc_by(value - current);
                }
            }
            Series::Gauge(gauge) => gauge.set(i64::try_from(value).unwrap_or(i64::MAX)),
        }
    }
}

/// Mirrors flushed snapshots into a Prometheus registry for scraping.
///
/// Every relay metric is registered up front, so a scrape before the first
/// flush already lists them at zero.
pub struct PrometheusSink {
    registry: Registry,
    series: BTreeMap<&'static str, Series>,
}

impl PrometheusSink {
    /// Register the relay's metrics, named `{app}_{metric}`.
    pub fn new(app: &str) -> Result<Self, MetricsError> {
        let prefix = metric_prefix(app);
        let registry = Registry::new();
        let mut series = BTreeMap::new();

        for (name, help) in COUNTERS {
            let counter = IntCounter::with_opts(Opts::new(format!("{prefix}_{name}"), help))
                .map_err(|e| MetricsError::Register(e.to_string()))?;
            registry
                .register(Box::new(counter.clone()))
                .map_err(|e| MetricsError::Register(e.to_string()))?;
            series.insert(name, Series::Counter(counter));
        }
        for (name, help) in GAUGES {
            let gauge = IntGauge::with_opts(Opts::new(format!("{prefix}_{name}"), help))
                .map_err(|e| MetricsError::Register(e.to_string()))?;
            registry
                .register(Box::new(gauge.clone()))
                .map_err(|e| MetricsError::Register(e.to_string()))?;
            series.insert(name, Series::Gauge(gauge));
        }

        Ok(Self { registry, series })
    }

    /// Text exposition of the registry.
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            error!("Failed encoding metrics: {e}");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }

    /// Bind `addr` and serve `GET /metrics` in the background.
    pub async fn serve(
        self: Arc<Self>,
        addr: SocketAddr,
    ) -> Result<JoinHandle<()>, MetricsError> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| MetricsError::Bind {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?;
        info!(%addr, "Prometheus metrics endpoint listening");

        let app = metrics_routes(self);
        Ok(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("Metrics server stopped: {e}");
            }
        }))
    }
}

impl MetricsSink for PrometheusSink {
    fn emit(&self, _app: &str, snapshot: &Snapshot) {
        for (name, value) in snapshot {
            match self.series.get(name.as_str()) {
                Some(series) => series.set(*value),
                None => debug!(metric = %name, "Metric has no Prometheus series"),
            }
        }
    }
}

/// Router exposing the Prometheus sink.
pub fn metrics_routes(sink: Arc<PrometheusSink>) -> Router {
    Router::new()
        .route("/metrics", get(scrape))
        .with_state(sink)
}

async fn scrape(State(sink): State<Arc<PrometheusSink>>) -> impl IntoResponse {
    let content_type = TextEncoder::new().format_type().to_string();
    ([(header::CONTENT_TYPE, content_type)], sink.render())
}

/// Prometheus metric names allow `[a-zA-Z0-9_:]` only.
fn metric_prefix(app: &str) -> String {
    app.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> Snapshot {
        vec![
            ("message_ignore_count".to_string(), 3),
            ("uptime".to_string(), 120),
        ]
    }

    fn sink() -> PrometheusSink {
        PrometheusSink::new("mail-relay").unwrap()
    }

    #[test]
    fn every_metric_is_exposed_at_zero_before_first_flush() {
        let text = sink().render();
        for (name, _) in COUNTERS.iter().chain(GAUGES.iter()) {
            assert!(
                text.contains(&format!("mail_relay_{name} 0\n")),
                "{name} missing from:\n{text}"
            );
        }
    }

    #[test]
    fn counters_and_gauges_are_typed() {
        let text = sink().render();
        assert!(text.contains("# TYPE mail_relay_message_relay_success_count counter\n"));
        assert!(text.contains("# TYPE mail_relay_owa_api_failure_count counter\n"));
        assert!(text.contains("# TYPE mail_relay_total_inbox_count gauge\n"));
        assert!(text.contains("# TYPE mail_relay_uptime gauge\n"));
        assert!(text.contains("# HELP mail_relay_uptime Seconds since the relay started.\n"));
    }

    #[test]
    fn emit_mirrors_snapshot_values() {
        let sink = sink();
        sink.emit("mail-relay", &snapshot());
        let text = sink.render();
        assert!(text.contains("mail_relay_message_ignore_count 3\n"));
        assert!(text.contains("mail_relay_uptime 120\n"));
    }

    #[test]
    fn counters_catch_up_and_never_go_back() {
        let sink = sink();
        sink.emit("mail-relay", &vec![(MESSAGE_IGNORE_COUNT.to_string(), 3)]);
        sink.emit("mail-relay", &vec![(MESSAGE_IGNORE_COUNT.to_string(), 5)]);
        sink.emit("mail-relay", &vec![(MESSAGE_IGNORE_COUNT.to_string(), 1)]);
        assert!(sink.render().contains("mail_relay_message_ignore_count 5\n"));
    }

    #[test]
    fn gauges_follow_the_latest_flush() {
        let sink = sink();
        sink.emit("mail-relay", &vec![(TOTAL_INBOX_COUNT.to_string(), 40)]);
        sink.emit("mail-relay", &vec![(TOTAL_INBOX_COUNT.to_string(), 12)]);
        assert!(sink.render().contains("mail_relay_total_inbox_count 12\n"));
    }

    #[test]
    fn unknown_metric_is_ignored() {
        let sink = sink();
        sink.emit("mail-relay", &vec![("bogus".to_string(), 9)]);
        assert!(!sink.render().contains("bogus"));
    }

    #[test]
    fn log_and_nop_sinks_accept_snapshots() {
        LogSink.emit("app", &snapshot());
        NopSink.emit("app", &snapshot());
    }
}
