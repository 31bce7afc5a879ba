//! Mail relay: polls a mailbox and forwards inbound email to the incident API.

pub mod config;
pub mod daemon;
pub mod error;
pub mod iris;
pub mod mailbox;
pub mod metrics;
pub mod pipeline;

use std::sync::Arc;
use std::time::Instant;

use crate::config::{MetricsSinkKind, RelayConfig};
use crate::iris::IrisClient;
use crate::mailbox::ImapMailbox;
use crate::metrics::{LogSink, Metrics, MetricsSink, NopSink, PrometheusSink};
use crate::pipeline::{InboxPoller, Relayer, Scheduler};

/// Name used for metric prefixes and log context.
pub const APP_NAME: &str = "mail-relay";

/// Wire up metrics, clients and the scheduler, then poll forever.
///
/// Only startup problems come back as errors; once the loop runs every
/// failure is logged and counted instead.
pub async fn run(config: RelayConfig, boot: Instant) -> error::Result<()> {
    // ── Metrics ─────────────────────────────────────────────────────────
    let metrics = Metrics::with_defaults(APP_NAME);
    let sink: Arc<dyn MetricsSink> = match config.metrics.sink {
        MetricsSinkKind::Log => Arc::new(LogSink),
        MetricsSinkKind::None => Arc::new(NopSink),
        MetricsSinkKind::Prometheus { addr } => {
            let sink = Arc::new(PrometheusSink::new(APP_NAME)?);
            if let Err(e) = Arc::clone(&sink).serve(addr).await {
                tracing::error!("{e}");
            }
            sink
        }
    };
    let _flush_handle =
        metrics::spawn_flush_task(Arc::clone(&metrics), sink, config.metrics.flush_interval);

    // ── Clients ─────────────────────────────────────────────────────────
    let api = Arc::new(IrisClient::new(&config.api)?);
    if let Some(proxy) = &config.transport.proxy {
        tracing::info!("Mailbox traffic goes through proxy {}:{}", proxy.host, proxy.port);
    }
    tracing::info!(
        "Receiving mail on behalf of {} ({}:{}/{})",
        config.mailbox.username,
        config.mailbox.host,
        config.mailbox.port,
        config.mailbox.mailbox
    );
    let mailbox = Arc::new(ImapMailbox::new(config.mailbox, config.transport));

    // ── Loop ────────────────────────────────────────────────────────────
    let relayer = Relayer::new(api, Arc::clone(&metrics));
    let poller = InboxPoller::new(mailbox, relayer, Arc::clone(&metrics));
    Scheduler::new(poller, metrics, config.sleep_interval)
        .booted_at(boot)
        .run()
        .await;

    Ok(())
}
