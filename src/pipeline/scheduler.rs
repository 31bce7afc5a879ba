//! Runs the poller forever on a fixed interval.
//!
//! Sleeps the full interval after each cycle finishes, so a slow cycle
//! delays the next one. No shutdown signal is consulted.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::info;

use crate::metrics::{self, Metrics};
use crate::pipeline::poller::InboxPoller;

/// Timing and count for one finished cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleReport {
    pub processed: usize,
    pub elapsed: Duration,
    pub uptime: Duration,
}

pub struct Scheduler {
    poller: InboxPoller,
    metrics: Arc<Metrics>,
    interval: Duration,
    boot: Instant,
}

impl Scheduler {
    pub fn new(poller: InboxPoller, metrics: Arc<Metrics>, interval: Duration) -> Self {
        Self {
            poller,
            metrics,
            interval,
            boot: Instant::now(),
        }
    }

    /// Count uptime from `boot` instead of construction time.
    pub fn booted_at(mut self, boot: Instant) -> Self {
        self.boot = boot;
        self
    }

    /// One poll cycle plus its summary line and uptime gauge.
    pub async fn run_cycle(&self) -> CycleReport {
        let start = Instant::now();
        let processed = self.poller.poll().await;
        let elapsed = start.elapsed();

        info!(
            "Last run took {:.2} seconds and processed {} messages. Waiting {} seconds until next poll..",
            elapsed.as_secs_f64(),
            processed,
            self.interval.as_secs()
        );

        let uptime = self.boot.elapsed();
        self.metrics.set(metrics::UPTIME, uptime.as_secs());

        CycleReport {
            processed,
            elapsed,
            uptime,
        }
    }

    /// Cycle, sleep, repeat. Never returns.
    pub async fn run(self) {
        loop {
            self.run_cycle().await;
            tokio::time::sleep(self.interval).await;
        }
    }
}
