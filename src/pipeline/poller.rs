//! One poll cycle: fetch unread, relay each, mark everything read in bulk.

use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, error, info};

use crate::mailbox::{Mailbox, MessageField, PendingUpdate};
use crate::metrics::{self, Metrics};
use crate::pipeline::relayer::Relayer;

/// Drives a single poll → relay → acknowledge pass.
pub struct InboxPoller {
    mailbox: Arc<dyn Mailbox>,
    relayer: Relayer,
    metrics: Arc<Metrics>,
}

impl InboxPoller {
    pub fn new(mailbox: Arc<dyn Mailbox>, relayer: Relayer, metrics: Arc<Metrics>) -> Self {
        Self {
            mailbox,
            relayer,
            metrics,
        }
    }

    /// Run one cycle and return how many messages were iterated.
    ///
    /// Every mailbox and relay failure is logged and counted here; nothing
    /// propagates to the caller.
    pub async fn poll(&self) -> usize {
        match self.mailbox.counts().await {
            Ok(counts) => {
                self.metrics.set(metrics::TOTAL_INBOX_COUNT, counts.total);
                self.metrics.set(metrics::UNREAD_INBOX_COUNT, counts.unread);
            }
            Err(e) => {
                error!("Failed to gather inbox counts: {e}");
                self.metrics.incr(metrics::OWA_API_FAILURE_COUNT);
            }
        }

        let mut processed = 0;
        let mut to_mark_read: Vec<PendingUpdate> = Vec::new();

        let mut unread = self.mailbox.unread_newest_first();
        while let Some(item) = unread.next().await {
            let mut message = match item {
                Ok(message) => message,
                Err(e) => {
                    // Keep what was already processed; it still gets marked read.
                    error!(processed, "Failed to iterate through inbox: {e}");
                    self.metrics.incr(metrics::OWA_API_FAILURE_COUNT);
                    break;
                }
            };
            processed += 1;

            let outcome = self.relayer.relay(&message).await;
            debug!(message_id = %message.log_id(), ?outcome, "Relay attempt finished");

            message.is_read = true;
            to_mark_read.push(PendingUpdate::new(message, [MessageField::IsRead]));
        }

        if !to_mark_read.is_empty() {
            let count = to_mark_read.len();
            info!("will mark {count} messages as read");
            if let Err(e) = self.mailbox.bulk_update(&to_mark_read).await {
                error!("Failed to update read status on {count} messages in bulk: {e}");
                self.metrics.incr(metrics::OWA_API_FAILURE_COUNT);
            }
        }

        self.metrics.set(metrics::MESSAGE_PROCESS_COUNT, processed as u64);
        processed
    }
}
