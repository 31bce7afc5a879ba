//! Forwards one accepted message to the incident API.

use std::sync::Arc;

use tracing::{error, info};

use crate::iris::{EmailPayload, IncidentApi};
use crate::mailbox::{Header, Message};
use crate::metrics::{self, Metrics};
use crate::pipeline::rules;

/// What happened to a message handed to the relayer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Posted and acknowledged with a 2xx.
    Sent,
    /// No headers, or an automated message; nothing was posted.
    Ignored,
    /// The POST failed or came back non-2xx.
    Failed,
}

/// Original headers followed by synthetic `To` (first recipient only) and `From`.
///
/// The mailbox does not surface To/From as ordinary headers.
pub fn augmented_headers(message: &Message, original: &[Header]) -> Vec<Header> {
    let mut headers = original.to_vec();
    if let Some(to) = message.to_recipients.first() {
        headers.push(Header::new("To", to.as_str()));
    }
    headers.push(Header::new("From", message.sender.as_str()));
    headers
}

/// Payload for a message: augmented headers and the trimmed text body.
pub fn build_payload(message: &Message, original: &[Header]) -> EmailPayload {
    EmailPayload {
        headers: augmented_headers(message, original),
        body: message.text_body.trim().to_string(),
    }
}

/// Classifies and posts messages, counting every outcome.
pub struct Relayer {
    api: Arc<dyn IncidentApi>,
    metrics: Arc<Metrics>,
}

impl Relayer {
    pub fn new(api: Arc<dyn IncidentApi>, metrics: Arc<Metrics>) -> Self {
        Self { api, metrics }
    }

    /// Relay one message. Makes at most one POST and never retries.
    pub async fn relay(&self, message: &Message) -> RelayOutcome {
        let Some(original) = message.headers.as_deref() else {
            info!(
                message_id = %message.log_id(),
                sender = %message.sender,
                "Ignoring message with no headers"
            );
            self.metrics.incr(metrics::MESSAGE_IGNORE_COUNT);
            return RelayOutcome::Ignored;
        };

        // Synthetic To/From are not rule targets; classify the originals.
        if rules::is_pointless(original) {
            info!(
                message_id = %message.log_id(),
                sender = %message.sender,
                "Not relaying pointless message"
            );
            self.metrics.incr(metrics::MESSAGE_IGNORE_COUNT);
            return RelayOutcome::Ignored;
        }

        let payload = build_payload(message, original);
        match self.api.post_email(&payload).await {
            Ok(()) => {
                self.metrics.incr(metrics::MESSAGE_RELAY_SUCCESS_COUNT);
                RelayOutcome::Sent
            }
            Err(e) => {
                self.metrics.incr(metrics::MESSAGE_RELAY_FAILURE_COUNT);
                error!(
                    message_id = %message.log_id(),
                    sender = %message.sender,
                    error = %e,
                    "Failed posting message to incident API"
                );
                RelayOutcome::Failed
            }
        }
    }
}
