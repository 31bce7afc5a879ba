//! Mailbox provider abstraction.
//!
//! The relay only needs three things from a mailbox: inbox counts, the unread
//! messages newest first, and one bulk write of read flags. Adapters translate
//! the typed `PendingUpdate` list into their own wire format.

pub mod imap;

use std::collections::BTreeSet;
use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::MailboxError;

pub use imap::ImapMailbox;

/// A single header line, in the shape the downstream API expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A message as surfaced by the provider.
#[derive(Debug, Clone)]
pub struct Message {
    /// Provider handle used to address the item in updates.
    pub id: String,
    /// RFC 5322 Message-ID, if present.
    pub message_id: Option<String>,
    /// Sender address.
    pub sender: String,
    /// To recipients, in header order.
    pub to_recipients: Vec<String>,
    /// `None` when the provider returned no header block at all.
    pub headers: Option<Vec<Header>>,
    pub text_body: String,
    pub is_read: bool,
    pub received_at: DateTime<Utc>,
}

impl Message {
    /// Identifier for log lines: Message-ID when known, provider id otherwise.
    pub fn log_id(&self) -> &str {
        self.message_id.as_deref().unwrap_or(&self.id)
    }
}

/// Message fields an update can persist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MessageField {
    IsRead,
}

/// One entry of a bulk update: persist `fields` of `message` as currently set locally.
#[derive(Debug, Clone)]
pub struct PendingUpdate {
    pub message: Message,
    pub fields: BTreeSet<MessageField>,
}

impl PendingUpdate {
    pub fn new(message: Message, fields: impl IntoIterator<Item = MessageField>) -> Self {
        Self {
            message,
            fields: fields.into_iter().collect(),
        }
    }
}

/// Inbox totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InboxCounts {
    pub total: u64,
    pub unread: u64,
}

/// Unread messages, newest first. An `Err` item ends the stream.
pub type MessageStream<'a> = Pin<Box<dyn Stream<Item = Result<Message, MailboxError>> + Send + 'a>>;

/// The operations the poller needs from a mailbox provider.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Total and unread message counts.
    async fn counts(&self) -> Result<InboxCounts, MailboxError>;

    /// Unread messages ordered by received time, descending.
    fn unread_newest_first(&self) -> MessageStream<'_>;

    /// Persist the listed fields for every message in a single request.
    async fn bulk_update(&self, updates: &[PendingUpdate]) -> Result<(), MailboxError>;
}
