//! IMAP mailbox adapter.
//!
//! A single long-lived session is reused across poll cycles. Any error drops
//! it; the next call reconnects.

mod parse;
mod session;

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use mail_parser::MessageParser;
use tracing::{debug, warn};

pub use session::{FetchedMessage, ImapSession, TlsStream};

use super::{Header, InboxCounts, Mailbox, Message, MessageField, MessageStream, PendingUpdate};
use crate::config::{MailboxConfig, TransportOptions};
use crate::error::MailboxError;

/// Headers the adapter surfaces as `sender` / `to_recipients` instead.
const ENVELOPE_HEADERS: [&str; 2] = ["From", "To"];

/// Opens a fresh logged-in session.
type Connector<S> = Arc<dyn Fn() -> Result<ImapSession<S>, MailboxError> + Send + Sync>;

/// Shared handle to the (lazily connected) session.
struct SessionHandle<S> {
    connect: Connector<S>,
    session: Arc<Mutex<Option<ImapSession<S>>>>,
}

impl<S> Clone for SessionHandle<S> {
    fn clone(&self) -> Self {
        Self {
            connect: Arc::clone(&self.connect),
            session: Arc::clone(&self.session),
        }
    }
}

impl<S: Read + Write + Send + 'static> SessionHandle<S> {
    /// Run `op` against a connected session on the blocking pool.
    async fn run<T, F>(&self, op: F) -> Result<T, MailboxError>
    where
        F: FnOnce(&mut ImapSession<S>) -> Result<T, MailboxError> + Send + 'static,
        T: Send + 'static,
    {
        let handle = self.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = handle.session.lock().unwrap_or_else(|e| e.into_inner());
            let mut session = match guard.take() {
                Some(session) => session,
                None => (handle.connect)()?,
            };
            let result = op(&mut session);
            if result.is_ok() {
                *guard = Some(session);
            }
            result
        })
        .await
        .map_err(|e| MailboxError::Task(e.to_string()))?
    }
}

/// Mailbox backed by an IMAP server.
pub struct ImapMailbox<S = TlsStream> {
    handle: SessionHandle<S>,
}

impl ImapMailbox<TlsStream> {
    /// Proxy and socket settings come in through `transport`; nothing is global.
    pub fn new(config: MailboxConfig, transport: TransportOptions) -> Self {
        Self::with_connector(move || ImapSession::connect(&config, &transport))
    }
}

impl<S: Read + Write + Send + 'static> ImapMailbox<S> {
    /// Mailbox whose sessions come from `connect`, called again after any error.
    pub fn with_connector<F>(connect: F) -> Self
    where
        F: Fn() -> Result<ImapSession<S>, MailboxError> + Send + Sync + 'static,
    {
        Self {
            handle: SessionHandle {
                connect: Arc::new(connect),
                session: Arc::new(Mutex::new(None)),
            },
        }
    }
}

enum Cursor<S> {
    Start(SessionHandle<S>),
    Pending(SessionHandle<S>, VecDeque<u32>),
    Done,
}

/// UIDs to flag `\Seen` and to unflag, from the updates that touch `IsRead`.
///
/// Ids that are not IMAP UIDs are skipped with a warning.
pub fn seen_changes(updates: &[PendingUpdate]) -> (Vec<u32>, Vec<u32>) {
    let mut mark_seen = Vec::new();
    let mut mark_unseen = Vec::new();
    for update in updates {
        if !update.fields.contains(&MessageField::IsRead) {
            continue;
        }
        let Ok(uid) = update.message.id.parse::<u32>() else {
            warn!(id = %update.message.id, "Skipping update for non-IMAP message id");
            continue;
        };
        if update.message.is_read {
            mark_seen.push(uid);
        } else {
            mark_unseen.push(uid);
        }
    }
    (mark_seen, mark_unseen)
}

#[async_trait]
impl<S: Read + Write + Send + 'static> Mailbox for ImapMailbox<S> {
    async fn counts(&self) -> Result<InboxCounts, MailboxError> {
        self.handle.run(|s| s.counts()).await
    }

    fn unread_newest_first(&self) -> MessageStream<'_> {
        let stream = futures::stream::unfold(Cursor::Start(self.handle.clone()), |cursor| async move {
            let (handle, mut uids) = match cursor {
                Cursor::Done => return None,
                Cursor::Start(handle) => match handle.run(|s| s.unread_uids_newest_first()).await {
                    Ok(uids) => {
                        debug!(count = uids.len(), "Unread messages found");
                        (handle, VecDeque::from(uids))
                    }
                    Err(e) => return Some((Err(e), Cursor::Done)),
                },
                Cursor::Pending(handle, uids) => (handle, uids),
            };

            loop {
                let uid = uids.pop_front()?;
                match handle.run(move |s| s.fetch_message(uid)).await {
                    Ok(Some(fetched)) => {
                        return Some((Ok(to_message(fetched)), Cursor::Pending(handle, uids)));
                    }
                    Ok(None) => {
                        debug!(uid, "Message vanished before fetch");
                    }
                    Err(e) => return Some((Err(e), Cursor::Done)),
                }
            }
        });
        Box::pin(stream)
    }

    async fn bulk_update(&self, updates: &[PendingUpdate]) -> Result<(), MailboxError> {
        let (mark_seen, mark_unseen) = seen_changes(updates);
        if mark_seen.is_empty() && mark_unseen.is_empty() {
            return Ok(());
        }

        self.handle
            .run(move |s| {
                s.store_seen(&mark_seen, true)?;
                s.store_seen(&mark_unseen, false)
            })
            .await
    }
}

/// Turn a fetched RFC 5322 message into the provider-neutral `Message`.
pub fn to_message(fetched: FetchedMessage) -> Message {
    let id = fetched.uid.to_string();
    let received_at = fetched.internal_date.unwrap_or_else(Utc::now);

    let Some(parsed) = MessageParser::default().parse(fetched.raw.as_slice()) else {
        warn!(uid = fetched.uid, "Could not parse message, relaying without headers");
        return Message {
            id,
            message_id: None,
            sender: "unknown".into(),
            to_recipients: Vec::new(),
            headers: None,
            text_body: String::new(),
            is_read: fetched.seen,
            received_at,
        };
    };

    let headers: Vec<Header> = parsed
        .headers_raw()
        .filter(|(name, _)| !ENVELOPE_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name)))
        .map(|(name, value)| Header::new(name, unfold(value)))
        .collect();

    let sender = parsed
        .from()
        .or_else(|| parsed.sender())
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".into());

    Message {
        id,
        message_id: parsed.message_id().map(|s| s.to_string()),
        sender,
        to_recipients: extract_addresses(parsed.to()),
        headers: if parsed.headers().is_empty() {
            None
        } else {
            Some(headers)
        },
        text_body: parsed.body_text(0).map(|b| b.into_owned()).unwrap_or_default(),
        is_read: fetched.seen,
        received_at,
    }
}

/// Join folded header lines into one value.
fn unfold(raw: &str) -> String {
    raw.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Addresses from an optional mail_parser Address field, groups flattened.
fn extract_addresses(addr: Option<&mail_parser::Address>) -> Vec<String> {
    let Some(addr) = addr else {
        return Vec::new();
    };
    match addr {
        mail_parser::Address::List(addrs) => addrs
            .iter()
            .filter_map(|a| a.address.as_ref().map(|s| s.to_string()))
            .collect(),
        mail_parser::Address::Group(groups) => groups
            .iter()
            .flat_map(|g| {
                g.addresses
                    .iter()
                    .filter_map(|a| a.address.as_ref().map(|s| s.to_string()))
            })
            .collect(),
    }
}
