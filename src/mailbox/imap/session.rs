//! Blocking IMAP4rev1 session over rustls.
//!
//! Only the handful of commands the relay needs. Run every call inside
//! `spawn_blocking`.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rustls_pki_types::ServerName;
use secrecy::ExposeSecret;
use tracing::debug;

use super::parse::{self, FetchAttrs};
use crate::config::{MailboxConfig, ProxyConfig, TransportOptions};
use crate::error::MailboxError;
use crate::mailbox::InboxCounts;

pub type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// One untagged server response, with any literals it carried pulled out.
#[derive(Debug, Default, Clone)]
pub struct Untagged {
    /// Response text after the leading `* `, literal markers left in place.
    pub text: String,
    pub literals: Vec<Vec<u8>>,
}

/// A message body as fetched, before MIME parsing.
#[derive(Debug, Clone)]
pub struct FetchedMessage {
    pub uid: u32,
    pub seen: bool,
    pub internal_date: Option<DateTime<Utc>>,
    pub raw: Vec<u8>,
}

/// Logged-in session with the configured mailbox selected.
pub struct ImapSession<S = TlsStream> {
    stream: BufReader<S>,
    next_tag: u32,
    /// Messages in the selected mailbox, kept current from `EXISTS`/`EXPUNGE`.
    exists: u64,
}

impl ImapSession<TlsStream> {
    /// Connect, log in and select the mailbox.
    pub fn connect(
        config: &MailboxConfig,
        transport: &TransportOptions,
    ) -> Result<Self, MailboxError> {
        let tcp = match &transport.proxy {
            Some(proxy) => tunnel(proxy, &config.host, config.port)?,
            None => TcpStream::connect((config.host.as_str(), config.port)).map_err(|e| {
                MailboxError::Connect {
                    host: format!("{}:{}", config.host, config.port),
                    reason: e.to_string(),
                }
            })?,
        };
        tcp.set_read_timeout(transport.read_timeout)?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name = ServerName::try_from(config.host.clone())
            .map_err(|e| MailboxError::Tls(format!("invalid server name {}: {e}", config.host)))?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)
            .map_err(|e| MailboxError::Tls(e.to_string()))?;

        Self::open(rustls::StreamOwned::new(conn, tcp), config)
    }
}

impl<S: Read + Write> ImapSession<S> {
    /// Wrap a stream whose greeting has not been read yet.
    pub(crate) fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
            next_tag: 1,
            exists: 0,
        }
    }

    /// Read the greeting, log in and select the mailbox.
    pub fn open(stream: S, config: &MailboxConfig) -> Result<Self, MailboxError> {
        let mut session = Self::new(stream);

        let greeting = session.read_line()?;
        if !(greeting.starts_with("* OK") || greeting.starts_with("* PREAUTH")) {
            return Err(MailboxError::Rejected {
                command: "greeting".into(),
                response: greeting.trim_end().to_string(),
            });
        }

        let login = format!(
            "LOGIN {} {}",
            quote(&config.username),
            quote(config.password.expose_secret())
        );
        session.command(&login).map_err(|e| match e {
            MailboxError::Rejected { .. } => MailboxError::LoginFailed {
                username: config.username.clone(),
            },
            other => other,
        })?;

        session.command(&format!("SELECT {}", quote(&config.mailbox)))?;
        debug!(host = %config.host, mailbox = %config.mailbox, "IMAP session ready");
        Ok(session)
    }

    /// Total and unseen counts for the selected mailbox.
    ///
    /// `NOOP` picks up any `EXISTS`/`EXPUNGE` the server has queued.
    pub fn counts(&mut self) -> Result<InboxCounts, MailboxError> {
        self.command("NOOP")?;
        let unseen = parse::parse_search(&self.command("UID SEARCH UNSEEN")?);
        Ok(InboxCounts {
            total: self.exists,
            unread: unseen.len() as u64,
        })
    }

    /// UIDs of unseen messages, most recently received first.
    pub fn unread_uids_newest_first(&mut self) -> Result<Vec<u32>, MailboxError> {
        let responses = self.command("UID SEARCH UNSEEN")?;
        let uids = parse::parse_search(&responses);
        if uids.is_empty() {
            return Ok(uids);
        }

        let responses = self.command(&format!("UID FETCH {} (INTERNALDATE)", uid_set(&uids)))?;
        let mut dated: Vec<FetchAttrs> = responses
            .iter()
            .filter_map(|r| parse::parse_fetch(&r.text))
            .filter(|attrs| attrs.uid.is_some())
            .collect();
        parse::sort_newest_first(&mut dated);

        Ok(dated.into_iter().filter_map(|attrs| attrs.uid).collect())
    }

    /// Fetch one message without touching its `\Seen` flag.
    ///
    /// `Ok(None)` when the server has no such UID any more.
    pub fn fetch_message(&mut self, uid: u32) -> Result<Option<FetchedMessage>, MailboxError> {
        let responses =
            self.command(&format!("UID FETCH {uid} (UID FLAGS INTERNALDATE BODY.PEEK[])"))?;

        for response in responses {
            let Some(attrs) = parse::parse_fetch(&response.text) else {
                continue;
            };
            if attrs.uid != Some(uid) {
                continue;
            }
            let raw = response.literals.into_iter().next().unwrap_or_default();
            return Ok(Some(FetchedMessage {
                uid,
                seen: attrs.seen,
                internal_date: attrs.internal_date,
                raw,
            }));
        }
        Ok(None)
    }

    /// Add or remove `\Seen` on every UID in one `UID STORE`.
    pub fn store_seen(&mut self, uids: &[u32], seen: bool) -> Result<(), MailboxError> {
        if uids.is_empty() {
            return Ok(());
        }
        let op = if seen { "+FLAGS.SILENT" } else { "-FLAGS.SILENT" };
        self.command(&format!("UID STORE {} {op} (\\Seen)", uid_set(uids)))?;
        Ok(())
    }

    /// Send a tagged command and collect its untagged responses.
    fn command(&mut self, command: &str) -> Result<Vec<Untagged>, MailboxError> {
        let tag = format!("A{:04}", self.next_tag);
        self.next_tag += 1;

        let stream = self.stream.get_mut();
        stream.write_all(format!("{tag} {command}\r\n").as_bytes())?;
        stream.flush()?;

        let mut untagged = Vec::new();
        loop {
            let line = self.read_line()?;
            if let Some(status) = line.strip_prefix(&format!("{tag} ")) {
                if status.starts_with("OK") {
                    return Ok(untagged);
                }
                return Err(MailboxError::Rejected {
                    command: command_name(command),
                    response: status.trim_end().to_string(),
                });
            }
            if let Some(rest) = line.strip_prefix("* ") {
                let response = self.read_untagged(rest.to_string())?;
                self.track_size(&response.text);
                untagged.push(response);
            }
            // Continuation requests are never expected; skip them.
        }
    }

    /// Finish an untagged response, reading any literals it announces.
    fn read_untagged(&mut self, first_line: String) -> Result<Untagged, MailboxError> {
        let mut response = Untagged::default();
        let mut line = first_line;
        loop {
            let trimmed = line.trim_end_matches(['\r', '\n']);
            match parse::literal_len(trimmed) {
                Some(len) => {
                    response.text.push_str(trimmed);
                    let mut literal = vec![0u8; len];
                    self.stream.read_exact(&mut literal)?;
                    response.literals.push(literal);
                    line = self.read_line()?;
                }
                None => {
                    response.text.push_str(trimmed);
                    return Ok(response);
                }
            }
        }
    }

    fn track_size(&mut self, text: &str) {
        if let Some(count) = parse::parse_exists(text) {
            self.exists = count;
        } else if parse::is_expunge(text) {
            self.exists = self.exists.saturating_sub(1);
        }
    }

    fn read_line(&mut self) -> Result<String, MailboxError> {
        let mut buf = Vec::new();
        let n = self.stream.read_until(b'\n', &mut buf)?;
        if n == 0 {
            return Err(MailboxError::Closed);
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

/// Open a TCP stream to `host:port` through an HTTP CONNECT proxy.
fn tunnel(proxy: &ProxyConfig, host: &str, port: u16) -> Result<TcpStream, MailboxError> {
    let proxy_addr = format!("{}:{}", proxy.host, proxy.port);
    let mut tcp = TcpStream::connect((proxy.host.as_str(), proxy.port)).map_err(|e| {
        MailboxError::Connect {
            host: proxy_addr.clone(),
            reason: e.to_string(),
        }
    })?;

    let target = format!("{host}:{port}");
    tcp.write_all(format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n\r\n").as_bytes())?;
    tcp.flush()?;

    // Byte at a time so nothing past the header block is consumed.
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if tcp.read(&mut byte)? == 0 {
            return Err(MailboxError::Proxy {
                proxy: proxy_addr,
                reason: "connection closed during CONNECT".into(),
            });
        }
        head.push(byte[0]);
    }

    let head = String::from_utf8_lossy(&head);
    let status_line = head.lines().next().unwrap_or_default();
    if parse::proxy_status(status_line) != Some(200) {
        return Err(MailboxError::Proxy {
            proxy: proxy_addr,
            reason: status_line.to_string(),
        });
    }
    Ok(tcp)
}

/// Quote a string as an IMAP quoted-string.
pub(crate) fn quote(s: &str) -> String {
    let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Comma-separated UID set.
pub(crate) fn uid_set(uids: &[u32]) -> String {
    uids.iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Command name for error messages; never includes arguments (LOGIN carries a password).
fn command_name(command: &str) -> String {
    let mut words = command.split_whitespace();
    match (words.next(), words.next()) {
        (Some("UID"), Some(sub)) => format!("UID {sub}"),
        (Some(first), _) => first.to_string(),
        _ => String::new(),
    }
}

/// In-memory server for driving a session from canned responses.
#[cfg(test)]
pub(crate) mod script {
    use std::io::{Cursor, Read, Write};
    use std::sync::{Arc, Mutex};

    /// Replays `replies` to reads and records everything written.
    pub struct ScriptedStream {
        replies: Cursor<Vec<u8>>,
        sent: Arc<Mutex<Vec<u8>>>,
    }

    impl ScriptedStream {
        pub fn new(replies: &str) -> (Self, Arc<Mutex<Vec<u8>>>) {
            let sent = Arc::new(Mutex::new(Vec::new()));
            let stream = Self {
                replies: Cursor::new(replies.as_bytes().to_vec()),
                sent: Arc::clone(&sent),
            };
            (stream, sent)
        }
    }

    impl Read for ScriptedStream {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.replies.read(buf)
        }
    }

    impl Write for ScriptedStream {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.sent.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Commands the client sent, one per line.
    pub fn sent_lines(sent: &Arc<Mutex<Vec<u8>>>) -> Vec<String> {
        String::from_utf8_lossy(&sent.lock().unwrap())
            .lines()
            .map(str::to_string)
            .collect()
    }
}
