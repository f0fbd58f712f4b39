//! IMAP-over-TLS mailbox.
//!
//! A small blocking IMAP client over rustls. Every operation runs on the
//! blocking pool; the single session is shared behind a mutex so
//! concurrent pipeline tasks issue their commands one at a time.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use rustls_pki_types::ServerName;
use secrecy::ExposeSecret;

use crate::channels::mailbox::{FetchedMessage, Flag, Mailbox};
use crate::config::MailboxConfig;
use crate::error::MailboxError;

/// Socket read timeout for every IMAP exchange.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

// ── Response model ──────────────────────────────────────────────────

/// Completion status of a tagged command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    No,
    Bad,
}

/// One untagged response line with its literal, if any.
///
/// `text` is the line with the literal removed (text before and after it
/// joined by a space).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Untagged {
    pub text: String,
    pub literal: Option<Vec<u8>>,
}

/// Everything the server sent for one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub untagged: Vec<Untagged>,
    pub status: Status,
    pub detail: String,
}

impl Response {
    fn ensure_ok(self, context: impl FnOnce(String) -> MailboxError) -> Result<Self, MailboxError> {
        match self.status {
            Status::Ok => Ok(self),
            _ => Err(context(self.detail)),
        }
    }
}

/// Byte length announced by a trailing `{N}` literal marker.
pub fn literal_len(line: &str) -> Option<usize> {
    let trimmed = line.trim_end_matches(['\r', '\n']);
    let open = trimmed.strip_suffix('}')?.rfind('{')?;
    trimmed[open + 1..trimmed.len() - 1].parse().ok()
}

fn read_line<R: BufRead>(reader: &mut R) -> Result<String, MailboxError> {
    let mut buf = Vec::new();
    let n = reader.read_until(b'\n', &mut buf)?;
    if n == 0 {
        return Err(MailboxError::Protocol("connection closed".into()));
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Read responses until the line tagged `tag` arrives.
pub fn read_response<R: BufRead>(reader: &mut R, tag: &str) -> Result<Response, MailboxError> {
    let mut untagged = Vec::new();
    let prefix = format!("{tag} ");

    loop {
        let line = read_line(reader)?;

        if let Some(rest) = line.strip_prefix(&prefix) {
            let rest = rest.trim_end();
            let (word, detail) = rest.split_once(' ').unwrap_or((rest, ""));
            let status = match word.to_ascii_uppercase().as_str() {
                "OK" => Status::Ok,
                "NO" => Status::No,
                "BAD" => Status::Bad,
                other => {
                    return Err(MailboxError::Protocol(format!(
                        "unexpected status {other:?} for {tag}"
                    )));
                }
            };
            return Ok(Response {
                untagged,
                status,
                detail: detail.to_string(),
            });
        }

        let mut entry = Untagged::default();
        let mut current = line;
        while let Some(len) = literal_len(&current) {
            let mut literal = vec![0u8; len];
            reader.read_exact(&mut literal)?;
            let head = current.trim_end();
            let head = &head[..head.rfind('{').unwrap_or(head.len())];
            entry.text.push_str(head.trim_end());
            entry.literal = Some(literal);
            // The response continues on the line after the literal.
            current = read_line(reader)?;
            entry.text.push(' ');
        }
        entry.text.push_str(current.trim_end());
        untagged.push(entry);
    }
}

/// Uids listed in `* SEARCH` responses.
pub fn parse_search(response: &Response) -> Vec<u32> {
    let mut uids: Vec<u32> = response
        .untagged
        .iter()
        .filter_map(|u| u.text.strip_prefix("* SEARCH"))
        .flat_map(|rest| rest.split_whitespace().filter_map(|n| n.parse().ok()))
        .collect();
    uids.sort_unstable();
    uids.dedup();
    uids
}

/// Pull uid, flags and body out of a `* n FETCH` response.
pub fn parse_fetch(response: &Response, uid: u32) -> Option<FetchedMessage> {
    let uid_re = Regex::new(r"(?i)\bUID (\d+)").ok()?;
    let flags_re = Regex::new(r"(?i)\bFLAGS \(([^)]*)\)").ok()?;

    response
        .untagged
        .iter()
        .filter(|u| u.text.to_ascii_uppercase().contains(" FETCH "))
        .find_map(|u| {
            let found: u32 = uid_re.captures(&u.text)?.get(1)?.as_str().parse().ok()?;
            if found != uid {
                return None;
            }
            let flags = flags_re
                .captures(&u.text)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().split_whitespace().map(Flag::parse).collect())
                .unwrap_or_default();
            Some(FetchedMessage {
                uid,
                flags,
                raw: u.literal.clone()?,
            })
        })
}

/// Quote a string argument.
pub fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// IMAP `SINCE` date (day granularity).
pub fn imap_date(at: DateTime<Utc>) -> String {
    at.format("%d-%b-%Y").to_string()
}

// ── Session ─────────────────────────────────────────────────────────

struct Session {
    stream: BufReader<TlsStream>,
    next_tag: u32,
}

impl Session {
    fn connect(config: &MailboxConfig) -> Result<Self, MailboxError> {
        let connect_err = |reason: String| MailboxError::Connect {
            host: config.host.clone(),
            reason,
        };

        let tcp = TcpStream::connect((&*config.host, config.port))
            .map_err(|e| connect_err(e.to_string()))?;
        tcp.set_read_timeout(Some(READ_TIMEOUT))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name =
            ServerName::try_from(config.host.clone()).map_err(|e| connect_err(e.to_string()))?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)
            .map_err(|e| connect_err(e.to_string()))?;

        let mut session = Self {
            stream: BufReader::new(rustls::StreamOwned::new(conn, tcp)),
            next_tag: 1,
        };

        let greeting = read_line(&mut session.stream)?;
        if !greeting.starts_with("* OK") && !greeting.starts_with("* PREAUTH") {
            return Err(connect_err(format!("unexpected greeting: {}", greeting.trim_end())));
        }

        session
            .command(&format!(
                "LOGIN {} {}",
                quote(&config.username),
                quote(config.password.expose_secret())
            ))?
            .ensure_ok(|_| MailboxError::AuthFailed {
                user: config.username.clone(),
            })?;

        session
            .command(&format!("SELECT {}", quote(&config.mailbox)))?
            .ensure_ok(|reason| MailboxError::Select {
                mailbox: config.mailbox.clone(),
                reason,
            })?;

        Ok(session)
    }

    fn command(&mut self, command: &str) -> Result<Response, MailboxError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;

        let stream = self.stream.get_mut();
        stream.write_all(format!("{tag} {command}\r\n").as_bytes())?;
        stream.flush()?;

        read_response(&mut self.stream, &tag)
    }

    fn search_since(&mut self, since: DateTime<Utc>) -> Result<Vec<u32>, MailboxError> {
        let response = self
            .command(&format!("UID SEARCH UNSEEN UNFLAGGED SINCE {}", imap_date(since)))?
            .ensure_ok(MailboxError::Search)?;
        Ok(parse_search(&response))
    }

    fn fetch(&mut self, uid: u32) -> Result<FetchedMessage, MailboxError> {
        let fetch_err = |reason: String| MailboxError::Fetch { uid, reason };
        // BODY.PEEK leaves \Seen untouched.
        let response = self
            .command(&format!("UID FETCH {uid} (UID FLAGS BODY.PEEK[])"))?
            .ensure_ok(fetch_err)?;
        parse_fetch(&response, uid).ok_or_else(|| fetch_err("message not returned".into()))
    }

    fn add_flags(&mut self, uid: u32, flags: &[Flag]) -> Result<(), MailboxError> {
        let list = flags.iter().map(Flag::as_imap).collect::<Vec<_>>().join(" ");
        self.command(&format!("UID STORE {uid} +FLAGS.SILENT ({list})"))?
            .ensure_ok(|reason| MailboxError::Flag { uid, reason })?;
        Ok(())
    }

    fn move_to(&mut self, uid: u32, folder: &str) -> Result<(), MailboxError> {
        let move_err = |reason: String| MailboxError::Move {
            uid,
            folder: folder.to_string(),
            reason,
        };

        let moved = self.command(&format!("UID MOVE {uid} {}", quote(folder)))?;
        if moved.status == Status::Ok {
            return Ok(());
        }

        // Servers without MOVE: copy, mark deleted, expunge just this uid.
        tracing::debug!(uid, folder, detail = %moved.detail, "UID MOVE refused, falling back to COPY");
        self.command(&format!("UID COPY {uid} {}", quote(folder)))?
            .ensure_ok(move_err)?;
        self.add_flags(uid, &[Flag::Deleted])?;
        self.command(&format!("UID EXPUNGE {uid}"))?
            .ensure_ok(move_err)?;
        Ok(())
    }

    fn logout(&mut self) {
        if let Err(e) = self.command("LOGOUT") {
            tracing::debug!(error = %e, "IMAP logout failed");
        }
    }
}

// ── Mailbox ─────────────────────────────────────────────────────────

/// IMAP mailbox with one session per scan.
pub struct ImapMailbox {
    config: MailboxConfig,
    session: Arc<Mutex<Option<Session>>>,
}

impl ImapMailbox {
    pub fn new(config: MailboxConfig) -> Self {
        Self {
            config,
            session: Arc::new(Mutex::new(None)),
        }
    }

    /// Run `op` against the open session on the blocking pool.
    async fn with_session<T, F>(&self, op: F) -> Result<T, MailboxError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Session) -> Result<T, MailboxError> + Send + 'static,
    {
        let session = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || {
            let mut guard = session
                .lock()
                .map_err(|_| MailboxError::Protocol("session lock poisoned".into()))?;
            let session = guard
                .as_mut()
                .ok_or_else(|| MailboxError::Protocol("mailbox is not open".into()))?;
            op(session)
        })
        .await
        .map_err(|e| MailboxError::Protocol(format!("IMAP task panicked: {e}")))?
    }
}

#[async_trait]
impl Mailbox for ImapMailbox {
    fn name(&self) -> &str {
        &self.config.host
    }

    async fn open(&self) -> Result<(), MailboxError> {
        let config = self.config.clone();
        let session = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || {
            let fresh = Session::connect(&config)?;
            let mut guard = session
                .lock()
                .map_err(|_| MailboxError::Protocol("session lock poisoned".into()))?;
            if let Some(mut old) = guard.replace(fresh) {
                old.logout();
            }
            tracing::info!(host = %config.host, mailbox = %config.mailbox, "IMAP session opened");
            Ok(())
        })
        .await
        .map_err(|e| MailboxError::Protocol(format!("IMAP task panicked: {e}")))?
    }

    async fn close(&self) {
        let session = Arc::clone(&self.session);
        let _ = tokio::task::spawn_blocking(move || {
            if let Ok(mut guard) = session.lock()
                && let Some(mut s) = guard.take()
            {
                s.logout();
            }
        })
        .await;
    }

    async fn search_unprocessed(&self, since: DateTime<Utc>) -> Result<Vec<u32>, MailboxError> {
        self.with_session(move |s| s.search_since(since)).await
    }

    async fn fetch(&self, uid: u32) -> Result<FetchedMessage, MailboxError> {
        self.with_session(move |s| s.fetch(uid)).await
    }

    async fn add_flags(&self, uid: u32, flags: &[Flag]) -> Result<(), MailboxError> {
        let flags = flags.to_vec();
        self.with_session(move |s| s.add_flags(uid, &flags)).await
    }

    async fn move_to(&self, uid: u32, folder: &str) -> Result<(), MailboxError> {
        let folder = folder.to_string();
        self.with_session(move |s| s.move_to(uid, &folder)).await
    }
}
