//! Mailbox abstraction: search, fetch and mutate messages by uid.
//!
//! Implementations are pure I/O. Classification and the choice of side
//! effect live in the pipeline.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mail_parser::{MessageParser, MimeHeaders};

use crate::error::MailboxError;
use crate::pipeline::types::Message;

/// IMAP system flags, plus anything else the server reports.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Flag {
    Seen,
    Flagged,
    Answered,
    Deleted,
    Draft,
    Other(String),
}

impl Flag {
    /// Parse one IMAP flag atom such as `\Seen`.
    pub fn parse(atom: &str) -> Self {
        match atom.to_ascii_lowercase().as_str() {
            "\\seen" => Self::Seen,
            "\\flagged" => Self::Flagged,
            "\\answered" => Self::Answered,
            "\\deleted" => Self::Deleted,
            "\\draft" => Self::Draft,
            _ => Self::Other(atom.to_string()),
        }
    }

    /// Wire form of the flag.
    pub fn as_imap(&self) -> &str {
        match self {
            Self::Seen => "\\Seen",
            Self::Flagged => "\\Flagged",
            Self::Answered => "\\Answered",
            Self::Deleted => "\\Deleted",
            Self::Draft => "\\Draft",
            Self::Other(atom) => atom,
        }
    }
}

/// Raw message content plus its structural attributes.
#[derive(Debug, Clone)]
pub struct FetchedMessage {
    pub uid: u32,
    pub flags: Vec<Flag>,
    /// Full RFC 5322 bytes.
    pub raw: Vec<u8>,
}

/// Source and sink for scanned messages.
///
/// Every operation is fallible; the pipeline treats fetch and mutation
/// failures as per-message problems.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Name for logs (e.g. the host).
    fn name(&self) -> &str;

    /// Establish the session. Failure here aborts the scan.
    async fn open(&self) -> Result<(), MailboxError> {
        Ok(())
    }

    /// End the session. Errors are only logged.
    async fn close(&self) {}

    /// Uids of unread, non-flagged messages received since `since`, oldest first.
    async fn search_unprocessed(&self, since: DateTime<Utc>) -> Result<Vec<u32>, MailboxError>;

    /// Full content of one message. Must not mark it seen.
    async fn fetch(&self, uid: u32) -> Result<FetchedMessage, MailboxError>;

    async fn add_flags(&self, uid: u32, flags: &[Flag]) -> Result<(), MailboxError>;

    async fn move_to(&self, uid: u32, folder: &str) -> Result<(), MailboxError>;
}

// ── Parsing ─────────────────────────────────────────────────────────

/// Turn fetched bytes into a pipeline `Message`.
///
/// Unparseable input still yields a message (with placeholder fields) so
/// it can be classified on whatever is there.
pub fn parse_message(fetched: &FetchedMessage) -> Message {
    match MessageParser::default().parse(&fetched.raw) {
        Some(parsed) => Message {
            uid: fetched.uid,
            subject: parsed.subject().unwrap_or("(no subject)").to_string(),
            sender: extract_sender(&parsed),
            date: parsed
                .date()
                .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0)),
            body: extract_text(&parsed),
            flags: fetched.flags.clone(),
        },
        None => Message {
            uid: fetched.uid,
            subject: "(no subject)".to_string(),
            sender: "unknown".to_string(),
            date: None,
            body: String::from_utf8_lossy(&fetched.raw).into_owned(),
            flags: fetched.flags.clone(),
        },
    }
}

/// Display form of the first `From` address: `Name <addr>` or `addr`.
fn extract_sender(parsed: &mail_parser::Message) -> String {
    let Some(addr) = parsed.from().and_then(|a| a.first()) else {
        return "unknown".to_string();
    };
    match (addr.name(), addr.address()) {
        (Some(name), Some(address)) => format!("{name} <{address}>"),
        (None, Some(address)) => address.to_string(),
        (Some(name), None) => name.to_string(),
        (None, None) => "unknown".to_string(),
    }
}

/// Readable text of a parsed email. `body_text` already falls back to the
/// HTML part converted to plain text, so only text attachments remain.
fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.to_string();
    }
    for part in parsed.attachments() {
        if let Some(ct) = MimeHeaders::content_type(part)
            && ct.ctype() == "text"
            && let Ok(text) = std::str::from_utf8(part.contents())
        {
            return text.to_string();
        }
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetched(raw: &str) -> FetchedMessage {
        FetchedMessage {
            uid: 12,
            flags: vec![Flag::Seen],
            raw: raw.as_bytes().to_vec(),
        }
    }

    #[test]
    fn flag_parse_roundtrips_system_flags() {
        for flag in [Flag::Seen, Flag::Flagged, Flag::Answered, Flag::Deleted, Flag::Draft] {
            assert_eq!(Flag::parse(flag.as_imap()), flag);
        }
        assert_eq!(Flag::parse("\\FLAGGED"), Flag::Flagged);
        assert_eq!(Flag::parse("$Junk"), Flag::Other("$Junk".into()));
    }

    #[test]
    fn parse_plain_text_message() {
        let raw = "From: Shop <orders@shop.example>\r\n\
                   To: me@example.com\r\n\
                   Subject: Your receipt #123\r\n\
                   Date: Thu, 01 Oct 2026 09:30:00 +0000\r\n\
                   Content-Type: text/plain; charset=utf-8\r\n\
                   \r\n\
                   Total: $42.00\r\n";
        let message = parse_message(&fetched(raw));
        assert_eq!(message.uid, 12);
        assert_eq!(message.subject, "Your receipt #123");
        assert_eq!(message.sender, "Shop <orders@shop.example>");
        assert_eq!(
            message.date.unwrap().to_rfc3339(),
            "2026-10-01T09:30:00+00:00"
        );
        assert!(message.body.contains("Total: $42.00"));
        assert_eq!(message.flags, vec![Flag::Seen]);
    }

    #[test]
    fn parse_date_honors_timezone() {
        let raw = "From: a@example.com\r\n\
                   Subject: tz\r\n\
                   Date: Thu, 01 Oct 2026 11:30:00 +0200\r\n\
                   \r\n\
                   hi\r\n";
        let message = parse_message(&fetched(raw));
        assert_eq!(
            message.date.unwrap().to_rfc3339(),
            "2026-10-01T09:30:00+00:00"
        );
    }

    #[test]
    fn parse_html_only_message() {
        let raw = "From: news@letter.example\r\n\
                   Subject: Weekly Newsletter\r\n\
                   Content-Type: text/html; charset=utf-8\r\n\
                   \r\n\
                   <html><body><h1>This week</h1><p>Top stories</p></body></html>\r\n";
        let message = parse_message(&fetched(raw));
        assert_eq!(message.sender, "news@letter.example");
        assert!(message.body.contains("This week"));
        assert!(message.body.contains("Top stories"));
        assert!(!message.body.contains('<'));
    }

    #[test]
    fn parse_missing_headers_uses_placeholders() {
        let message = parse_message(&fetched("\r\njust a body\r\n"));
        assert_eq!(message.subject, "(no subject)");
        assert_eq!(message.date, None);
    }

    #[test]
    fn parse_alternative_prefers_plain_part() {
        let raw = "From: shop@example.com\r\n\
                   Subject: Your receipt\r\n\
                   Content-Type: multipart/alternative; boundary=\"b1\"\r\n\
                   \r\n\
                   --b1\r\n\
                   Content-Type: text/plain; charset=utf-8\r\n\
                   \r\n\
                   Plain total: 12.00\r\n\
                   --b1\r\n\
                   Content-Type: text/html; charset=utf-8\r\n\
                   \r\n\
                   <p>Html total: 12.00</p>\r\n\
                   --b1--\r\n";
        let message = parse_message(&fetched(raw));
        assert!(message.body.contains("Plain total"));
        assert!(!message.body.contains("Html total"));
    }
}
