//! Mailbox access.

pub mod imap;
pub mod mailbox;

pub use imap::ImapMailbox;
pub use mailbox::{FetchedMessage, Flag, Mailbox};
