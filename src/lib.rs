//! Inbox Sift: incremental, oracle-driven mailbox triage.

pub mod channels;
pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod store;

pub use error::{Error, Result};
