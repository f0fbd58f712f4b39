//! Classification pipeline.
//!
//! Every scan flows through:
//! 1. `Mailbox::search_unprocessed()` for unread, non-flagged candidates
//! 2. `Dispatcher::dispatch()` with bounded concurrency
//! 3. `Classifier::classify_message()`, cache first, then the oracle
//! 4. `ActionApplier::apply()` for flag, mark-read and move
//!
//! **Unknown verdicts never touch the mailbox.**

pub mod actions;
pub mod cache;
pub mod classifier;
pub mod dispatcher;
pub mod prompt;
pub mod scanner;
pub mod types;

pub use actions::{ActionApplier, ActionPolicy};
pub use cache::{VerdictCache, spawn_sweep_task};
pub use classifier::Classifier;
pub use dispatcher::Dispatcher;
pub use scanner::{Scanner, spawn_scan_loop};
pub use types::{ItemOutcome, Message, ScanOutcome, ScanReport, Verdict};
