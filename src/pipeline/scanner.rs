//! Scan orchestration.
//!
//! One scan:
//! 1. Load the checkpoint
//! 2. Open the mailbox and search for unread, non-flagged candidates
//! 3. Dispatch the batch and wait for every item
//! 4. Save the resume cursor, then the checkpoint exactly once
//!
//! Only mailbox session and checkpoint failures abort a scan.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::channels::mailbox::Mailbox;
use crate::error::ScanError;
use crate::pipeline::dispatcher::Dispatcher;
use crate::pipeline::types::{ScanOutcome, ScanReport};
use crate::store::checkpoint::CheckpointStore;

/// Ties the mailbox, dispatcher and checkpoint together.
pub struct Scanner {
    mailbox: Arc<dyn Mailbox>,
    dispatcher: Dispatcher,
    checkpoint: Arc<dyn CheckpointStore>,
}

impl Scanner {
    pub fn new(
        mailbox: Arc<dyn Mailbox>,
        dispatcher: Dispatcher,
        checkpoint: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            mailbox,
            dispatcher,
            checkpoint,
        }
    }

    /// Run one complete scan.
    pub async fn run_scan(&self) -> Result<ScanOutcome, ScanError> {
        let since = self.checkpoint.load().await?;
        let resume_after = self.checkpoint.load_cursor().await?;
        info!(
            mailbox = self.mailbox.name(),
            since = %since.to_rfc3339(),
            resume_after = ?resume_after,
            "Starting scan"
        );

        self.mailbox.open().await?;
        let result = self.scan_open_mailbox(since, resume_after).await;
        self.mailbox.close().await;
        let outcome = result?;

        // While a backlog is being worked off the timestamp stays put so the
        // search window still covers it; the cursor moves the batch along.
        let resume_after = match &outcome {
            ScanOutcome::Completed(report) => report.resume_after,
            ScanOutcome::NoMessages => None,
        };
        self.checkpoint.save_cursor(resume_after).await?;
        let next = if resume_after.is_some() {
            since
        } else {
            Utc::now().max(since)
        };
        self.checkpoint.save(next).await?;

        match &outcome {
            ScanOutcome::NoMessages => {
                info!(since = %since.to_rfc3339(), "No unread, non-flagged messages found")
            }
            ScanOutcome::Completed(report) => log_summary(report),
        }
        Ok(outcome)
    }

    async fn scan_open_mailbox(
        &self,
        since: DateTime<Utc>,
        resume_after: Option<u32>,
    ) -> Result<ScanOutcome, ScanError> {
        let uids = self.mailbox.search_unprocessed(since).await?;
        if uids.is_empty() {
            return Ok(ScanOutcome::NoMessages);
        }

        info!(candidates = uids.len(), "Found candidate message(s)");
        let report = self.dispatcher.dispatch(uids, resume_after).await;
        Ok(ScanOutcome::Completed(report))
    }
}

fn log_summary(report: &ScanReport) {
    info!(
        examined = report.examined,
        kept = report.kept,
        rejected = report.rejected,
        unclassified = report.unclassified,
        skipped = report.skipped,
        failed = report.failures.len(),
        deferred = report.deferred,
        "Finished processing {} message(s)",
        report.processed()
    );
    if report.truncated() {
        info!(
            deferred = report.deferred,
            resume_after = ?report.resume_after,
            "Backlog remains, next scan resumes past the last admitted uid"
        );
    }
    for failure in &report.failures {
        warn!(uid = failure.uid, reason = %failure.reason, "Message failed");
    }
}

/// Spawn a background task that runs a scan every `interval`.
///
/// Scans never overlap: the next tick waits for the running scan. Returns
/// a `JoinHandle` and a shutdown sender. Sending `true` stops the loop
/// while it waits for the next tick; a scan already running finishes and
/// saves its checkpoint first.
pub fn spawn_scan_loop(
    scanner: Arc<Scanner>,
    interval: Duration,
) -> (JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        info!("Scan loop started, scanning every {}s", interval.as_secs());

        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // First tick fires immediately.
        loop {
            tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    // A dropped sender also means shut down.
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Scan loop shutting down");
                        return;
                    }
                    continue;
                }
                _ = tick.tick() => {}
            }

            if let Err(e) = scanner.run_scan().await {
                error!(error = %e, "Scan failed");
            }
        }
    });

    (handle, shutdown_tx)
}
