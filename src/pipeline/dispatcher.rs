//! Bounded-concurrency batch dispatch.
//!
//! Each candidate runs fetch → classify → act as its own task. At most
//! `concurrency` sequences are in flight; the next starts as soon as one
//! finishes. A panicking or failing item never affects its siblings.

use std::sync::Arc;

use futures::StreamExt;
use futures::stream;
use tracing::{debug, info, warn};

use crate::channels::mailbox::{Mailbox, parse_message};
use crate::config::ScanSettings;
use crate::pipeline::actions::ActionApplier;
use crate::pipeline::classifier::Classifier;
use crate::pipeline::types::{ItemOutcome, ScanReport};

/// Runs one batch of candidate uids through the pipeline.
pub struct Dispatcher {
    mailbox: Arc<dyn Mailbox>,
    classifier: Arc<Classifier>,
    applier: Arc<ActionApplier>,
    concurrency: usize,
    max_items: usize,
}

impl Dispatcher {
    pub fn new(
        mailbox: Arc<dyn Mailbox>,
        classifier: Arc<Classifier>,
        applier: Arc<ActionApplier>,
        settings: &ScanSettings,
    ) -> Self {
        Self {
            mailbox,
            classifier,
            applier,
            concurrency: settings.concurrency.max(1),
            max_items: settings.max_items_per_scan.max(1),
        }
    }

    /// Process up to `max_items` of `uids` and wait for all of them.
    ///
    /// Admission resumes after `resume_after`, so a backlog larger than the
    /// cap is worked through over successive scans instead of re-admitting
    /// the lowest uids every time. Uids past the cap are counted as deferred
    /// and left untouched.
    pub async fn dispatch(&self, mut uids: Vec<u32>, resume_after: Option<u32>) -> ScanReport {
        uids.sort_unstable();
        uids.dedup();

        // Start over when nothing lies past the cursor, e.g. after the
        // mailbox renumbered its uids.
        let start = match resume_after {
            Some(cursor) if uids.last().is_some_and(|&last| last > cursor) => {
                uids.partition_point(|&uid| uid <= cursor)
            }
            _ => 0,
        };
        let pending = &uids[start..];
        let batch: Vec<u32> = pending.iter().copied().take(self.max_items).collect();

        let mut report = ScanReport {
            deferred: pending.len() - batch.len(),
            ..Default::default()
        };
        if report.deferred > 0 {
            report.resume_after = batch.last().copied();
            info!(
                admitted = batch.len(),
                deferred = report.deferred,
                resume_after = ?report.resume_after,
                "Candidate count exceeds per-scan cap"
            );
        }

        let mut results = stream::iter(batch)
            .map(|uid| {
                let mailbox = Arc::clone(&self.mailbox);
                let classifier = Arc::clone(&self.classifier);
                let applier = Arc::clone(&self.applier);
                async move {
                    let task =
                        tokio::spawn(async move { process_item(uid, mailbox, classifier, applier).await });
                    let outcome = match task.await {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            warn!(uid, error = %e, "Item task died");
                            ItemOutcome::Failed {
                                reason: format!("task failed: {e}"),
                            }
                        }
                    };
                    (uid, outcome)
                }
            })
            .buffer_unordered(self.concurrency);

        while let Some((uid, outcome)) = results.next().await {
            debug!(uid, outcome = outcome.label(), "Item finished");
            report.record(uid, &outcome);
        }

        report
    }
}

/// fetch → parse → guard → classify → act for one uid.
async fn process_item(
    uid: u32,
    mailbox: Arc<dyn Mailbox>,
    classifier: Arc<Classifier>,
    applier: Arc<ActionApplier>,
) -> ItemOutcome {
    let fetched = match mailbox.fetch(uid).await {
        Ok(fetched) => fetched,
        Err(e) => {
            warn!(uid, error = %e, "Failed to fetch message");
            return ItemOutcome::Failed {
                reason: e.to_string(),
            };
        }
    };

    let message = parse_message(&fetched);

    // Flagged between search and fetch: someone already handled it.
    if message.is_flagged() {
        debug!(uid, subject = %message.subject, "Already flagged, skipping");
        return ItemOutcome::Skipped;
    }

    let verdict = classifier.classify_message(&message).await;
    applier.apply(&message, &verdict).await
}
