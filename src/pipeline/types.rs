//! Shared types for the classification pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::channels::mailbox::Flag;

// ── Message ─────────────────────────────────────────────────────────

/// Read-only snapshot of one mailbox message, taken during a scan.
///
/// The pipeline never mutates it; mailbox state only changes through
/// `ActionApplier`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Mailbox-assigned unique id.
    pub uid: u32,
    pub subject: String,
    /// Display form of the `From` header.
    pub sender: String,
    pub date: Option<DateTime<Utc>>,
    /// Plain-text body (HTML-only messages are stripped to text).
    pub body: String,
    pub flags: Vec<Flag>,
}

impl Message {
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::new(&self.subject, &self.sender, self.date)
    }

    pub fn is_flagged(&self) -> bool {
        self.flags.contains(&Flag::Flagged)
    }

    /// First `max` characters of the body on a single line, for logs.
    pub fn body_preview(&self, max: usize) -> String {
        let collapsed = self.body.split_whitespace().collect::<Vec<_>>().join(" ");
        collapsed.chars().take(max).collect()
    }
}

// ── Fingerprint ─────────────────────────────────────────────────────

/// Cache key over (subject, sender, date).
///
/// Two fetches of the same logical message share a fingerprint even when
/// their uids differ.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(subject: &str, sender: &str, date: Option<DateTime<Utc>>) -> Self {
        let date = date.map(|d| d.to_rfc3339()).unwrap_or_default();
        // Unit separator keeps ("a-b", "c") distinct from ("a", "b-c").
        Self(format!("{subject}\u{1f}{sender}\u{1f}{date}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ── Verdict ─────────────────────────────────────────────────────────

/// Outcome of classifying one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "judgment", rename_all = "snake_case")]
pub enum Verdict {
    /// Meets the keep criteria.
    Keep { category: String, explanation: String },
    /// Meets the reject criteria; `category` picks the destination folder.
    Reject { category: String, explanation: String },
    /// No usable classification. No mailbox action follows.
    Unknown { reason: String },
}

impl Verdict {
    /// `Some(true)` for keep, `Some(false)` for reject, `None` when unknown.
    pub fn judgment(&self) -> Option<bool> {
        match self {
            Self::Keep { .. } => Some(true),
            Self::Reject { .. } => Some(false),
            Self::Unknown { .. } => None,
        }
    }

    pub fn category(&self) -> Option<&str> {
        match self {
            Self::Keep { category, .. } | Self::Reject { category, .. } => Some(category),
            Self::Unknown { .. } => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown { .. })
    }

    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Keep { .. } => "keep",
            Self::Reject { .. } => "reject",
            Self::Unknown { .. } => "unknown",
        }
    }
}

// ── Per-item outcome ────────────────────────────────────────────────

/// Terminal state of one message in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Kept in place; `flagged` is whether the flag was set successfully.
    Kept { flagged: bool },
    /// Rejected; `moved` is whether the move succeeded.
    Rejected {
        folder: String,
        marked_seen: bool,
        moved: bool,
    },
    /// Classification unavailable; message left as found.
    Unclassified,
    /// Already flagged when fetched; not classified.
    Skipped,
    /// Could not be fetched or its task died.
    Failed { reason: String },
}

impl ItemOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Kept { .. } => "kept",
            Self::Rejected { .. } => "rejected",
            Self::Unclassified => "unclassified",
            Self::Skipped => "skipped",
            Self::Failed { .. } => "failed",
        }
    }
}

/// A message that reached the `Failed` state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub uid: u32,
    pub reason: String,
}

// ── Batch report ────────────────────────────────────────────────────

/// Aggregated result of one dispatched batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Messages admitted into the pipeline.
    pub examined: usize,
    pub kept: usize,
    pub rejected: usize,
    pub unclassified: usize,
    pub skipped: usize,
    pub failures: Vec<ItemFailure>,
    /// Candidates beyond the per-scan cap, left for the next scan.
    pub deferred: usize,
    /// Last admitted uid when candidates were deferred; the next scan
    /// starts after it.
    pub resume_after: Option<u32>,
}

impl ScanReport {
    pub fn record(&mut self, uid: u32, outcome: &ItemOutcome) {
        self.examined += 1;
        match outcome {
            ItemOutcome::Kept { .. } => self.kept += 1,
            ItemOutcome::Rejected { .. } => self.rejected += 1,
            ItemOutcome::Unclassified => self.unclassified += 1,
            ItemOutcome::Skipped => self.skipped += 1,
            ItemOutcome::Failed { reason } => self.failures.push(ItemFailure {
                uid,
                reason: reason.clone(),
            }),
        }
    }

    /// Messages that got a definite verdict and its action.
    pub fn processed(&self) -> usize {
        self.kept + self.rejected
    }

    pub fn truncated(&self) -> bool {
        self.deferred > 0
    }
}

/// Result of a scan that completed. Scan failures are `ScanError`s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// The search found nothing eligible.
    NoMessages,
    /// A batch was dispatched and fully resolved.
    Completed(ScanReport),
}

impl ScanOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::NoMessages => "no_messages",
            Self::Completed(_) => "completed",
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn message(uid: u32, subject: &str) -> Message {
        Message {
            uid,
            subject: subject.to_string(),
            sender: "Shop <orders@shop.example>".to_string(),
            date: Some(Utc.with_ymd_and_hms(2026, 10, 1, 9, 30, 0).unwrap()),
            body: "Thanks\n\n  for   your order".to_string(),
            flags: vec![],
        }
    }

    #[test]
    fn fingerprint_ignores_uid() {
        assert_eq!(
            message(1, "Your receipt #123").fingerprint(),
            message(99, "Your receipt #123").fingerprint()
        );
    }

    #[test]
    fn fingerprint_distinguishes_fields() {
        assert_ne!(
            message(1, "Your receipt #123").fingerprint(),
            message(1, "Your receipt #124").fingerprint()
        );
        assert_ne!(
            Fingerprint::new("a-b", "c", None),
            Fingerprint::new("a", "b-c", None)
        );
    }

    #[test]
    fn fingerprint_includes_date() {
        let mut undated = message(1, "Hi");
        undated.date = None;
        assert_ne!(undated.fingerprint(), message(1, "Hi").fingerprint());
    }

    #[test]
    fn body_preview_is_single_line() {
        assert_eq!(message(1, "x").body_preview(100), "Thanks for your order");
        assert_eq!(message(1, "x").body_preview(6), "Thanks");
    }

    #[test]
    fn flagged_detection() {
        let mut msg = message(1, "x");
        assert!(!msg.is_flagged());
        msg.flags.push(Flag::Flagged);
        assert!(msg.is_flagged());
    }

    #[test]
    fn verdict_accessors() {
        let keep = Verdict::Keep {
            category: "Finance".into(),
            explanation: "receipt".into(),
        };
        assert_eq!(keep.judgment(), Some(true));
        assert_eq!(keep.category(), Some("Finance"));

        let unknown = Verdict::Unknown {
            reason: "timeout".into(),
        };
        assert_eq!(unknown.judgment(), None);
        assert_eq!(unknown.category(), None);
        assert!(unknown.is_unknown());
    }

    #[test]
    fn verdict_serialization_is_tagged() {
        let reject = Verdict::Reject {
            category: "Newsletter".into(),
            explanation: "bulk".into(),
        };
        let json = serde_json::to_value(&reject).unwrap();
        assert_eq!(json["judgment"], "reject");
        assert_eq!(json["category"], "Newsletter");
    }

    #[test]
    fn report_counts_outcomes() {
        let mut report = ScanReport::default();
        report.record(1, &ItemOutcome::Kept { flagged: true });
        report.record(
            2,
            &ItemOutcome::Rejected {
                folder: "Rejected".into(),
                marked_seen: false,
                moved: true,
            },
        );
        report.record(3, &ItemOutcome::Unclassified);
        report.record(4, &ItemOutcome::Skipped);
        report.record(
            5,
            &ItemOutcome::Failed {
                reason: "fetch".into(),
            },
        );

        assert_eq!(report.examined, 5);
        assert_eq!(report.processed(), 2);
        assert_eq!(report.unclassified, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failures[0].uid, 5);
        assert!(!report.truncated());
    }
}
