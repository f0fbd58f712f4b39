//! Verdict → mailbox side effects.
//!
//! Keep: optionally flag, never move or mark seen.
//! Reject: optionally mark seen, then move to the resolved folder.
//! Unknown: leave the message exactly as found.
//!
//! Mutation failures are logged and reported in the outcome; they never
//! fail the scan.

use std::sync::Arc;

use tracing::{info, warn};

use crate::channels::mailbox::{Flag, Mailbox};
use crate::config::ScanSettings;
use crate::pipeline::types::{ItemOutcome, Message, Verdict};

/// Which side effects apply, and where rejects go.
#[derive(Debug, Clone)]
pub struct ActionPolicy {
    pub star_kept: bool,
    pub mark_rejected_read: bool,
    pub sort_into_category_folders: bool,
    pub rejected_folder: String,
}

impl From<&ScanSettings> for ActionPolicy {
    fn from(settings: &ScanSettings) -> Self {
        Self {
            star_kept: settings.star_kept,
            mark_rejected_read: settings.mark_rejected_read,
            sort_into_category_folders: settings.sort_into_category_folders,
            rejected_folder: settings.rejected_folder.clone(),
        }
    }
}

/// Applies verdicts to the mailbox.
pub struct ActionApplier {
    mailbox: Arc<dyn Mailbox>,
    policy: ActionPolicy,
}

impl ActionApplier {
    pub fn new(mailbox: Arc<dyn Mailbox>, policy: ActionPolicy) -> Self {
        Self { mailbox, policy }
    }

    /// Destination folder for a rejected message.
    pub fn resolve_folder<'a>(&'a self, category: &'a str) -> &'a str {
        if self.policy.sort_into_category_folders {
            category
        } else {
            &self.policy.rejected_folder
        }
    }

    /// Perform the side effects for one verdict.
    pub async fn apply(&self, message: &Message, verdict: &Verdict) -> ItemOutcome {
        match verdict {
            Verdict::Unknown { .. } => ItemOutcome::Unclassified,
            Verdict::Keep { category, .. } => {
                let flagged = self.policy.star_kept
                    && self.add_flag(message.uid, Flag::Flagged, "flag kept message").await;
                info!(uid = message.uid, category = %category, flagged, "Kept message");
                ItemOutcome::Kept { flagged }
            }
            Verdict::Reject { category, .. } => {
                let marked_seen = self.policy.mark_rejected_read
                    && self.add_flag(message.uid, Flag::Seen, "mark rejected message read").await;

                let folder = self.resolve_folder(category).to_string();
                let moved = match self.mailbox.move_to(message.uid, &folder).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(uid = message.uid, folder = %folder, error = %e, "Failed to move rejected message");
                        false
                    }
                };
                info!(uid = message.uid, folder = %folder, marked_seen, moved, "Rejected message");

                ItemOutcome::Rejected {
                    folder,
                    marked_seen,
                    moved,
                }
            }
        }
    }

    async fn add_flag(&self, uid: u32, flag: Flag, what: &str) -> bool {
        match self.mailbox.add_flags(uid, &[flag]).await {
            Ok(()) => true,
            Err(e) => {
                warn!(uid, error = %e, "Failed to {what}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use super::*;
    use crate::channels::mailbox::FetchedMessage;
    use crate::error::MailboxError;

    /// Records every mutation; optionally fails moves.
    #[derive(Default)]
    struct RecordingMailbox {
        flags: Mutex<Vec<(u32, Flag)>>,
        moves: Mutex<Vec<(u32, String)>>,
        fail_moves: bool,
    }

    #[async_trait]
    impl Mailbox for RecordingMailbox {
        fn name(&self) -> &str {
            "recording"
        }

        async fn search_unprocessed(&self, _since: DateTime<Utc>) -> Result<Vec<u32>, MailboxError> {
            Ok(vec![])
        }

        async fn fetch(&self, uid: u32) -> Result<FetchedMessage, MailboxError> {
            Err(MailboxError::Fetch {
                uid,
                reason: "not stored".into(),
            })
        }

        async fn add_flags(&self, uid: u32, flags: &[Flag]) -> Result<(), MailboxError> {
            let mut recorded = self.flags.lock().unwrap();
            recorded.extend(flags.iter().map(|f| (uid, f.clone())));
            Ok(())
        }

        async fn move_to(&self, uid: u32, folder: &str) -> Result<(), MailboxError> {
            if self.fail_moves {
                return Err(MailboxError::Move {
                    uid,
                    folder: folder.into(),
                    reason: "no such folder".into(),
                });
            }
            self.moves.lock().unwrap().push((uid, folder.into()));
            Ok(())
        }
    }

    fn message() -> Message {
        Message {
            uid: 9,
            subject: "Weekly Newsletter".into(),
            sender: "news@letter.example".into(),
            date: None,
            body: String::new(),
            flags: vec![],
        }
    }

    fn policy(star: bool, mark_read: bool, by_category: bool) -> ActionPolicy {
        ActionPolicy {
            star_kept: star,
            mark_rejected_read: mark_read,
            sort_into_category_folders: by_category,
            rejected_folder: "Rejected".into(),
        }
    }

    fn reject() -> Verdict {
        Verdict::Reject {
            category: "Newsletter".into(),
            explanation: "bulk mail".into(),
        }
    }

    fn keep() -> Verdict {
        Verdict::Keep {
            category: "Finance".into(),
            explanation: "receipt".into(),
        }
    }

    #[test]
    fn folder_resolution() {
        let mailbox: Arc<dyn Mailbox> = Arc::new(RecordingMailbox::default());
        let by_category = ActionApplier::new(Arc::clone(&mailbox), policy(false, false, true));
        assert_eq!(by_category.resolve_folder("Newsletter"), "Newsletter");

        let fixed = ActionApplier::new(mailbox, policy(false, false, false));
        assert_eq!(fixed.resolve_folder("Newsletter"), "Rejected");
    }

    #[tokio::test]
    async fn keep_with_star_only_flags() {
        let mailbox = Arc::new(RecordingMailbox::default());
        let applier = ActionApplier::new(mailbox.clone(), policy(true, true, true));

        let outcome = applier.apply(&message(), &keep()).await;

        assert_eq!(outcome, ItemOutcome::Kept { flagged: true });
        assert_eq!(*mailbox.flags.lock().unwrap(), vec![(9, Flag::Flagged)]);
        assert!(mailbox.moves.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn keep_without_star_touches_nothing() {
        let mailbox = Arc::new(RecordingMailbox::default());
        let applier = ActionApplier::new(mailbox.clone(), policy(false, true, true));

        let outcome = applier.apply(&message(), &keep()).await;

        assert_eq!(outcome, ItemOutcome::Kept { flagged: false });
        assert!(mailbox.flags.lock().unwrap().is_empty());
        assert!(mailbox.moves.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn reject_marks_read_then_moves_to_category() {
        let mailbox = Arc::new(RecordingMailbox::default());
        let applier = ActionApplier::new(mailbox.clone(), policy(true, true, true));

        let outcome = applier.apply(&message(), &reject()).await;

        assert_eq!(
            outcome,
            ItemOutcome::Rejected {
                folder: "Newsletter".into(),
                marked_seen: true,
                moved: true,
            }
        );
        assert_eq!(*mailbox.flags.lock().unwrap(), vec![(9, Flag::Seen)]);
        assert_eq!(*mailbox.moves.lock().unwrap(), vec![(9, "Newsletter".to_string())]);
    }

    #[tokio::test]
    async fn reject_to_fixed_folder_without_marking() {
        let mailbox = Arc::new(RecordingMailbox::default());
        let applier = ActionApplier::new(mailbox.clone(), policy(false, false, false));

        applier.apply(&message(), &reject()).await;

        assert!(mailbox.flags.lock().unwrap().is_empty());
        assert_eq!(*mailbox.moves.lock().unwrap(), vec![(9, "Rejected".to_string())]);
    }

    #[tokio::test]
    async fn unknown_leaves_message_alone() {
        let mailbox = Arc::new(RecordingMailbox::default());
        let applier = ActionApplier::new(mailbox.clone(), policy(true, true, true));

        let outcome = applier
            .apply(&message(), &Verdict::Unknown { reason: "timeout".into() })
            .await;

        assert_eq!(outcome, ItemOutcome::Unclassified);
        assert!(mailbox.flags.lock().unwrap().is_empty());
        assert!(mailbox.moves.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_move_is_reported_not_raised() {
        let mailbox = Arc::new(RecordingMailbox {
            fail_moves: true,
            ..Default::default()
        });
        let applier = ActionApplier::new(mailbox, policy(false, false, false));

        let outcome = applier.apply(&message(), &reject()).await;

        assert_eq!(
            outcome,
            ItemOutcome::Rejected {
                folder: "Rejected".into(),
                marked_seen: false,
                moved: false,
            }
        );
    }
}
