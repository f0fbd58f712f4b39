//! Classification pipeline: one message in, one canonical verdict out.
//!
//! Flow:
//! 1. Fingerprint → cache lookup (hit returns without an oracle call)
//! 2. Prompt construction with the truncated body
//! 3. Oracle call with retries
//! 4. Normalize, parse and validate the reply
//! 5. Cache the verdict; concurrent misses on one fingerprint share the call
//!
//! Every failure degrades to `Verdict::Unknown`; nothing here returns an error.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{OracleBackendKind, OracleConfig, RuleSet, ScanSettings};
use crate::error::ParseError;
use crate::llm::normalize::{OracleReply, parse_reply};
use crate::llm::retry::OracleClient;
use crate::pipeline::cache::VerdictCache;
use crate::pipeline::prompt::build_request;
use crate::pipeline::types::{Message, Verdict};

/// Characters of body shown in the classification log line.
const LOG_PREVIEW_CHARS: usize = 100;

const REMOTE_TEMPERATURE: f64 = 1.0;

/// Classifies messages against a fixed rule set.
pub struct Classifier {
    oracle: OracleClient,
    cache: Arc<VerdictCache>,
    rules: Arc<RuleSet>,
    max_body_chars: usize,
    cache_unknown: bool,
    temperature: Option<f64>,
    max_tokens: Option<u64>,
}

impl Classifier {
    pub fn new(oracle: OracleClient, cache: Arc<VerdictCache>, rules: Arc<RuleSet>) -> Self {
        let defaults = ScanSettings::default();
        Self {
            oracle,
            cache,
            rules,
            max_body_chars: defaults.max_body_chars,
            cache_unknown: defaults.cache_unknown,
            temperature: None,
            max_tokens: None,
        }
    }

    /// Apply body limit and unknown-caching policy from scan settings.
    pub fn with_settings(mut self, settings: &ScanSettings) -> Self {
        self.max_body_chars = settings.max_body_chars;
        self.cache_unknown = settings.cache_unknown;
        self
    }

    /// Apply sampling parameters from the oracle config.
    ///
    /// Remote backends default to temperature 1.0; the local backend
    /// applies its own default.
    pub fn with_sampling(mut self, oracle: &OracleConfig) -> Self {
        self.temperature = oracle.temperature.or(match oracle.backend {
            OracleBackendKind::Local => None,
            OracleBackendKind::OpenAi | OracleBackendKind::Anthropic => Some(REMOTE_TEMPERATURE),
        });
        self.max_tokens = oracle.max_tokens;
        self
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Classify one message.
    pub async fn classify_message(&self, message: &Message) -> Verdict {
        let fingerprint = message.fingerprint();

        if let Some(cached) = self.cache.get(&fingerprint).await {
            debug!(
                uid = message.uid,
                verdict = cached.label(),
                "Verdict cache hit, skipping oracle"
            );
            return cached;
        }

        // Same-fingerprint messages in flight together share one oracle call.
        self.cache
            .get_or_resolve(&fingerprint, self.cache_unknown, || self.ask_oracle(message))
            .await
    }

    async fn ask_oracle(&self, message: &Message) -> Verdict {
        let request = build_request(
            &self.rules,
            message,
            self.max_body_chars,
            self.temperature,
            self.max_tokens,
        );

        let verdict = match self.oracle.classify(&request).await {
            Ok(raw) => match self.interpret(&raw) {
                Ok(verdict) => verdict,
                Err(e) => {
                    warn!(
                        uid = message.uid,
                        raw_response = %e.raw(),
                        error = %e,
                        "Malformed oracle reply, leaving message unclassified"
                    );
                    Verdict::Unknown {
                        reason: e.to_string(),
                    }
                }
            },
            Err(e) => {
                warn!(
                    uid = message.uid,
                    backend = self.oracle.backend_name(),
                    error = %e,
                    "Oracle unavailable, leaving message unclassified"
                );
                Verdict::Unknown {
                    reason: e.to_string(),
                }
            }
        };

        log_verdict(message, &verdict);
        verdict
    }

    /// Parse a raw reply. Rejects must name an allowed category, since it
    /// picks their destination folder; keeps may carry any or none.
    fn interpret(&self, raw: &str) -> Result<Verdict, ParseError> {
        let OracleReply {
            meets_criteria,
            explanation,
            category,
        } = parse_reply(raw)?;

        let category = category.trim().to_string();
        if meets_criteria {
            return Ok(Verdict::Keep {
                category,
                explanation,
            });
        }

        if !self.rules.allows_category(&category) {
            return Err(ParseError::UnknownCategory {
                category,
                raw: raw.to_string(),
            });
        }
        Ok(Verdict::Reject {
            category,
            explanation,
        })
    }
}

fn log_verdict(message: &Message, verdict: &Verdict) {
    let date = message
        .date
        .map(|d| d.to_rfc3339())
        .unwrap_or_else(|| "(no date)".to_string());
    match verdict {
        Verdict::Keep {
            category,
            explanation,
        }
        | Verdict::Reject {
            category,
            explanation,
        } => info!(
            uid = message.uid,
            sender = %message.sender,
            date = %date,
            subject = %message.subject,
            body = %message.body_preview(LOG_PREVIEW_CHARS),
            category = %category,
            meets_criteria = verdict.judgment().unwrap_or_default(),
            explanation = %explanation,
            "Classified message"
        ),
        Verdict::Unknown { reason } => info!(
            uid = message.uid,
            sender = %message.sender,
            subject = %message.subject,
            reason = %reason,
            "Message left unclassified"
        ),
    }
}
