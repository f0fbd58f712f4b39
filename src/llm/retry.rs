//! Retry policies and the retrying oracle client.
//!
//! Generic failures and rate limiting are budgeted independently: a
//! rate-limited attempt waits out a fixed cool-down and does not use up
//! a regular attempt until the cool-down budget is spent.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::config::OracleConfig;
use crate::error::{OracleError, OracleErrorKind};
use crate::llm::provider::{OracleBackend, OracleRequest};

/// Exponential backoff with jitter for generic failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay after the `failures`-th failure: `2^failures * base + random(0, base)`.
    pub fn backoff(&self, failures: u32) -> Duration {
        let base = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let jitter = if base == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..base)
        };
        let exp = 2u64.saturating_pow(failures).saturating_mul(base);
        Duration::from_millis(exp.saturating_add(jitter))
    }

    pub fn exhausted(&self, failures: u32) -> bool {
        failures >= self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(2_500),
        }
    }
}

/// Fixed cool-down for rate-limited attempts.
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    pub max_retries: u32,
    pub cooldown: Duration,
}

impl RateLimitPolicy {
    pub fn allows(&self, cooldowns_taken: u32) -> bool {
        cooldowns_taken < self.max_retries
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            cooldown: Duration::from_secs(61),
        }
    }
}

/// Oracle client: one backend call per attempt, each raced against a
/// timeout, wrapped in the two retry policies.
#[derive(Clone)]
pub struct OracleClient {
    backend: Arc<dyn OracleBackend>,
    retry: RetryPolicy,
    rate_limit: RateLimitPolicy,
    attempt_timeout: Duration,
}

impl OracleClient {
    pub fn new(backend: Arc<dyn OracleBackend>) -> Self {
        Self {
            backend,
            retry: RetryPolicy::default(),
            rate_limit: RateLimitPolicy::default(),
            attempt_timeout: Duration::from_millis(27_500),
        }
    }

    /// Build a client with the retry settings from `config`.
    pub fn from_config(backend: Arc<dyn OracleBackend>, config: &OracleConfig) -> Self {
        Self::new(backend)
            .with_retry(RetryPolicy {
                max_attempts: config.max_attempts,
                base_delay: Duration::from_millis(config.backoff_base_ms),
            })
            .with_rate_limit(RateLimitPolicy {
                max_retries: config.rate_limit_retries,
                cooldown: Duration::from_secs(config.rate_limit_cooldown_secs),
            })
            .with_attempt_timeout(Duration::from_millis(config.attempt_timeout_ms))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitPolicy) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Classify with retries. Returns the raw reply text, or a `Fatal`
    /// error once both budgets are spent.
    pub async fn classify(&self, request: &OracleRequest) -> Result<String, OracleError> {
        let mut failures = 0u32;
        let mut cooldowns = 0u32;

        loop {
            let error = match self.attempt(request).await {
                Ok(text) => return Ok(text),
                Err(e) => e,
            };

            match error.kind() {
                OracleErrorKind::RateLimited if self.rate_limit.allows(cooldowns) => {
                    cooldowns += 1;
                    warn!(
                        backend = self.backend.name(),
                        cooldown_secs = self.rate_limit.cooldown.as_secs(),
                        cooldowns,
                        "Hit rate limit, cooling down"
                    );
                    tokio::time::sleep(self.rate_limit.cooldown).await;
                    continue;
                }
                OracleErrorKind::Fatal => return Err(error),
                _ => {}
            }

            failures += 1;
            if self.retry.exhausted(failures) {
                return Err(OracleError::Fatal {
                    backend: self.backend.name().to_string(),
                    reason: format!(
                        "gave up after {failures} attempt(s) and {cooldowns} rate-limit cool-down(s): {error}"
                    ),
                });
            }

            let delay = self.retry.backoff(failures);
            warn!(
                backend = self.backend.name(),
                attempt = failures,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "Oracle attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt(&self, request: &OracleRequest) -> Result<String, OracleError> {
        debug!(backend = self.backend.name(), "Sending classification request");
        match tokio::time::timeout(self.attempt_timeout, self.backend.complete(request)).await {
            Ok(result) => result,
            Err(_) => Err(OracleError::Timeout {
                backend: self.backend.name().to_string(),
                timeout: self.attempt_timeout,
            }),
        }
    }
}
