//! Oracle backend abstraction.

use async_trait::async_trait;

use crate::error::OracleError;

/// One classification request: a system role, a user prompt and sampling limits.
#[derive(Debug, Clone)]
pub struct OracleRequest {
    pub system: String,
    pub user: String,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
}

impl OracleRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: Option<f64>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u64>) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// A text-classification backend. One call is one attempt; retrying is
/// the caller's job.
#[async_trait]
pub trait OracleBackend: Send + Sync {
    /// Backend name for logs and errors.
    fn name(&self) -> &str;

    /// Send the request once and return the raw reply text.
    async fn complete(&self, request: &OracleRequest) -> Result<String, OracleError>;
}

/// Map a backend failure message onto the retry taxonomy.
///
/// Providers surface HTTP status codes inside their error text, so
/// rate limiting and authentication problems are recognized from it.
pub fn classify_failure(backend: &str, reason: String) -> OracleError {
    let lower = reason.to_lowercase();
    if lower.contains("429") || lower.contains("rate limit") || lower.contains("rate_limit") {
        OracleError::RateLimited {
            backend: backend.to_string(),
            reason,
        }
    } else if lower.contains("401")
        || lower.contains("403")
        || lower.contains("invalid api key")
        || lower.contains("invalid x-api-key")
        || lower.contains("authentication")
    {
        OracleError::Fatal {
            backend: backend.to_string(),
            reason,
        }
    } else {
        OracleError::Transient {
            backend: backend.to_string(),
            reason,
        }
    }
}
