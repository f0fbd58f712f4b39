//! Classification oracle integration.
//!
//! Supports:
//! - **OpenAI** and **Anthropic**: managed remote services via rig-core
//! - **Local**: a self-hosted OpenAI-compatible endpoint via reqwest
//!
//! Backends implement `OracleBackend` (one call per attempt); `OracleClient`
//! adds the attempt timeout, backoff and rate-limit cool-downs.

pub mod local;
pub mod normalize;
pub mod provider;
pub mod retry;
mod rig_adapter;

pub use local::LocalBackend;
pub use normalize::{OracleReply, normalize_reply, parse_reply};
pub use provider::{OracleBackend, OracleRequest};
pub use retry::{OracleClient, RateLimitPolicy, RetryPolicy};
pub use rig_adapter::RigAdapter;

use std::sync::Arc;

use rig::client::CompletionClient;
use secrecy::{ExposeSecret, SecretString};

use crate::config::{OracleBackendKind, OracleConfig};
use crate::error::OracleError;

/// Anthropic rejects requests without a token limit.
const ANTHROPIC_DEFAULT_MAX_TOKENS: u64 = 1024;

/// Create an oracle backend from configuration.
///
/// `api_key` is required for the remote backends and ignored for `Local`.
pub fn create_backend(
    config: &OracleConfig,
    api_key: Option<SecretString>,
) -> Result<Arc<dyn OracleBackend>, OracleError> {
    match config.backend {
        OracleBackendKind::OpenAi => create_openai_backend(config, require_key("openai", api_key)?),
        OracleBackendKind::Anthropic => {
            create_anthropic_backend(config, require_key("anthropic", api_key)?)
        }
        OracleBackendKind::Local => {
            tracing::info!("Using local oracle at {}", config.local_url);
            Ok(Arc::new(LocalBackend::new(&config.local_url)))
        }
    }
}

fn require_key(backend: &str, api_key: Option<SecretString>) -> Result<SecretString, OracleError> {
    api_key.ok_or_else(|| OracleError::Fatal {
        backend: backend.to_string(),
        reason: "no API key configured".to_string(),
    })
}

fn create_openai_backend(
    config: &OracleConfig,
    api_key: SecretString,
) -> Result<Arc<dyn OracleBackend>, OracleError> {
    use rig::providers::openai;

    let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
        openai::Client::new(api_key.expose_secret()).map_err(|e| OracleError::Fatal {
            backend: "openai".to_string(),
            reason: format!("Failed to create OpenAI client: {}", e),
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!("Using OpenAI (model: {})", config.model);
    Ok(Arc::new(RigAdapter::new(model, "openai", &config.model)))
}

fn create_anthropic_backend(
    config: &OracleConfig,
    api_key: SecretString,
) -> Result<Arc<dyn OracleBackend>, OracleError> {
    use rig::providers::anthropic;

    let client: rig::client::Client<anthropic::client::AnthropicExt> =
        anthropic::Client::new(api_key.expose_secret()).map_err(|e| OracleError::Fatal {
            backend: "anthropic".to_string(),
            reason: format!("Failed to create Anthropic client: {}", e),
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!("Using Anthropic (model: {})", config.model);
    Ok(Arc::new(
        RigAdapter::new(model, "anthropic", &config.model)
            .with_default_max_tokens(ANTHROPIC_DEFAULT_MAX_TOKENS),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_openai_backend_with_any_key() {
        // rig-core clients accept any string as API key at construction time.
        let config = OracleConfig::default();
        let backend = create_backend(&config, Some(SecretString::from("sk-test")));
        assert_eq!(backend.unwrap().name(), "openai");
    }

    #[test]
    fn create_anthropic_backend_with_any_key() {
        let config = OracleConfig {
            backend: OracleBackendKind::Anthropic,
            model: "claude-3-5-haiku-latest".to_string(),
            ..OracleConfig::default()
        };
        let backend = create_backend(&config, Some(SecretString::from("test-key")));
        assert_eq!(backend.unwrap().name(), "anthropic");
    }

    #[test]
    fn remote_backend_requires_key() {
        let config = OracleConfig::default();
        assert!(create_backend(&config, None).is_err());
    }

    #[test]
    fn local_backend_needs_no_key() {
        let config = OracleConfig {
            backend: OracleBackendKind::Local,
            ..OracleConfig::default()
        };
        assert_eq!(create_backend(&config, None).unwrap().name(), "local");
    }
}
