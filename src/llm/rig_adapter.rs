//! Managed remote backend: bridges rig's `CompletionModel` to `OracleBackend`.

use async_trait::async_trait;
use rig::completion::CompletionModel;
use rig::message::AssistantContent;

use crate::error::OracleError;
use crate::llm::provider::{OracleBackend, OracleRequest, classify_failure};

/// Remote oracle over any rig completion model.
pub struct RigAdapter<M> {
    model: M,
    backend: String,
    model_name: String,
    /// Used when the request carries no limit (some providers require one).
    default_max_tokens: Option<u64>,
}

impl<M> RigAdapter<M>
where
    M: CompletionModel,
{
    pub fn new(model: M, backend: &str, model_name: &str) -> Self {
        Self {
            model,
            backend: backend.to_string(),
            model_name: model_name.to_string(),
            default_max_tokens: None,
        }
    }

    pub fn with_default_max_tokens(mut self, max_tokens: u64) -> Self {
        self.default_max_tokens = Some(max_tokens);
        self
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[async_trait]
impl<M> OracleBackend for RigAdapter<M>
where
    M: CompletionModel + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.backend
    }

    async fn complete(&self, request: &OracleRequest) -> Result<String, OracleError> {
        let mut builder = self
            .model
            .completion_request(request.user.clone())
            .preamble(request.system.clone());

        if let Some(temperature) = request.temperature {
            builder = builder.temperature(temperature);
        }
        if let Some(max_tokens) = request.max_tokens.or(self.default_max_tokens) {
            builder = builder.max_tokens(max_tokens);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| classify_failure(&self.backend, e.to_string()))?;

        let text: String = response
            .choice
            .iter()
            .filter_map(|content| match content {
                AssistantContent::Text(text) => Some(text.text.clone()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");

        if text.trim().is_empty() {
            return Err(OracleError::Transient {
                backend: self.backend.clone(),
                reason: format!("{} returned no text content", self.model_name),
            });
        }

        Ok(text.trim().to_string())
    }
}
