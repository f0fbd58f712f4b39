//! Self-hosted backend: a plain OpenAI-compatible chat-completions endpoint.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::OracleError;
use crate::llm::provider::{OracleBackend, OracleRequest};

/// Temperature the local endpoint runs at when none is configured.
const LOCAL_TEMPERATURE: f64 = 0.7;

const BACKEND: &str = "local";

#[derive(Serialize)]
struct ChatBody<'a> {
    messages: [ChatMessage<'a>; 2],
    temperature: f64,
    /// -1 lets the server decide.
    max_tokens: i64,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

/// Oracle running on a local inference server.
pub struct LocalBackend {
    client: reqwest::Client,
    url: String,
}

impl LocalBackend {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    fn body<'a>(request: &'a OracleRequest) -> ChatBody<'a> {
        ChatBody {
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            temperature: request.temperature.unwrap_or(LOCAL_TEMPERATURE),
            max_tokens: request
                .max_tokens
                .and_then(|n| i64::try_from(n).ok())
                .unwrap_or(-1),
            stream: false,
        }
    }
}

#[async_trait]
impl OracleBackend for LocalBackend {
    fn name(&self) -> &str {
        BACKEND
    }

    async fn complete(&self, request: &OracleRequest) -> Result<String, OracleError> {
        let response = self
            .client
            .post(&self.url)
            .json(&Self::body(request))
            .send()
            .await
            .map_err(|e| OracleError::Transient {
                backend: BACKEND.into(),
                reason: format!("request to {} failed: {e}", self.url),
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(OracleError::RateLimited {
                backend: BACKEND.into(),
                reason: format!("{} answered {status}", self.url),
            });
        }
        if status.is_server_error() {
            return Err(OracleError::Transient {
                backend: BACKEND.into(),
                reason: format!("{} answered {status}", self.url),
            });
        }
        if !status.is_success() {
            // Client errors (bad URL, bad auth, bad model) will not fix themselves.
            let text = response.text().await.unwrap_or_default();
            return Err(OracleError::Fatal {
                backend: BACKEND.into(),
                reason: format!("{} answered {status}: {text}", self.url),
            });
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| OracleError::Transient {
            backend: BACKEND.into(),
            reason: format!("unexpected response body: {e}"),
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.trim().to_string())
            .ok_or_else(|| OracleError::Transient {
                backend: BACKEND.into(),
                reason: "response contained no choices".into(),
            })
    }
}
