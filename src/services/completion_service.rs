//! Hosted text-completion backends.
//!
//! Every failure comes back as a `CompletionError` value. The reply task
//! turns it into a chat message instead of letting it escape.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

use crate::{
    config::{CompletionProvider, Config},
    error::{AppError, AppResult},
    models::{
        AnthropicRequest, AnthropicResponse, ApiErrorBody, ChatMessage, ChatRole,
        CompletionRequest, CompletionResult, OpenAIRequest, OpenAIResponse,
    },
};

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompletionError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("rate limited by completion backend: {0}")]
    RateLimited(String),

    #[error("completion backend returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("malformed completion response: {0}")]
    MalformedResponse(String),

    #[error("completion backend returned no text")]
    EmptyResponse,
}

#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> CompletionResult;
}

/// Build the client selected by `COMPLETION_PROVIDER`.
pub fn completion_client_from_config(config: &Config) -> AppResult<Box<dyn CompletionClient>> {
    let settings = ClientSettings {
        api_key: config.completion_api_key.clone(),
        model: config.completion_model.clone(),
        base_url: config.completion_base_url(),
        timeout: config.completion_timeout(),
    };

    Ok(match config.completion_provider {
        CompletionProvider::OpenAI => Box::new(OpenAiCompletionClient::new(settings)?),
        CompletionProvider::Anthropic => Box::new(AnthropicCompletionClient::new(settings)?),
    })
}

/// Connection settings shared by both providers.
#[derive(Clone)]
pub struct ClientSettings {
    pub api_key: SecretString,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl ClientSettings {
    fn http_client(&self) -> AppResult<Client> {
        Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to build HTTP client: {}", e)))
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

/// OpenAI chat completions API
pub struct OpenAiCompletionClient {
    http: Client,
    settings: ClientSettings,
}

impl OpenAiCompletionClient {
    pub fn new(settings: ClientSettings) -> AppResult<Self> {
        Ok(Self {
            http: settings.http_client()?,
            settings,
        })
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompletionClient {
    async fn complete(&self, request: &CompletionRequest) -> CompletionResult {
        let body = OpenAIRequest {
            model: self.settings.model.clone(),
            messages: request.messages(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let response = self
            .http
            .post(self.settings.endpoint("chat/completions"))
            .bearer_auth(self.settings.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(e, self.settings.timeout))?;

        let response = check_status(response).await?;

        let result: OpenAIResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::MalformedResponse(e.to_string()))?;

        let content = result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        non_empty(content)
    }
}

/// Anthropic messages API
pub struct AnthropicCompletionClient {
    http: Client,
    settings: ClientSettings,
}

impl AnthropicCompletionClient {
    pub fn new(settings: ClientSettings) -> AppResult<Self> {
        Ok(Self {
            http: settings.http_client()?,
            settings,
        })
    }
}

#[async_trait]
impl CompletionClient for AnthropicCompletionClient {
    async fn complete(&self, request: &CompletionRequest) -> CompletionResult {
        let system = Some(request.system_preamble.clone()).filter(|s| !s.is_empty());

        let body = AnthropicRequest {
            model: self.settings.model.clone(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system,
            messages: vec![ChatMessage {
                role: ChatRole::User,
                content: request.prompt.clone(),
            }],
        };

        let response = self
            .http
            .post(self.settings.endpoint("messages"))
            .header("x-api-key", self.settings.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(e, self.settings.timeout))?;

        let response = check_status(response).await?;

        let result: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::MalformedResponse(e.to_string()))?;

        non_empty(result.text())
    }
}

fn transport_error(err: reqwest::Error, timeout: Duration) -> CompletionError {
    if err.is_timeout() {
        CompletionError::Timeout(timeout)
    } else {
        CompletionError::Transport(err.to_string())
    }
}

/// Map non-2xx responses to typed failures, keeping the upstream message.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, CompletionError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let error_text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorBody>(&error_text)
        .map(|body| body.error.message)
        .unwrap_or(error_text);

    if status == StatusCode::TOO_MANY_REQUESTS {
        Err(CompletionError::RateLimited(message))
    } else {
        Err(CompletionError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

fn non_empty(content: String) -> CompletionResult {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        Err(CompletionError::EmptyResponse)
    } else {
        Ok(trimmed.to_string())
    }
}
