//! Posting messages back to Slack through the Web API.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;

use crate::{
    config::Config,
    error::{AppError, AppResult},
    models::{OutgoingMessage, PostedMessage},
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("rate limited by Slack")]
    RateLimited,

    #[error("Slack returned HTTP {status}")]
    Http { status: u16 },

    #[error("Slack API error: {0}")]
    Api(String),

    #[error("malformed Slack response: {0}")]
    MalformedResponse(String),
}

/// Something that can publish a message into a channel.
#[async_trait]
pub trait ChatPublisher: Send + Sync {
    async fn post_message(&self, message: &OutgoingMessage) -> Result<PostedMessage, PublishError>;
}

/// Response from Slack's `chat.postMessage`.
#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    error: Option<String>,
    channel: Option<String>,
    ts: Option<String>,
}

/// `chat.postMessage` client authenticated with the bot token.
pub struct SlackWebClient {
    http: Client,
    api_base_url: String,
    bot_token: SecretString,
}

impl SlackWebClient {
    pub fn new(api_base_url: impl Into<String>, bot_token: SecretString) -> Self {
        Self {
            http: Client::new(),
            api_base_url: api_base_url.into(),
            bot_token,
        }
    }

    pub fn from_config(config: &Config) -> AppResult<Self> {
        let http = Client::builder()
            .timeout(config.completion_timeout())
            .build()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_base_url: config.slack_api_base_url.clone(),
            bot_token: config.slack_bot_token.clone(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{}", self.api_base_url.trim_end_matches('/'), method)
    }
}

#[async_trait]
impl ChatPublisher for SlackWebClient {
    async fn post_message(&self, message: &OutgoingMessage) -> Result<PostedMessage, PublishError> {
        let response = self
            .http
            .post(self.method_url("chat.postMessage"))
            .bearer_auth(self.bot_token.expose_secret())
            .json(message)
            .send()
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(PublishError::RateLimited);
        }
        if !status.is_success() {
            return Err(PublishError::Http {
                status: status.as_u16(),
            });
        }

        let body: PostMessageResponse = response
            .json()
            .await
            .map_err(|e| PublishError::MalformedResponse(e.to_string()))?;

        if !body.ok {
            let err = body.error.unwrap_or_else(|| "unknown".to_string());
            return Err(PublishError::Api(err));
        }

        Ok(PostedMessage {
            channel: body.channel.unwrap_or_else(|| message.channel.clone()),
            ts: body.ts,
        })
    }
}
