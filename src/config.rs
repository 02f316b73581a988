use std::time::Duration;

use anyhow::Result;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::{AppError, AppResult};

/// Slack rejects `chat.postMessage` text beyond this many bytes.
pub const SLACK_MAX_MESSAGE_BYTES: usize = 4000;

/// Which hosted completion API answers the prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompletionProvider {
    #[default]
    OpenAI,
    Anthropic,
}

impl CompletionProvider {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            CompletionProvider::OpenAI => "https://api.openai.com/v1",
            CompletionProvider::Anthropic => "https://api.anthropic.com/v1",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Application configuration loaded from environment variables
#[derive(Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub completion_api_key: SecretString,

    pub slack_bot_token: SecretString,

    pub slack_signing_secret: Option<SecretString>,

    /// Accept unsigned requests when no signing secret is configured.
    #[serde(default)]
    pub allow_unsigned_requests: bool,

    #[serde(default)]
    pub completion_provider: CompletionProvider,

    #[serde(default = "default_model")]
    pub completion_model: String,

    pub completion_base_url: Option<String>,

    #[serde(default = "default_slack_api_base_url")]
    pub slack_api_base_url: String,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_completion_timeout")]
    pub completion_timeout_secs: u64,

    #[serde(default = "default_signature_tolerance")]
    pub signature_tolerance_secs: u64,

    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,

    #[serde(default = "default_max_concurrent_replies")]
    pub max_concurrent_replies: usize,

    #[serde(default = "default_chunk_limit")]
    pub chunk_limit_bytes: usize,

    #[serde(default)]
    pub reply_in_thread: bool,

    #[serde(default = "default_command_ack_text")]
    pub command_ack_text: String,

    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_slack_api_base_url() -> String {
    "https://slack.com/api".to_string()
}

fn default_system_prompt() -> String {
    "You are the corporate assistant of the BEM/JENCO company.".to_string()
}

fn default_max_tokens() -> u32 {
    500
}

fn default_temperature() -> f32 {
    0.5
}

fn default_completion_timeout() -> u64 {
    30
}

fn default_signature_tolerance() -> u64 {
    300
}

fn default_dedup_capacity() -> usize {
    100
}

fn default_max_concurrent_replies() -> usize {
    32
}

fn default_chunk_limit() -> usize {
    SLACK_MAX_MESSAGE_BYTES
}

fn default_command_ack_text() -> String {
    ":hourglass_flowing_sand: Working on it...".to_string()
}

impl Config {
    /// Load configuration from environment variables and validate it.
    ///
    /// A missing API key or bot token fails here, at startup, rather than on
    /// the first request.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::Environment::default())
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> AppResult<()> {
        if self.completion_api_key.expose_secret().trim().is_empty() {
            return Err(AppError::Configuration(
                "COMPLETION_API_KEY must not be empty".to_string(),
            ));
        }
        if self.slack_bot_token.expose_secret().trim().is_empty() {
            return Err(AppError::Configuration(
                "SLACK_BOT_TOKEN must not be empty".to_string(),
            ));
        }
        if self.signing_secret().is_none() && !self.allow_unsigned_requests {
            return Err(AppError::Configuration(
                "SLACK_SIGNING_SECRET is not set; set ALLOW_UNSIGNED_REQUESTS=true to accept unsigned requests"
                    .to_string(),
            ));
        }
        if self.chunk_limit_bytes == 0 || self.chunk_limit_bytes > SLACK_MAX_MESSAGE_BYTES {
            return Err(AppError::Configuration(format!(
                "CHUNK_LIMIT_BYTES must be between 1 and {SLACK_MAX_MESSAGE_BYTES}"
            )));
        }
        if self.dedup_capacity == 0 {
            return Err(AppError::Configuration(
                "DEDUP_CAPACITY must be greater than zero".to_string(),
            ));
        }
        if self.max_concurrent_replies == 0 {
            return Err(AppError::Configuration(
                "MAX_CONCURRENT_REPLIES must be greater than zero".to_string(),
            ));
        }
        if self.completion_timeout_secs == 0 {
            return Err(AppError::Configuration(
                "COMPLETION_TIMEOUT_SECS must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(AppError::Configuration(
                "TEMPERATURE must be between 0.0 and 2.0".to_string(),
            ));
        }
        Ok(())
    }

    /// The signing secret, treating an empty value as unset.
    pub fn signing_secret(&self) -> Option<&SecretString> {
        self.slack_signing_secret
            .as_ref()
            .filter(|s| !s.expose_secret().trim().is_empty())
    }

    pub fn completion_base_url(&self) -> String {
        self.completion_base_url
            .clone()
            .unwrap_or_else(|| self.completion_provider.default_base_url().to_string())
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_secs(self.completion_timeout_secs)
    }

    pub fn signature_tolerance(&self) -> Duration {
        Duration::from_secs(self.signature_tolerance_secs)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
