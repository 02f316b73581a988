use serde::{Deserialize, Serialize};

use crate::services::CompletionError;

/// Chat message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// Chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

/// One prompt for the completion backend.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system_preamble: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(system_preamble: &str, prompt: &str, max_tokens: u32, temperature: f32) -> Self {
        Self {
            system_preamble: system_preamble.to_string(),
            prompt: prompt.to_string(),
            max_tokens,
            temperature,
        }
    }

    /// System preamble followed by the user prompt.
    pub fn messages(&self) -> Vec<ChatMessage> {
        vec![
            ChatMessage {
                role: ChatRole::System,
                content: self.system_preamble.clone(),
            },
            ChatMessage {
                role: ChatRole::User,
                content: self.prompt.clone(),
            },
        ]
    }
}

/// Answer text, or why there is none.
pub type CompletionResult = Result<String, CompletionError>;

// OpenAI API types
#[derive(Debug, Serialize)]
pub(crate) struct OpenAIRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OpenAIResponse {
    pub choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OpenAIChoice {
    pub message: OpenAIMessage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OpenAIMessage {
    #[serde(default)]
    pub content: Option<String>,
}

// Anthropic API types
#[derive(Debug, Serialize)]
pub(crate) struct AnthropicRequest {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AnthropicResponse {
    pub content: Vec<AnthropicContent>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AnthropicContent {
    #[serde(default)]
    pub text: Option<String>,
}

impl AnthropicResponse {
    /// Concatenate the text blocks of the response.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| c.text.as_deref())
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Error body shared by both providers: `{"error": {"message": ..}}`.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorBody {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorDetail {
    pub message: String,
}
