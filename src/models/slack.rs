use axum::body::Bytes;
use axum::http::{header::CONTENT_TYPE, HeaderMap};
use serde::{Deserialize, Serialize};

/// How the request body is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    /// `application/x-www-form-urlencoded` (slash commands)
    Form,
    /// `application/json` (Events API)
    Json,
}

impl ContentKind {
    /// Pick the content kind from the `Content-Type` header, falling back to
    /// sniffing the body when the header is missing or unrecognised.
    pub fn detect(headers: &HeaderMap, body: &[u8]) -> Self {
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        if content_type.starts_with("application/json") {
            ContentKind::Json
        } else if content_type.starts_with("application/x-www-form-urlencoded") {
            ContentKind::Form
        } else if body.iter().find(|b| !b.is_ascii_whitespace()) == Some(&b'{') {
            ContentKind::Json
        } else {
            ContentKind::Form
        }
    }
}

/// Raw webhook request as received from Slack.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub headers: HeaderMap,
    pub body: Bytes,
    pub content_kind: ContentKind,
}

impl InboundRequest {
    pub fn new(headers: HeaderMap, body: Bytes) -> Self {
        let content_kind = ContentKind::detect(&headers, &body);
        Self {
            headers,
            body,
            content_kind,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// A user's text and where the answer should go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPrompt {
    pub text: String,
    pub channel_id: String,
    pub user_id: String,
    /// Thread to answer in, when the prompt came from a threaded message.
    pub thread_id: Option<String>,
    /// Slash command name, e.g. `/ask`.
    pub command: Option<String>,
    /// Slash command `response_url`.
    pub response_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventKind {
    UrlVerification,
    Retry,
    SlashCommand,
    EventCallback,
    Ignored,
}

impl std::fmt::Display for WebhookEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WebhookEventKind::UrlVerification => "url_verification",
            WebhookEventKind::Retry => "retry",
            WebhookEventKind::SlashCommand => "slash_command",
            WebhookEventKind::EventCallback => "event_callback",
            WebhookEventKind::Ignored => "ignored",
        };
        f.write_str(name)
    }
}

/// Normalised view of an inbound webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    /// Endpoint ownership handshake; answer with the challenge.
    UrlVerification { challenge: String },
    /// Platform redelivery; acknowledged and never reprocessed.
    Retry {
        attempt: Option<u32>,
        reason: Option<String>,
    },
    SlashCommand(UserPrompt),
    EventCallback { event_id: String, prompt: UserPrompt },
    Ignored { reason: String },
}

impl WebhookEvent {
    pub fn ignored(reason: impl Into<String>) -> Self {
        WebhookEvent::Ignored {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> WebhookEventKind {
        match self {
            WebhookEvent::UrlVerification { .. } => WebhookEventKind::UrlVerification,
            WebhookEvent::Retry { .. } => WebhookEventKind::Retry,
            WebhookEvent::SlashCommand(_) => WebhookEventKind::SlashCommand,
            WebhookEvent::EventCallback { .. } => WebhookEventKind::EventCallback,
            WebhookEvent::Ignored { .. } => WebhookEventKind::Ignored,
        }
    }

    pub fn event_id(&self) -> Option<&str> {
        match self {
            WebhookEvent::EventCallback { event_id, .. } => Some(event_id),
            _ => None,
        }
    }

    pub fn prompt(&self) -> Option<&UserPrompt> {
        match self {
            WebhookEvent::SlashCommand(prompt) => Some(prompt),
            WebhookEvent::EventCallback { prompt, .. } => Some(prompt),
            _ => None,
        }
    }
}

/// Slack Events API envelope.
///
/// Only the fields the relay routes on are captured; everything else in the
/// payload is ignored.
#[derive(Debug, Deserialize)]
pub struct EventEnvelope {
    /// `url_verification`, `event_callback`, or absent for the bare JSON
    /// command shape.
    #[serde(rename = "type")]
    pub envelope_type: Option<String>,

    pub challenge: Option<String>,

    pub event_id: Option<String>,

    pub event: Option<SlackEvent>,

    // Bare JSON command shape: `{text, channel_id, user_id}` at the top level.
    pub text: Option<String>,
    pub channel_id: Option<String>,
    pub user_id: Option<String>,
}

/// Inner `event` object of an `event_callback`.
#[derive(Debug, Deserialize)]
pub struct SlackEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub text: Option<String>,
    pub channel: Option<String>,
    pub user: Option<String>,
    pub ts: Option<String>,
    pub thread_ts: Option<String>,
    pub bot_id: Option<String>,
    pub subtype: Option<String>,
}

/// Message to publish to a Slack channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingMessage {
    pub channel: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
}

/// What Slack returned for a successful post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedMessage {
    pub channel: String,
    /// Message timestamp; doubles as the thread id for replies.
    pub ts: Option<String>,
}

/// Destination for a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyTarget {
    pub channel_id: String,
    pub user_id: String,
    pub thread_id: Option<String>,
}

impl From<&UserPrompt> for ReplyTarget {
    fn from(prompt: &UserPrompt) -> Self {
        Self {
            channel_id: prompt.channel_id.clone(),
            user_id: prompt.user_id.clone(),
            thread_id: prompt.thread_id.clone(),
        }
    }
}

/// A reply split into byte-bounded chunks, ready to publish in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyPlan {
    pub target: ReplyTarget,
    pub chunks: Vec<String>,
}

/// Ephemeral acknowledgment returned to a slash command.
#[derive(Debug, Serialize)]
pub struct CommandAck {
    pub response_type: &'static str,
    pub text: String,
}

impl CommandAck {
    pub fn ephemeral(text: impl Into<String>) -> Self {
        Self {
            response_type: "ephemeral",
            text: text.into(),
        }
    }
}
