//! Classification of inbound Slack webhooks.
//!
//! Parsing is pure so every payload shape can be unit-tested without a
//! server. The HTTP handler in `routes::slack` decides what to do with the
//! resulting `WebhookEvent`.

use std::collections::HashMap;

use crate::models::{
    ContentKind, EventEnvelope, InboundRequest, SlackEvent, UserPrompt, WebhookEvent,
};

pub const RETRY_NUM_HEADER: &str = "x-slack-retry-num";
pub const RETRY_REASON_HEADER: &str = "x-slack-retry-reason";

pub struct WebhookService;

impl WebhookService {
    pub fn classify(request: &InboundRequest) -> WebhookEvent {
        if let Some(attempt) = request.header(RETRY_NUM_HEADER) {
            return WebhookEvent::Retry {
                attempt: attempt.trim().parse().ok(),
                reason: request.header(RETRY_REASON_HEADER).map(str::to_string),
            };
        }

        match request.content_kind {
            ContentKind::Form => Self::classify_form(&request.body),
            ContentKind::Json => Self::classify_json(&request.body),
        }
    }

    /// Slash command: `text`, `channel_id`, `user_id`, `command`,
    /// `response_url` as form fields.
    fn classify_form(body: &[u8]) -> WebhookEvent {
        let fields: HashMap<String, String> = url::form_urlencoded::parse(body)
            .into_owned()
            .collect();

        match build_prompt(
            fields.get("text").map(String::as_str),
            fields.get("channel_id").map(String::as_str),
            fields.get("user_id").map(String::as_str),
        ) {
            Ok(mut prompt) => {
                prompt.command = non_empty(fields.get("command").map(String::as_str));
                prompt.response_url = non_empty(fields.get("response_url").map(String::as_str));
                WebhookEvent::SlashCommand(prompt)
            }
            Err(missing) => WebhookEvent::ignored(format!("slash command missing {missing}")),
        }
    }

    fn classify_json(body: &[u8]) -> WebhookEvent {
        let envelope: EventEnvelope = match serde_json::from_slice(body) {
            Ok(envelope) => envelope,
            Err(e) => return WebhookEvent::ignored(format!("unparseable JSON body: {e}")),
        };

        match envelope.envelope_type.as_deref() {
            Some("url_verification") => match non_empty(envelope.challenge.as_deref()) {
                Some(challenge) => WebhookEvent::UrlVerification { challenge },
                None => WebhookEvent::ignored("url_verification without challenge"),
            },
            Some("event_callback") => Self::classify_callback(envelope),
            Some(other) => WebhookEvent::ignored(format!("unsupported payload type {other}")),
            // JSON body without a type: a slash-command shaped payload.
            None => match build_prompt(
                envelope.text.as_deref(),
                envelope.channel_id.as_deref(),
                envelope.user_id.as_deref(),
            ) {
                Ok(prompt) => WebhookEvent::SlashCommand(prompt),
                Err(missing) => WebhookEvent::ignored(format!("command payload missing {missing}")),
            },
        }
    }

    fn classify_callback(envelope: EventEnvelope) -> WebhookEvent {
        let Some(event_id) = non_empty(envelope.event_id.as_deref()) else {
            return WebhookEvent::ignored("event_callback missing event_id");
        };
        let Some(event) = envelope.event else {
            return WebhookEvent::ignored("event_callback missing event");
        };

        if event.bot_id.is_some() {
            return WebhookEvent::ignored("message posted by a bot");
        }
        if let Some(subtype) = event.subtype.as_deref() {
            return WebhookEvent::ignored(format!("message subtype {subtype}"));
        }

        let text = event_text(&event);
        match build_prompt(
            text.as_deref(),
            event.channel.as_deref(),
            event.user.as_deref(),
        ) {
            Ok(mut prompt) => {
                prompt.thread_id = non_empty(event.thread_ts.as_deref().or(event.ts.as_deref()));
                WebhookEvent::EventCallback { event_id, prompt }
            }
            Err(missing) => WebhookEvent::ignored(format!("event missing {missing}")),
        }
    }
}

/// Event text with the bot's own mention removed for `app_mention`.
fn event_text(event: &SlackEvent) -> Option<String> {
    let text = event.text.as_deref()?;
    if event.event_type == "app_mention" {
        Some(strip_leading_mentions(text).to_string())
    } else {
        Some(text.to_string())
    }
}

/// Drop `<@U…>` tokens from the start of `text`.
pub fn strip_leading_mentions(text: &str) -> &str {
    let mut rest = text.trim_start();
    while rest.starts_with("<@") {
        match rest.find('>') {
            Some(end) => rest = rest[end + 1..].trim_start(),
            None => break,
        }
    }
    rest
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Assemble a prompt, naming the first required field that is absent.
fn build_prompt(
    text: Option<&str>,
    channel_id: Option<&str>,
    user_id: Option<&str>,
) -> Result<UserPrompt, &'static str> {
    let text = non_empty(text).ok_or("text")?;
    let channel_id = non_empty(channel_id).ok_or("channel_id")?;
    let user_id = non_empty(user_id).ok_or("user_id")?;

    Ok(UserPrompt {
        text,
        channel_id,
        user_id,
        thread_id: None,
        command: None,
        response_url: None,
    })
}
