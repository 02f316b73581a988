//! Background reply pipeline.
//!
//! Each accepted prompt gets its own task. That task calls the completion
//! backend, formats and chunks the answer, and publishes the chunks in order.
//! A semaphore caps the number of tasks alive at once. When it is exhausted,
//! new prompts are refused instead of queued.

use std::{sync::Arc, time::Duration};

use thiserror::Error;
use tokio::{sync::Semaphore, task::JoinHandle};
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    config::Config,
    models::{CompletionRequest, OutgoingMessage, ReplyPlan, ReplyTarget, UserPrompt},
    services::{
        chunk_service::{format_answer, format_failure},
        ChatPublisher, CompletionClient, CompletionError, PublishError,
    },
};

/// Per-deployment knobs for building and publishing replies.
#[derive(Debug, Clone)]
pub struct ReplySettings {
    pub system_preamble: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub completion_timeout: Duration,
    pub chunk_limit: usize,
    pub reply_in_thread: bool,
    pub max_concurrent: usize,
}

impl ReplySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            system_preamble: config.system_prompt.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            completion_timeout: config.completion_timeout(),
            chunk_limit: config.chunk_limit_bytes,
            reply_in_thread: config.reply_in_thread,
            max_concurrent: config.max_concurrent_replies,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("all {0} reply slots are busy")]
    Saturated(usize),
}

/// What happened to one reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyOutcome {
    /// Set when the completion backend failed and the fallback message was
    /// posted instead.
    pub completion_error: Option<CompletionError>,
    pub chunks_total: usize,
    pub chunks_sent: usize,
    /// First publish failure; later chunks were abandoned.
    pub publish_error: Option<PublishError>,
}

impl ReplyOutcome {
    pub fn is_fully_delivered(&self) -> bool {
        self.publish_error.is_none() && self.chunks_sent == self.chunks_total
    }
}

#[derive(Clone)]
pub struct ReplyDispatcher {
    completion: Arc<dyn CompletionClient>,
    publisher: Arc<dyn ChatPublisher>,
    settings: Arc<ReplySettings>,
    permits: Arc<Semaphore>,
}

impl ReplyDispatcher {
    pub fn new(
        completion: Arc<dyn CompletionClient>,
        publisher: Arc<dyn ChatPublisher>,
        settings: ReplySettings,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_concurrent.max(1)));
        Self {
            completion,
            publisher,
            settings: Arc::new(settings),
            permits,
        }
    }

    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    /// Start answering `prompt` in the background.
    ///
    /// Returns immediately. The handle can be awaited for the outcome or
    /// dropped to detach the task.
    pub fn dispatch(&self, prompt: UserPrompt) -> Result<JoinHandle<ReplyOutcome>, DispatchError> {
        let permit = Arc::clone(&self.permits)
            .try_acquire_owned()
            .map_err(|_| DispatchError::Saturated(self.settings.max_concurrent))?;

        let job_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "reply",
            %job_id,
            channel = %prompt.channel_id,
            user = %prompt.user_id
        );

        let dispatcher = self.clone();
        Ok(tokio::spawn(
            async move {
                let outcome = dispatcher.run(prompt).await;
                drop(permit);
                outcome
            }
            .instrument(span),
        ))
    }

    /// Complete, chunk and publish one prompt in the calling task.
    pub async fn run(&self, prompt: UserPrompt) -> ReplyOutcome {
        let request = CompletionRequest::new(
            &self.settings.system_preamble,
            &prompt.text,
            self.settings.max_tokens,
            self.settings.temperature,
        );

        let result = match tokio::time::timeout(
            self.settings.completion_timeout,
            self.completion.complete(&request),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(CompletionError::Timeout(self.settings.completion_timeout)),
        };

        let (message, completion_error) = match result {
            Ok(answer) => {
                tracing::debug!(bytes = answer.len(), "Completion succeeded");
                (format_answer(&prompt.user_id, &answer), None)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Completion failed, posting fallback message");
                (format_failure(&prompt.user_id, &e.to_string()), Some(e))
            }
        };

        let plan = ReplyPlan::new(ReplyTarget::from(&prompt), &message, self.settings.chunk_limit);
        let mut outcome = self.publish(&plan).await;
        outcome.completion_error = completion_error;
        outcome
    }

    /// Post chunks in order, stopping at the first failure.
    async fn publish(&self, plan: &ReplyPlan) -> ReplyOutcome {
        let mut outcome = ReplyOutcome {
            completion_error: None,
            chunks_total: plan.chunks.len(),
            chunks_sent: 0,
            publish_error: None,
        };

        let mut thread_ts = if self.settings.reply_in_thread {
            plan.target.thread_id.clone()
        } else {
            None
        };

        for (index, chunk) in plan.chunks.iter().enumerate() {
            let message = OutgoingMessage {
                channel: plan.target.channel_id.clone(),
                text: chunk.clone(),
                thread_ts: thread_ts.clone(),
            };

            match self.publisher.post_message(&message).await {
                Ok(posted) => {
                    outcome.chunks_sent += 1;
                    if self.settings.reply_in_thread && thread_ts.is_none() {
                        thread_ts = posted.ts;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        chunk = index + 1,
                        total = plan.chunks.len(),
                        "Failed to publish reply chunk, abandoning the rest"
                    );
                    outcome.publish_error = Some(e);
                    break;
                }
            }
        }

        if outcome.is_fully_delivered() {
            tracing::info!(chunks = outcome.chunks_sent, "Reply published");
        }
        outcome
    }
}
