pub mod chunk_service;
pub mod completion_service;
pub mod dedup_service;
pub mod reply_dispatcher;
pub mod signature_service;
pub mod slack_service;
pub mod webhook_service;

pub use chunk_service::{format_answer, format_failure, looks_tabular, split_into_chunks};
pub use completion_service::{
    completion_client_from_config, AnthropicCompletionClient, ClientSettings, CompletionClient,
    CompletionError, OpenAiCompletionClient,
};
pub use dedup_service::DedupCache;
pub use reply_dispatcher::{DispatchError, ReplyDispatcher, ReplyOutcome, ReplySettings};
pub use signature_service::{SignatureError, SignatureVerifier};
pub use slack_service::{ChatPublisher, PublishError, SlackWebClient};
pub use webhook_service::WebhookService;
