pub mod config;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;

use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::{
    config::Config,
    services::{
        completion_client_from_config, ChatPublisher, CompletionClient, DedupCache,
        ReplyDispatcher, ReplySettings, SignatureVerifier, SlackWebClient,
    },
};

/// Slack never sends webhook bodies anywhere near this size.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub verifier: Arc<SignatureVerifier>,
    pub dedup: Arc<DedupCache>,
    pub dispatcher: ReplyDispatcher,
}

impl AppState {
    /// Wire the pipeline around the given backends.
    pub fn new(
        config: Config,
        completion: Arc<dyn CompletionClient>,
        publisher: Arc<dyn ChatPublisher>,
    ) -> Self {
        let verifier = SignatureVerifier::new(
            config.signing_secret().cloned(),
            config.signature_tolerance(),
        );
        let dedup = DedupCache::new(config.dedup_capacity);
        let dispatcher =
            ReplyDispatcher::new(completion, publisher, ReplySettings::from_config(&config));

        Self {
            config: Arc::new(config),
            verifier: Arc::new(verifier),
            dedup: Arc::new(dedup),
            dispatcher,
        }
    }

    /// Build the state with the real HTTP clients described by `config`.
    pub fn from_config(config: Config) -> Result<Self> {
        config.validate()?;
        let completion: Arc<dyn CompletionClient> = Arc::from(completion_client_from_config(&config)?);
        let publisher: Arc<dyn ChatPublisher> = Arc::new(SlackWebClient::from_config(&config)?);
        Ok(Self::new(config, completion, publisher))
    }
}

/// Create the application with all routes and middleware
pub fn create_app(config: Config) -> Result<Router> {
    if config.signing_secret().is_none() {
        tracing::warn!("SLACK_SIGNING_SECRET is not set; accepting unsigned requests");
    }
    let state = AppState::from_config(config)?;
    Ok(build_router(state))
}

/// Router over an already-built state.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(routes::app_routes())
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES)),
        )
}
