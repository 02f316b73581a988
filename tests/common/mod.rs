//! Shared helpers for integration tests.
//!
//! This module provides:
//! - `TestApp` – the real router wired to in-memory completion and publish
//!   doubles, driven without a TCP listener.
//! - Request signing and config builders

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use secrecy::SecretString;
use tower::ServiceExt;

use slack_relay::{
    build_router,
    config::{CompletionProvider, Config, LogFormat},
    models::{CompletionRequest, CompletionResult, OutgoingMessage, PostedMessage},
    services::{signature_service, ChatPublisher, CompletionClient, PublishError},
    AppState,
};

pub const SIGNING_SECRET: &str = "8f742231b10e8888abcd99yyyzzz85a5";

/// Config with test secrets and defaults everywhere else.
#[allow(dead_code)]
pub fn test_config(signing_secret: Option<&str>) -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        completion_api_key: SecretString::from("sk-test"),
        slack_bot_token: SecretString::from("xoxb-test"),
        slack_signing_secret: signing_secret.map(SecretString::from),
        allow_unsigned_requests: signing_secret.is_none(),
        completion_provider: CompletionProvider::OpenAI,
        completion_model: "gpt-4o".to_string(),
        completion_base_url: None,
        slack_api_base_url: "https://slack.com/api".to_string(),
        system_prompt: "You are a helpful assistant.".to_string(),
        max_tokens: 500,
        temperature: 0.5,
        completion_timeout_secs: 30,
        signature_tolerance_secs: 300,
        dedup_capacity: 100,
        max_concurrent_replies: 8,
        chunk_limit_bytes: 4000,
        reply_in_thread: false,
        command_ack_text: "Working on it...".to_string(),
        log_format: LogFormat::Pretty,
    }
}

/// Completion double that counts calls and returns a fixed result.
pub struct StubCompletion {
    result: CompletionResult,
    delay: Duration,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl StubCompletion {
    pub fn answering(answer: &str) -> Self {
        Self::with_result(Ok(answer.to_string()))
    }

    pub fn with_result(result: CompletionResult) -> Self {
        Self {
            result,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionClient for StubCompletion {
    async fn complete(&self, request: &CompletionRequest) -> CompletionResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.prompt.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.result.clone()
    }
}

/// Publisher double that records every message.
#[derive(Default)]
pub struct RecordingPublisher {
    posts: Mutex<Vec<OutgoingMessage>>,
}

#[allow(dead_code)]
impl RecordingPublisher {
    pub fn posts(&self) -> Vec<OutgoingMessage> {
        self.posts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatPublisher for RecordingPublisher {
    async fn post_message(&self, message: &OutgoingMessage) -> Result<PostedMessage, PublishError> {
        let mut posts = self.posts.lock().unwrap();
        posts.push(message.clone());
        Ok(PostedMessage {
            channel: message.channel.clone(),
            ts: Some(format!("1700000000.{:06}", posts.len())),
        })
    }
}

/// Minimal test application wrapper.
///
/// Wraps the application `Router` so tests can issue HTTP requests without
/// spinning up a real TCP listener.
#[allow(dead_code)]
pub struct TestApp {
    router: Router,
    pub completion: Arc<StubCompletion>,
    pub publisher: Arc<RecordingPublisher>,
    signing_secret: Option<String>,
}

#[allow(dead_code)]
impl TestApp {
    /// App that verifies signatures with `SIGNING_SECRET`.
    pub fn signed(completion: StubCompletion) -> Self {
        Self::with_config(test_config(Some(SIGNING_SECRET)), completion)
    }

    pub fn with_config(config: Config, completion: StubCompletion) -> Self {
        let signing_secret = config
            .slack_signing_secret
            .as_ref()
            .map(|s| secrecy::ExposeSecret::expose_secret(s).to_string());
        let completion = Arc::new(completion);
        let publisher = Arc::new(RecordingPublisher::default());
        let state = AppState::new(config, completion.clone(), publisher.clone());
        Self {
            router: build_router(state),
            completion,
            publisher,
            signing_secret,
        }
    }

    /// Send a GET request and return (status, body).
    pub async fn get(&self, path: &str) -> (StatusCode, String) {
        let req = Request::builder()
            .uri(path)
            .method("GET")
            .body(Body::empty())
            .unwrap();
        self.send(req).await
    }

    /// POST a body signed with the app's secret (if any).
    pub async fn post_signed(
        &self,
        content_type: &str,
        body: &str,
        extra_headers: &[(&str, &str)],
    ) -> (StatusCode, String) {
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let mut builder = Request::builder()
            .uri("/slack/events")
            .method("POST")
            .header("Content-Type", content_type);

        if let Some(secret) = &self.signing_secret {
            let signature = signature_service::sign(secret, &timestamp, body.as_bytes());
            builder = builder
                .header(signature_service::TIMESTAMP_HEADER, &timestamp)
                .header(signature_service::SIGNATURE_HEADER, signature);
        }
        for (name, value) in extra_headers {
            builder = builder.header(*name, *value);
        }

        let req = builder.body(Body::from(body.to_string())).unwrap();
        self.send(req).await
    }

    pub async fn post_json(&self, body: &str) -> (StatusCode, String) {
        self.post_signed("application/json", body, &[]).await
    }

    pub async fn post_form(&self, body: &str) -> (StatusCode, String) {
        self.post_signed("application/x-www-form-urlencoded", body, &[])
            .await
    }

    /// POST with caller-supplied signature headers.
    pub async fn post_with_headers(
        &self,
        content_type: &str,
        body: &str,
        headers: &[(&str, &str)],
    ) -> (StatusCode, String) {
        let mut builder = Request::builder()
            .uri("/slack/events")
            .method("POST")
            .header("Content-Type", content_type);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let req = builder.body(Body::from(body.to_string())).unwrap();
        self.send(req).await
    }

    async fn send(&self, req: Request<Body>) -> (StatusCode, String) {
        let response = self.router.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Wait until the publisher has seen at least `count` posts.
    pub async fn wait_for_posts(&self, count: usize) -> Vec<OutgoingMessage> {
        for _ in 0..500 {
            let posts = self.publisher.posts();
            if posts.len() >= count {
                return posts;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "expected {count} posts, got {}",
            self.publisher.posts().len()
        );
    }

    /// Give detached tasks a chance to run before asserting nothing happened.
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
