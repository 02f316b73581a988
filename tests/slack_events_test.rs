//! End-to-end tests for `POST /slack/events`.
//!
//! The router is real; the completion backend and Slack are in-memory
//! doubles so the detached reply tasks can be observed.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use serde_json::Value;

use common::{test_config, StubCompletion, TestApp, SIGNING_SECRET};
use slack_relay::services::{chunk_service::FAILURE_INDICATOR, signature_service, CompletionError};

const FORM: &str = "application/x-www-form-urlencoded";

fn event_callback(event_id: &str, text: &str) -> String {
    serde_json::json!({
        "type": "event_callback",
        "team_id": "T1",
        "event_id": event_id,
        "event": {
            "type": "app_mention",
            "text": format!("<@UBOT> {text}"),
            "channel": "C42",
            "user": "U7",
            "ts": "1700000000.000100"
        }
    })
    .to_string()
}

// ---------------------------------------------------------------------------
// Handshake and retries
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_url_verification_echoes_challenge_exactly() {
    let app = TestApp::signed(StubCompletion::answering("unused"));
    let challenge = "3eZbrw1aBm2rZgRNFdxV2595E9CY3gmdALWMmHkvFXO7tYXAYM8P";

    let (status, body) = app
        .post_json(&format!(
            r#"{{"token":"Jhj5dZrVaK7ZwHHjRyZWjbDl","challenge":"{challenge}","type":"url_verification"}}"#
        ))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, challenge);
    assert_eq!(app.completion.calls(), 0);
}

#[tokio::test]
async fn test_retry_header_is_acknowledged_without_completion() {
    let app = TestApp::signed(StubCompletion::answering("unused"));

    let (status, _) = app
        .post_signed(
            "application/json",
            &event_callback("EvRetry", "hello"),
            &[("X-Slack-Retry-Num", "1"), ("X-Slack-Retry-Reason", "http_timeout")],
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    app.settle().await;
    assert_eq!(app.completion.calls(), 0);
    assert!(app.publisher.posts().is_empty());
}

#[tokio::test]
async fn test_retried_slash_command_is_not_reprocessed() {
    let app = TestApp::signed(StubCompletion::answering("unused"));

    let (status, _) = app
        .post_signed(
            FORM,
            "text=status%3F&channel_id=C1&user_id=U1",
            &[("X-Slack-Retry-Num", "2")],
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    app.settle().await;
    assert_eq!(app.completion.calls(), 0);
}

// ---------------------------------------------------------------------------
// Signature validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_forged_signature_is_rejected_before_processing() {
    let app = TestApp::signed(StubCompletion::answering("unused"));
    let body = "text=status%3F&channel_id=C1&user_id=U1";
    let timestamp = chrono::Utc::now().timestamp().to_string();
    let forged = signature_service::sign("not-the-secret", &timestamp, body.as_bytes());

    let (status, response) = app
        .post_with_headers(
            FORM,
            body,
            &[
                (signature_service::TIMESTAMP_HEADER, timestamp.as_str()),
                (signature_service::SIGNATURE_HEADER, forged.as_str()),
            ],
        )
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    let response: Value = serde_json::from_str(&response).unwrap();
    assert_eq!(response["success"], false);

    app.settle().await;
    assert_eq!(app.completion.calls(), 0);
    assert!(app.publisher.posts().is_empty());
}

#[tokio::test]
async fn test_missing_signature_headers_are_rejected() {
    let app = TestApp::signed(StubCompletion::answering("unused"));

    let (status, _) = app
        .post_with_headers(FORM, "text=hi&channel_id=C1&user_id=U1", &[])
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_stale_timestamp_is_rejected() {
    let app = TestApp::signed(StubCompletion::answering("unused"));
    let body = "text=hi&channel_id=C1&user_id=U1";
    let timestamp = (chrono::Utc::now().timestamp() - 600).to_string();
    let signature = signature_service::sign(SIGNING_SECRET, &timestamp, body.as_bytes());

    let (status, _) = app
        .post_with_headers(
            FORM,
            body,
            &[
                (signature_service::TIMESTAMP_HEADER, timestamp.as_str()),
                (signature_service::SIGNATURE_HEADER, signature.as_str()),
            ],
        )
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(app.completion.calls(), 0);
}

#[tokio::test]
async fn test_unsigned_requests_accepted_when_opted_out() {
    let app = TestApp::with_config(test_config(None), StubCompletion::answering("hi there"));

    let (status, _) = app
        .post_with_headers(FORM, "text=hi&channel_id=C1&user_id=U1", &[])
        .await;

    assert_eq!(status, StatusCode::OK);
    app.wait_for_posts(1).await;
    assert_eq!(app.completion.calls(), 1);
}

// ---------------------------------------------------------------------------
// Slash commands
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_slash_command_answer_is_posted_with_mention() {
    let app = TestApp::signed(StubCompletion::answering("All systems operational."));

    let (status, body) = app
        .post_form("command=%2Fask&text=status%3F&channel_id=C1&user_id=U1")
        .await;

    assert_eq!(status, StatusCode::OK);
    let ack: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(ack["response_type"], "ephemeral");
    assert_eq!(ack["text"], "Working on it...");

    let posts = app.wait_for_posts(1).await;
    app.settle().await;
    let posts_after = app.publisher.posts();
    assert_eq!(posts_after.len(), 1, "exactly one publish call expected");
    assert_eq!(posts[0].channel, "C1");
    assert!(posts[0].text.contains("<@U1>"));
    assert!(posts[0].text.contains("All systems operational."));
    assert_eq!(app.completion.prompts(), vec!["status?".to_string()]);
}

#[tokio::test]
async fn test_slash_command_missing_fields_is_ignored() {
    let app = TestApp::signed(StubCompletion::answering("unused"));

    let (status, body) = app.post_form("text=&channel_id=C1&user_id=U1").await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());
    app.settle().await;
    assert_eq!(app.completion.calls(), 0);
}

#[tokio::test]
async fn test_completion_timeout_posts_error_indicator() {
    let mut config = test_config(Some(SIGNING_SECRET));
    config.completion_timeout_secs = 1;
    let app = TestApp::with_config(
        config,
        StubCompletion::answering("never delivered").delayed(Duration::from_secs(10)),
    );

    let (status, _) = app.post_form("text=status%3F&channel_id=C1&user_id=U1").await;
    assert_eq!(status, StatusCode::OK);

    let posts = app.wait_for_posts(1).await;
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].channel, "C1");
    assert!(posts[0].text.contains("<@U1>"));
    assert!(posts[0].text.contains(FAILURE_INDICATOR));
}

#[tokio::test]
async fn test_backend_failure_posts_error_indicator() {
    let app = TestApp::signed(StubCompletion::with_result(Err(CompletionError::Api {
        status: 500,
        message: "upstream exploded".to_string(),
    })));

    app.post_form("text=hi&channel_id=C9&user_id=U9").await;

    let posts = app.wait_for_posts(1).await;
    assert_eq!(posts[0].channel, "C9");
    assert!(posts[0].text.contains(FAILURE_INDICATOR));
    assert!(posts[0].text.contains("upstream exploded"));
}

#[tokio::test]
async fn test_saturated_dispatcher_sends_busy_ack() {
    let mut config = test_config(Some(SIGNING_SECRET));
    config.max_concurrent_replies = 1;
    let app = TestApp::with_config(
        config,
        StubCompletion::answering("slow").delayed(Duration::from_millis(500)),
    );

    let (_, first) = app.post_form("text=one&channel_id=C1&user_id=U1").await;
    let (status, second) = app.post_form("text=two&channel_id=C1&user_id=U1").await;

    assert_eq!(status, StatusCode::OK);
    let first: Value = serde_json::from_str(&first).unwrap();
    let second: Value = serde_json::from_str(&second).unwrap();
    assert_eq!(first["text"], "Working on it...");
    assert!(second["text"].as_str().unwrap().contains("try again"));

    app.wait_for_posts(1).await;
    assert_eq!(app.completion.calls(), 1);
}

// ---------------------------------------------------------------------------
// Events API
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_event_callback_is_answered() {
    let app = TestApp::signed(StubCompletion::answering("Deploy is green."));

    let (status, body) = app.post_json(&event_callback("Ev1", "is the deploy ok?")).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());
    let posts = app.wait_for_posts(1).await;
    assert_eq!(posts[0].channel, "C42");
    assert_eq!(posts[0].text, "<@U7> Deploy is green.");
    assert_eq!(app.completion.prompts(), vec!["is the deploy ok?".to_string()]);
}

#[tokio::test]
async fn test_duplicate_event_id_invokes_completion_once() {
    let app = TestApp::signed(StubCompletion::answering("once"));
    let payload = event_callback("EvDup", "hello");

    let (first, _) = app.post_json(&payload).await;
    let (second, _) = app.post_json(&payload).await;

    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::OK);
    app.wait_for_posts(1).await;
    app.settle().await;
    assert_eq!(app.completion.calls(), 1);
    assert_eq!(app.publisher.posts().len(), 1);
}

#[tokio::test]
async fn test_distinct_event_ids_are_both_answered() {
    let app = TestApp::signed(StubCompletion::answering("ok"));

    app.post_json(&event_callback("EvA", "one")).await;
    app.post_json(&event_callback("EvB", "two")).await;

    app.wait_for_posts(2).await;
    assert_eq!(app.completion.calls(), 2);
}

#[tokio::test]
async fn test_bot_message_is_ignored() {
    let app = TestApp::signed(StubCompletion::answering("unused"));
    let payload = r#"{
        "type": "event_callback",
        "event_id": "EvBot",
        "event": {"type": "message", "text": "echo", "channel": "C1", "bot_id": "B1"}
    }"#;

    let (status, _) = app.post_json(payload).await;

    assert_eq!(status, StatusCode::OK);
    app.settle().await;
    assert_eq!(app.completion.calls(), 0);
}

#[tokio::test]
async fn test_malformed_json_is_acknowledged() {
    let app = TestApp::signed(StubCompletion::answering("unused"));

    let (status, _) = app.post_json("{this is not json").await;

    assert_eq!(status, StatusCode::OK);
    app.settle().await;
    assert_eq!(app.completion.calls(), 0);
}

#[tokio::test]
async fn test_long_threaded_answer_is_split_under_first_post() {
    let mut config = test_config(Some(SIGNING_SECRET));
    config.chunk_limit_bytes = 50;
    config.reply_in_thread = true;
    let answer = (1..=12)
        .map(|i| format!("step {i}: do the thing"))
        .collect::<Vec<_>>()
        .join("\n");
    let app = TestApp::with_config(config, StubCompletion::answering(&answer));

    app.post_form("text=how%3F&channel_id=C1&user_id=U1").await;

    let expected = format!("<@U1> {answer}").len().div_ceil(50);
    app.wait_for_posts(expected).await;
    app.settle().await;
    let posts_after = app.publisher.posts();
    assert!(posts_after.iter().all(|p| p.text.len() <= 50));
    assert!(posts_after[0].text.starts_with("<@U1> step 1"));
    assert!(posts_after[0].thread_ts.is_none());
    for post in &posts_after[1..] {
        assert_eq!(post.thread_ts.as_deref(), Some("1700000000.000001"));
    }
    let joined: String = posts_after.iter().map(|p| p.text.as_str()).collect();
    assert_eq!(joined, format!("<@U1> {answer}"));
}
