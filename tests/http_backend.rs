//! HTTP-level behaviour of the chat-completions backend, against a mock server.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{RecordingRenderer, config};
use gpt_term::chat::{ChatSession, TurnOptions, TurnOutcome};
use gpt_term::{Backend, ChatCompletionsBackend, Client, Error};

const ENDPOINT_PATH: &str = "/v1/chat/completions";

async fn backend(server: &MockServer, timeout: Duration) -> Arc<dyn Backend> {
    let endpoint = format!("{}{ENDPOINT_PATH}", server.uri());
    let client = Client::with_options("sk-test-key-0000", Some(&endpoint), Some(timeout)).unwrap();
    Arc::new(ChatCompletionsBackend::new(client))
}

fn sse_body(fragments: &[&str]) -> String {
    let mut body = String::new();
    body.push_str(
        "data: {\"id\":\"chatcmpl-1\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"},\"finish_reason\":null}]}\n\n",
    );
    for fragment in fragments {
        let chunk = json!({
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "delta": {"content": fragment}, "finish_reason": null}]
        });
        body.push_str(&format!("data: {chunk}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

#[tokio::test]
async fn rate_limit_response_rolls_back_the_turn() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ENDPOINT_PATH))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "7")
                .set_body_json(json!({
                    "error": {
                        "message": "Rate limit reached for default-gpt-3.5-turbo",
                        "type": "requests",
                        "param": null,
                        "code": null
                    }
                })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let backend = backend(&server, Duration::from_secs(5)).await;
    let mut session = ChatSession::new(&config(dir.path(), true), backend, None).unwrap();

    let outcome = session
        .submit(
            "hello",
            TurnOptions::batch(),
            &mut RecordingRenderer::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    match outcome {
        TurnOutcome::Failed { error, .. } => match error {
            Error::RateLimit {
                message,
                retry_after,
            } => {
                assert!(message.contains("Rate limit reached"));
                assert_eq!(retry_after, Some(7));
            }
            other => panic!("expected a rate limit error, got {other:?}"),
        },
        other => panic!("expected a failed turn, got {other:?}"),
    }
    assert_eq!(session.messages().len(), 1);
    assert_eq!(session.total_tokens_spent(), 0);
}

#[tokio::test]
async fn invalid_key_is_an_authentication_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ENDPOINT_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "Incorrect API key provided", "type": "invalid_request_error"}
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let backend = backend(&server, Duration::from_secs(5)).await;
    let mut session = ChatSession::new(&config(dir.path(), false), backend, None).unwrap();
    let outcome = session
        .submit(
            "hello",
            TurnOptions::streaming(),
            &mut RecordingRenderer::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        TurnOutcome::Failed { ref error, .. } if error.is_authentication()
    ));
    assert_eq!(session.messages().len(), 1);
}

#[tokio::test]
async fn streamed_reply_is_assembled() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ENDPOINT_PATH))
        .and(header("authorization", "Bearer sk-test-key-0000"))
        .and(body_partial_json(json!({"model": "gpt-3.5-turbo", "stream": true})))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sse_body(&["He", "llo"]), "text/event-stream"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let backend = backend(&server, Duration::from_secs(5)).await;
    let mut session = ChatSession::new(&config(dir.path(), false), backend, None).unwrap();

    let mut renderer = RecordingRenderer::default();
    let outcome = session
        .submit("greet me", TurnOptions::streaming(), &mut renderer, &CancellationToken::new())
        .await
        .unwrap();

    let report = outcome.report().expect("reply");
    assert_eq!(report.reply.content, "Hello");
    assert_eq!(renderer.prefixes, vec!["He".to_string(), "Hello".to_string()]);
    assert_eq!(session.last_reply(), Some("Hello"));
}

#[tokio::test]
async fn batch_reply_is_parsed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ENDPOINT_PATH))
        .and(body_partial_json(json!({"stream": false, "temperature": 0.5})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-2",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "hi there"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 2, "total_tokens": 14}
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let backend = backend(&server, Duration::from_secs(5)).await;
    let mut session = ChatSession::new(&config(dir.path(), false), backend, None).unwrap();
    session.set_temperature(0.5).unwrap();

    let options = session.turn_options(false);
    let outcome = session
        .submit("hello", options, &mut RecordingRenderer::default(), &CancellationToken::new())
        .await
        .unwrap();
    let report = outcome.report().expect("reply");
    assert_eq!(report.reply.content, "hi there");
    assert_eq!(report.reply.usage.as_ref().map(|u| u.total_tokens), Some(14));
}

#[tokio::test]
async fn slow_server_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ENDPOINT_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(2))
                .set_body_json(json!({"choices": []})),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let backend = backend(&server, Duration::from_millis(200)).await;
    let mut session = ChatSession::new(&config(dir.path(), false), backend, None).unwrap();
    let outcome = session
        .submit(
            "hello",
            TurnOptions::batch(),
            &mut RecordingRenderer::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        TurnOutcome::Failed { ref error, .. } if error.is_timeout()
    ));
    assert_eq!(session.messages().len(), 1);
}
