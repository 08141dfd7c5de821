//! End-to-end turns through `ChatSession` against a scripted backend.

mod common;

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use common::{RecordingRenderer, ScriptedBackend, Step, config};
use gpt_term::chat::{ChatSession, TurnOptions, TurnOutcome};
use gpt_term::{Error, Message, Role};

#[tokio::test]
async fn first_exchange_in_batch_mode_queues_a_title() {
    let dir = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(vec![Step::reply("hi"), Step::reply("Greeting")]);
    let mut session = ChatSession::new(&config(dir.path(), true), backend.clone(), None).unwrap();
    assert_eq!(session.messages().len(), 1);

    let mut renderer = RecordingRenderer::default();
    let outcome = session
        .submit("hello", TurnOptions::batch(), &mut renderer, &CancellationToken::new())
        .await
        .unwrap();

    let report = outcome.report().expect("reply");
    assert_eq!(report.reply.content, "hi");
    assert!(report.title_enqueued);
    assert!(report.current_tokens > 0);
    assert_eq!(renderer.replies, vec!["hi".to_string()]);
    assert_eq!(
        session.messages(),
        &[
            Message::system("You are a helpful assistant."),
            Message::user("hello"),
            Message::assistant("hi"),
        ]
    );

    let title = session
        .generate_title(false, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(title.as_deref(), Some("Greeting"));

    let requests = backend.requests();
    assert_eq!(requests.len(), 2);
    assert!(!requests[0].stream);
    assert_eq!(requests[0].messages.len(), 2);
    let title_request = &requests[1];
    assert_eq!(title_request.messages.len(), 1);
    assert_eq!(title_request.messages[0].role, Role::User);
    assert!(title_request.messages[0].content.contains("hello"));
    assert_eq!(title_request.temperature, 0.5);

    // The title request's tokens are added to the lifetime spend.
    assert!(session.total_tokens_spent() > report.total_tokens);
}

#[tokio::test]
async fn rate_limited_turn_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(vec![Step::Fail(Error::rate_limit(
        "Rate limit reached for requests",
        Some(20),
    ))]);
    let mut session = ChatSession::new(&config(dir.path(), true), backend, None).unwrap();
    let before = session.messages().to_vec();
    let spent = session.total_tokens_spent();

    let outcome = session
        .submit(
            "hello",
            TurnOptions::streaming(),
            &mut RecordingRenderer::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    match outcome {
        TurnOutcome::Failed {
            error,
            limit_reached,
        } => {
            assert!(error.is_rate_limit());
            assert!(!limit_reached);
        }
        other => panic!("expected a failed turn, got {other:?}"),
    }
    assert_eq!(session.messages(), before.as_slice());
    assert_eq!(session.total_tokens_spent(), spent);
    assert_eq!(session.pending_title_jobs(), 0);
    assert_eq!(session.title(), None);
}

#[tokio::test]
async fn streamed_fragments_assemble_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(vec![Step::fragments(&["He", "llo"])]);
    let mut session = ChatSession::new(&config(dir.path(), false), backend.clone(), None).unwrap();

    let mut renderer = RecordingRenderer::default();
    let outcome = session
        .submit("greet me", TurnOptions::streaming(), &mut renderer, &CancellationToken::new())
        .await
        .unwrap();

    let report = outcome.report().expect("reply");
    assert_eq!(report.reply.content, "Hello");
    assert!(!report.reply.aborted);
    assert!(!report.title_enqueued);
    assert_eq!(renderer.prefixes, vec!["He".to_string(), "Hello".to_string()]);
    assert_eq!(session.last_reply(), Some("Hello"));
    assert!(backend.requests()[0].stream);
}

#[tokio::test]
async fn interrupt_mid_stream_keeps_partial_reply() {
    let dir = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(vec![Step::stall(&["Once upon", " a time"])]);
    let mut session = ChatSession::new(&config(dir.path(), false), backend, None).unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let mut renderer = RecordingRenderer::default();
    let outcome = session
        .submit("tell a story", TurnOptions::streaming(), &mut renderer, &cancel)
        .await
        .unwrap();

    let report = outcome.report().expect("partial reply");
    assert!(report.reply.aborted);
    assert_eq!(report.reply.content, "Once upon a time");
    assert!(renderer.interrupted);
    assert_eq!(session.messages().len(), 3);
    assert_eq!(session.last_reply(), Some("Once upon a time"));
}

#[tokio::test]
async fn interrupt_before_reply_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(vec![Step::stall(&[]), Step::stall(&[])]);
    let mut session = ChatSession::new(&config(dir.path(), false), backend, None).unwrap();

    for options in [TurnOptions::streaming(), TurnOptions::batch()] {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let outcome = session
            .submit("hello", options, &mut RecordingRenderer::default(), &cancel)
            .await
            .unwrap();
        assert!(matches!(outcome, TurnOutcome::Cancelled));
        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.total_tokens_spent(), 0);
    }
}

#[tokio::test]
async fn failure_at_the_limit_offers_eviction() {
    let dir = tempfile::tempdir().unwrap();
    let long_reply = "lorem ipsum dolor sit amet ".repeat(1500);
    let backend = ScriptedBackend::new(vec![
        Step::Reply(long_reply.clone()),
        Step::Fail(Error::bad_request(
            "This model's maximum context length is 4097 tokens.",
            Some("messages".to_string()),
        )),
    ]);
    let mut session = ChatSession::new(&config(dir.path(), false), backend, None).unwrap();

    let first = session
        .submit("hello", TurnOptions::batch(), &mut RecordingRenderer::default(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(first.report().is_some());
    assert!(session.budget().is_exhausted());

    let outcome = session
        .submit("and more", TurnOptions::batch(), &mut RecordingRenderer::default(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        TurnOutcome::Failed {
            limit_reached: true,
            ..
        }
    ));
    assert_eq!(session.messages().len(), 3);

    let removed = session.delete_first().unwrap();
    assert!(removed.tokens_saved > 0);
    assert_eq!(session.messages().len(), 1);
    assert!(!session.budget().is_exhausted());
}

#[tokio::test]
async fn oversized_question_alone_does_not_offer_eviction() {
    let dir = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(vec![
        Step::Reply("word ".repeat(3700)),
        Step::Fail(Error::bad_request(
            "This model's maximum context length is 4097 tokens.",
            Some("messages".to_string()),
        )),
    ]);
    let mut session = ChatSession::new(&config(dir.path(), false), backend, None).unwrap();

    session
        .submit("hello", TurnOptions::batch(), &mut RecordingRenderer::default(), &CancellationToken::new())
        .await
        .unwrap();
    let before = session.budget();
    assert!(!before.is_exhausted());

    let question = "word ".repeat(800);
    let outcome = session
        .submit(&question, TurnOptions::batch(), &mut RecordingRenderer::default(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        TurnOutcome::Failed {
            limit_reached: false,
            ..
        }
    ));
    assert_eq!(session.messages().len(), 3);
    assert_eq!(session.budget().current, before.current);
    assert!(!session.budget().is_exhausted());
}

#[tokio::test]
async fn approaching_limit_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(vec![Step::Reply("word ".repeat(3700))]);
    let mut session = ChatSession::new(&config(dir.path(), false), backend, None).unwrap();

    let outcome = session
        .submit("hello", TurnOptions::batch(), &mut RecordingRenderer::default(), &CancellationToken::new())
        .await
        .unwrap();
    let report = outcome.report().unwrap();
    let remaining = 4096 - report.current_tokens;
    assert!((1..500).contains(&remaining), "remaining = {remaining}");
    assert_eq!(report.approaching_limit, Some(remaining));
}

#[tokio::test]
async fn ledger_adds_the_transcript_size_each_turn() {
    let dir = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(vec![Step::reply("one"), Step::reply("two")]);
    let mut session = ChatSession::new(&config(dir.path(), false), backend, None).unwrap();
    let cancel = CancellationToken::new();

    let first = session
        .submit("a", TurnOptions::batch(), &mut RecordingRenderer::default(), &cancel)
        .await
        .unwrap();
    let second = session
        .submit("b", TurnOptions::batch(), &mut RecordingRenderer::default(), &cancel)
        .await
        .unwrap();
    let first = first.report().unwrap();
    let second = second.report().unwrap();
    assert_eq!(
        session.total_tokens_spent(),
        first.current_tokens + second.current_tokens
    );
    assert_eq!(second.total_tokens, session.total_tokens_spent());
}

#[tokio::test]
async fn undo_and_reset() {
    let dir = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(vec![Step::reply("one"), Step::reply("two")]);
    let mut session = ChatSession::new(&config(dir.path(), false), backend, None).unwrap();
    let cancel = CancellationToken::new();
    for question in ["a", "b"] {
        session
            .submit(question, TurnOptions::batch(), &mut RecordingRenderer::default(), &cancel)
            .await
            .unwrap();
    }
    assert_eq!(session.messages().len(), 5);
    assert_eq!(session.undo(), Some(Message::user("b")));
    assert_eq!(session.messages().len(), 3);

    session.set_title("Letters");
    session.reset();
    assert_eq!(session.messages().len(), 1);
    assert_eq!(session.messages()[0].role, Role::System);
    assert_eq!(session.title(), None);
    assert_eq!(session.undo(), None);
}
