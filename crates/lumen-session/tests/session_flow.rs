use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use lumen_core::errors::{ParseError, TransportError};
use lumen_core::ids::ConversationId;
use lumen_core::messages::Role;
use lumen_core::retry::RetryPolicy;
use lumen_session::{SessionController, SessionState, TurnOutcome};
use lumen_transport::{ErrorReporter, MockResponse, MockTransport, ReliableTransport};

type Reliable = ReliableTransport<MockTransport>;

fn session(responses: Vec<MockResponse>) -> (SessionController, Arc<Reliable>) {
    let transport = Arc::new(ReliableTransport::new(
        MockTransport::new(responses),
        RetryPolicy::default(),
    ));
    (SessionController::new(transport.clone()), transport)
}

fn server_error() -> MockResponse {
    MockResponse::Error(TransportError::ServerError {
        status: 500,
        message: "boom".into(),
    })
}

async fn wait_for_content(session: &SessionController, content: &str) {
    let mut rx = session.subscribe();
    rx.wait_for(|s| s.current_assistant().is_some_and(|m| m.content == content))
        .await
        .unwrap();
}

#[derive(Default)]
struct CollectingReporter {
    lines: Mutex<Vec<String>>,
}

impl ErrorReporter for CollectingReporter {
    fn report(&self, error: &ParseError) {
        self.lines.lock().push(error.line.clone());
    }
}

#[tokio::test]
async fn analyze_data_round_trip() {
    let (session, transport) = session(vec![MockResponse::lines(&[
        r#"{"type":"progress","data":{"stage":"planning"}}"#,
        r#"{"type":"content","data":{"text":"Result: "}}"#,
        r#"{"type":"content","data":{"text":"ok"}}"#,
        r#"{"type":"complete","data":{"conversation_id":42}}"#,
    ])]);

    let outcome = session.send_message("Analyze data", None).await.unwrap();

    assert_eq!(
        outcome,
        TurnOutcome::Completed {
            conversation_id: Some(ConversationId(42))
        }
    );
    let state = session.state();
    assert_eq!(state.messages.len(), 2);
    assert_eq!(state.messages[0].role, Role::User);
    assert_eq!(state.messages[0].content, "Analyze data");
    assert_eq!(state.messages[1].role, Role::Assistant);
    assert_eq!(state.messages[1].content, "Result: ok");
    assert_eq!(state.conversation_id, Some(ConversationId(42)));
    assert!(!state.is_loading);
    assert!(!state.is_connected);
    assert!(state.error.is_none());
    assert!(state.progress.is_none());

    // send, opened, progress, two chunks, complete
    assert_eq!(session.store().revision(), 6);
    assert_eq!(transport.inner().requests()[0].conversation_id, None);
}

#[tokio::test]
async fn artifacts_attach_to_reply() {
    let (session, _) = session(vec![MockResponse::lines(&[
        r#"{"type":"content","data":{"text":"Here is the table"}}"#,
        r#"{"type":"artifact","data":{"type":"table","content":{"rows":[[1,2]]}}}"#,
        r#"{"type":"complete","data":{"conversation_id":1}}"#,
    ])]);

    session.send_message("show me", None).await.unwrap();

    let state = session.state();
    let reply = state.current_assistant().unwrap();
    assert_eq!(reply.artifacts.len(), 1);
    assert_eq!(reply.artifacts[0].kind, "table");
    assert_eq!(reply.artifacts[0].content["rows"][0][1], 2);
}

#[tokio::test(start_paused = true)]
async fn retries_are_invisible_until_final_error() {
    let (session, transport) = session(vec![
        server_error(),
        server_error(),
        server_error(),
        server_error(),
    ]);

    let running = {
        let session = session.clone();
        tokio::spawn(async move { session.send_message("q", None).await })
    };

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(transport.inner().call_count(), 2);
    let mid = session.state();
    assert!(mid.is_loading);
    assert!(mid.error.is_none());

    let outcome = running.await.unwrap().unwrap();
    let expected = "server error (500): boom".to_string();
    assert_eq!(outcome, TurnOutcome::Failed { message: expected.clone() });
    assert_eq!(transport.inner().call_count(), 4);
    assert_eq!(transport.total_retries(), 3);

    let state = session.state();
    assert_eq!(state.error, Some(expected));
    assert!(!state.is_loading);
    assert!(!state.is_connected);
}

#[tokio::test(start_paused = true)]
async fn recovers_after_transient_failure() {
    let (session, transport) = session(vec![
        MockResponse::Error(TransportError::NetworkError("connection refused".into())),
        MockResponse::lines(&[r#"{"type":"content","data":{"text":"fine"}}"#]),
    ]);

    let outcome = session.send_message("q", None).await.unwrap();

    assert!(matches!(outcome, TurnOutcome::Completed { .. }));
    assert_eq!(transport.inner().call_count(), 2);
    assert!(session.state().error.is_none());
    assert_eq!(session.state().messages[1].content, "fine");
}

#[tokio::test(start_paused = true)]
async fn client_error_surfaces_without_retry() {
    let (session, transport) = session(vec![MockResponse::Error(TransportError::ClientError {
        status: 404,
        message: "not found".into(),
    })]);

    let started = tokio::time::Instant::now();
    let outcome = session.send_message("q", None).await.unwrap();

    assert_eq!(
        outcome,
        TurnOutcome::Failed {
            message: "request rejected (404): not found".into()
        }
    );
    assert_eq!(transport.inner().call_count(), 1);
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test]
async fn body_failure_after_open_is_not_retried() {
    let (session, transport) = session(vec![MockResponse::ChunksThenError(
        vec![Bytes::from_static(b"{\"type\":\"content\",\"data\":{\"text\":\"par\"}}\n")],
        TransportError::StreamInterrupted("connection reset".into()),
    )]);

    let outcome = session.send_message("q", None).await.unwrap();

    assert_eq!(
        outcome,
        TurnOutcome::Failed {
            message: "stream interrupted: connection reset".into()
        }
    );
    assert_eq!(transport.inner().call_count(), 1);
    let state = session.state();
    assert_eq!(state.messages[1].content, "par");
    assert!(!state.is_connected);
}

#[tokio::test]
async fn error_event_ends_turn_with_message() {
    let (session, _) = session(vec![MockResponse::lines(&[
        r#"{"type":"content","data":{"text":"Looking"}}"#,
        r#"{"type":"error","data":{"message":"Query failed"}}"#,
        r#"{"type":"content","data":{"text":"ignored"}}"#,
    ])]);

    let outcome = session.send_message("q", None).await.unwrap();

    assert_eq!(outcome, TurnOutcome::Failed { message: "Query failed".into() });
    let state = session.state();
    assert_eq!(state.error.as_deref(), Some("Query failed"));
    assert_eq!(state.messages[1].content, "Looking");
    assert!(!state.is_loading);
}

#[tokio::test]
async fn malformed_record_is_reported_and_skipped() {
    let reporter = Arc::new(CollectingReporter::default());
    let (session, _) = session(vec![MockResponse::lines(&[
        r#"{"type":"content","data":{"text":"a"}}"#,
        "not json",
        r#"{"type":"content","data":{"text":"b"}}"#,
        r#"{"type":"complete","data":{"conversation_id":3}}"#,
    ])]);
    let session = session.with_reporter(reporter.clone());

    let outcome = session.send_message("q", None).await.unwrap();

    assert!(matches!(outcome, TurnOutcome::Completed { .. }));
    assert_eq!(session.state().messages[1].content, "ab");
    assert!(session.state().error.is_none());
    assert_eq!(*reporter.lines.lock(), vec!["not json".to_string()]);
}

#[tokio::test]
async fn implicit_completion_reuses_conversation() {
    let (session, transport) = session(vec![
        MockResponse::lines(&[r#"{"type":"complete","data":{"conversation_id":7}}"#]),
        MockResponse::lines(&[r#"{"type":"content","data":{"text":"more"}}"#]),
        MockResponse::lines(&[r#"{"type":"complete","data":{}}"#]),
    ]);

    session.send_message("first", None).await.unwrap();
    let second = session.send_message("second", None).await.unwrap();
    assert_eq!(
        second,
        TurnOutcome::Completed {
            conversation_id: Some(ConversationId(7))
        }
    );

    session.send_message("third", Some(ConversationId(9))).await.unwrap();

    let requests = transport.inner().requests();
    assert_eq!(requests[0].conversation_id, None);
    assert_eq!(requests[1].conversation_id, Some(ConversationId(7)));
    assert_eq!(requests[2].conversation_id, Some(ConversationId(9)));
    assert_eq!(session.state().conversation_id, Some(ConversationId(7)));
}

#[tokio::test(start_paused = true)]
async fn cancel_mid_stream_keeps_partial_reply() {
    let (session, _) = session(vec![MockResponse::lines_then_hang(&[
        r#"{"type":"content","data":{"text":"partial"}}"#,
    ])]);

    let running = {
        let session = session.clone();
        tokio::spawn(async move { session.send_message("q", None).await })
    };
    wait_for_content(&session, "partial").await;

    assert!(session.cancel());
    let after_cancel = session.store().revision();
    assert!(!session.cancel());

    assert_eq!(running.await.unwrap(), Ok(TurnOutcome::Cancelled));
    assert_eq!(session.store().revision(), after_cancel);

    let state = session.state();
    assert!(!state.is_loading);
    assert!(!state.is_connected);
    assert!(state.error.is_none());
    assert_eq!(state.messages[1].content, "partial");
    assert!(!session.is_busy());
}

#[tokio::test(start_paused = true)]
async fn cancel_during_backoff_stops_retrying() {
    let (session, transport) = session(vec![server_error(), server_error()]);

    let running = {
        let session = session.clone();
        tokio::spawn(async move { session.send_message("q", None).await })
    };
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(session.cancel());

    assert_eq!(running.await.unwrap(), Ok(TurnOutcome::Cancelled));
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.inner().call_count(), 1);
    assert!(session.state().error.is_none());
}

#[tokio::test(start_paused = true)]
async fn reset_mid_turn_restores_initial_state() {
    let (session, _) = session(vec![
        MockResponse::lines(&[r#"{"type":"complete","data":{"conversation_id":11}}"#]),
        MockResponse::lines_then_hang(&[r#"{"type":"content","data":{"text":"half"}}"#]),
    ]);
    session.send_message("first", None).await.unwrap();

    let running = {
        let session = session.clone();
        tokio::spawn(async move { session.send_message("second", None).await })
    };
    wait_for_content(&session, "half").await;

    session.reset();
    let after_reset = session.store().revision();

    assert_eq!(running.await.unwrap(), Ok(TurnOutcome::Cancelled));
    assert_eq!(*session.state(), SessionState::default());
    assert_eq!(session.store().revision(), after_reset);
}

#[tokio::test(start_paused = true)]
async fn dropping_send_future_cancels_turn() {
    let (session, _) = session(vec![MockResponse::Hang]);

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        session.send_message("q", None),
    )
    .await;

    assert!(result.is_err());
    assert!(!session.is_busy());
    let state = session.state();
    assert!(!state.is_loading);
    assert!(state.error.is_none());
}

#[tokio::test(start_paused = true)]
async fn idle_body_fails_turn() {
    let (session, _) = session(vec![MockResponse::lines_then_hang(&[
        r#"{"type":"content","data":{"text":"x"}}"#,
    ])]);
    let session = session.with_idle_timeout(Some(Duration::from_secs(10)));

    let outcome = session.send_message("q", None).await.unwrap();

    match outcome {
        TurnOutcome::Failed { message } => assert!(message.contains("idle timeout"), "{message}"),
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(!session.state().is_loading);
}
