//! Completion Pipeline Integration Tests
//!
//! Event ordering, cancellation, moderation, web search and persistence of
//! the streamed answer.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chat_relay::models::event::EventKind;
use chat_relay::services::relay::RelayOutcome;
use chat_relay::storage::MessageStore;
use chat_relay_core::{pipe, CanonicalDelta, RelayError, UnifiedStreamEvent};
use chat_relay_llm::MessageRole;
use serde_json::Value;

use crate::support::*;

fn kinds(frames: &[chat_relay::models::event::SseFrame]) -> Vec<EventKind> {
    frames.iter().map(|f| f.kind).collect()
}

fn json(data: &str) -> Value {
    serde_json::from_str(data).unwrap()
}

// ============================================================================
// Event Stream Tests
// ============================================================================

#[tokio::test]
async fn test_events_in_order_with_contiguous_ids() {
    let backend = ScriptedBackend::new(vec![text("Hel"), text("lo"), complete()]);
    let h = harness(backend, &[], 8);

    let (outcome, frames) = run_to_end(&h.executor, request("c-order", "hi")).await;

    assert_eq!(outcome, RelayOutcome::Completed);
    assert_eq!(
        kinds(&frames),
        vec![
            EventKind::Meta,
            EventKind::Model,
            EventKind::Chat,
            EventKind::Chat,
            EventKind::End
        ]
    );
    let ids: Vec<u64> = frames.iter().map(|f| f.id).collect();
    assert_eq!(ids, vec![0, 1, 2, 3, 4]);

    let meta = json(&frames[0].data);
    assert_eq!(meta["conversationId"], "c-order");
    let model = json(&frames[1].data);
    assert_eq!(model["botId"], BOT_ID);
    let chat = json(&frames[2].data);
    assert_eq!(chat["message"]["content"], "Hel");
    assert_eq!(chat["message"]["contentType"], "text");
    assert_eq!(chat["isDelta"], true);
    assert_eq!(chat["replyId"], meta["userMessageId"]);
}

#[tokio::test]
async fn test_answer_is_persisted_with_question() {
    let backend = ScriptedBackend::new(vec![text("Hel"), text("lo"), complete()]);
    let h = harness(backend, &[], 8);

    run_to_end(&h.executor, request("c-persist", "hi")).await;

    let stored = h.store.find_all("c-persist").await.unwrap();
    assert_eq!(stored.len(), 2);
    let (answer, question) = (&stored[0], &stored[1]);
    assert_eq!(question.role, MessageRole::User);
    assert_eq!(question.content, "hi");
    assert_eq!(answer.role, MessageRole::Assistant);
    assert_eq!(answer.content, "Hello");
    assert_eq!(answer.reply_id, question.id);
    assert_eq!(answer.index, question.index + 1);
    assert_eq!(answer.ext.bot_state.as_ref().unwrap().bot_id, BOT_ID);
}

#[tokio::test]
async fn test_content_is_concatenated_text_deltas() {
    let backend = ScriptedBackend::new(vec![
        UnifiedStreamEvent::delta(CanonicalDelta::think("hmm")),
        text("Use "),
        text("[code:0]"),
        UnifiedStreamEvent::delta(CanonicalDelta::CodeFence {
            language: "rust".into(),
            index: 0,
        }),
        UnifiedStreamEvent::delta(CanonicalDelta::CodeBody {
            text: "fn main() {}".into(),
            index: 0,
        }),
        text(" done"),
        UnifiedStreamEvent::Usage {
            input_tokens: 3,
            output_tokens: 4,
            thinking_tokens: None,
        },
        complete(),
    ]);
    let h = harness(backend, &[], 8);

    let (_, frames) = run_to_end(&h.executor, request("c-concat", "code please")).await;
    let chats: Vec<Value> = frames
        .iter()
        .filter(|f| f.kind == EventKind::Chat)
        .map(|f| json(&f.data))
        .collect();
    assert_eq!(chats.len(), 6);
    let emitted_text: String = chats
        .iter()
        .filter(|c| c["message"]["contentType"] == "text")
        .map(|c| c["message"]["content"].as_str().unwrap().to_string())
        .collect();

    let answer = &h.store.find_all("c-concat").await.unwrap()[0];
    assert_eq!(answer.content, emitted_text);
    assert_eq!(answer.content, "Use [code:0] done");
    assert_eq!(answer.ext.think, "hmm");
    assert_eq!(answer.ext.code_segments.len(), 1);
    assert_eq!(answer.ext.code_segments[0].code, "fn main() {}");
    assert_eq!(answer.ext.usage.map(|u| u.output_tokens), Some(4));
}

#[tokio::test]
async fn test_new_conversation_gets_an_id() {
    let backend = ScriptedBackend::new(vec![text("ok"), complete()]);
    let h = harness(backend, &[], 8);

    let (_, frames) = run_to_end(&h.executor, request("", "hello")).await;
    let meta = json(&frames[0].data);
    let conversation_id = meta["conversationId"].as_str().unwrap();
    assert!(!conversation_id.is_empty());
    assert_eq!(h.store.find_all(conversation_id).await.unwrap().len(), 2);
}

// ============================================================================
// Cancellation Tests
// ============================================================================

#[tokio::test]
async fn test_client_disconnect_after_two_deltas() {
    let backend = ScriptedBackend::new(vec![
        text("one "),
        text("two "),
        text("three"),
        complete(),
    ])
    .holding_after(2);
    let cancelled = backend.cancelled.clone();
    let h = harness(backend, &[], 8);

    let prepared = h
        .executor
        .prepare(&identity(), request("c-cancel", "count"))
        .await
        .unwrap();
    let (tx, mut rx) = pipe(4);
    let executor = h.executor.clone();
    let task = tokio::spawn(async move { executor.run(prepared, tx).await });

    let mut received = Vec::new();
    for _ in 0..4 {
        received.push(rx.recv().await.unwrap().kind);
    }
    drop(rx);

    let outcome = task.await.unwrap();
    assert_eq!(outcome, RelayOutcome::Interrupted);
    assert_eq!(
        received,
        vec![EventKind::Meta, EventKind::Model, EventKind::Chat, EventKind::Chat]
    );
    assert!(wait_for(&cancelled).await, "backend was not cancelled");

    let answer = &h.store.find_all("c-cancel").await.unwrap()[0];
    assert_eq!(answer.role, MessageRole::Assistant);
    assert_eq!(answer.content, "one two ");
}

// ============================================================================
// Failure Tests
// ============================================================================

#[tokio::test]
async fn test_backend_error_ends_stream_with_error_event() {
    let backend = ScriptedBackend::new(vec![
        text("partial"),
        UnifiedStreamEvent::Error {
            message: "upstream exploded".into(),
            code: None,
        },
    ]);
    let h = harness(backend, &[], 8);

    let (outcome, frames) = run_to_end(&h.executor, request("c-fail", "go")).await;

    assert!(matches!(
        outcome,
        RelayOutcome::Failed(RelayError::BackendUnavailable(_))
    ));
    let last = frames.last().unwrap();
    assert_eq!(last.kind, EventKind::Error);
    assert_eq!(json(&last.data)["code"], "backend_unavailable");
    assert_eq!(
        h.store.find_all("c-fail").await.unwrap()[0].content,
        "partial"
    );
}

#[tokio::test]
async fn test_unknown_model_fails_before_any_event() {
    let h = harness(ScriptedBackend::new(vec![complete()]), &[], 8);
    let mut req = request("c-unknown", "hi");
    req.model = "missing".into();

    let err = h.executor.prepare(&identity(), req).await.unwrap_err();
    assert!(matches!(err, RelayError::InvalidReference(_)));
    assert!(h.store.find_all("c-unknown").await.unwrap().is_empty());
}

// ============================================================================
// Moderation Tests
// ============================================================================

#[tokio::test]
async fn test_sensitive_question_is_blocked() {
    let h = harness(ScriptedBackend::new(vec![complete()]), &["secret"], 8);

    let err = h
        .executor
        .prepare(&identity(), request("c-in", "tell me the SECRET"))
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::SensitiveContent(_)));
    assert!(h.store.find_all("c-in").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sensitive_answer_is_stopped_and_suppressed() {
    let backend = ScriptedBackend::new(vec![
        text("this is "),
        text("Forbidden"),
        text(" tail"),
        complete(),
    ]);
    let h = harness(backend, &["forbidden"], 1);

    let (outcome, frames) = run_to_end(&h.executor, request("c-out", "go")).await;

    assert!(matches!(
        outcome,
        RelayOutcome::Failed(RelayError::SensitiveContent(_))
    ));
    assert_eq!(
        kinds(&frames),
        vec![
            EventKind::Meta,
            EventKind::Model,
            EventKind::Chat,
            EventKind::Chat,
            EventKind::Error
        ]
    );
    assert_eq!(json(&frames[4].data)["code"], "sensitive_content");

    let answer = &h.store.find_all("c-out").await.unwrap()[0];
    assert!(answer.content.is_empty());
    assert!(answer.ext.sensitive);
    assert_eq!(answer.ext.brief, "this is Forbidden");
}

#[tokio::test]
async fn test_banned_term_in_reasoning_is_flagged() {
    let backend = ScriptedBackend::new(vec![
        UnifiedStreamEvent::delta(CanonicalDelta::think("plan a forbidden move")),
        text("all good"),
        complete(),
    ]);
    let h = harness(backend, &["forbidden"], 8);

    let (outcome, frames) = run_to_end(&h.executor, request("c-think", "go")).await;

    assert!(matches!(
        outcome,
        RelayOutcome::Failed(RelayError::SensitiveContent(_))
    ));
    assert_eq!(frames.last().unwrap().kind, EventKind::Error);
    let answer = &h.store.find_all("c-think").await.unwrap()[0];
    assert!(answer.ext.sensitive);
    assert!(answer.content.is_empty());
}

#[tokio::test]
async fn test_foreign_conversation_is_rejected() {
    let h = harness(ScriptedBackend::new(vec![text("ok"), complete()]), &[], 8);
    run_to_end(&h.executor, request("c-owned", "my secret plan")).await;
    let before = h.store.find_all("c-owned").await.unwrap();

    for (regen, replace) in [(false, false), (true, false), (false, true)] {
        let mut req = request("c-owned", "what did I say?");
        req.regen = regen;
        req.replace = replace;
        let err = h
            .executor
            .prepare(&identity_of(OTHER_USER), req)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::InvalidReference(_)));
    }

    let after = h.store.find_all("c-owned").await.unwrap();
    assert_eq!(after.len(), before.len());
    assert!(after.iter().all(|m| m.user_id == USER && !m.content.is_empty()));
}

// ============================================================================
// Web Search Tests
// ============================================================================

#[tokio::test]
async fn test_web_search_events_precede_chat() {
    let backend = ScriptedBackend::new(vec![text("answer"), complete()]);
    let last_input = backend.last_input.clone();
    let h = harness(backend, &[], 8);
    let executor = h.executor.clone().with_search(Arc::new(FakeSearch));

    let mut req = request("c-search", "what's new");
    req.web_search = true;
    let (outcome, frames) = run_to_end(&executor, req).await;

    assert_eq!(outcome, RelayOutcome::Completed);
    assert_eq!(
        kinds(&frames),
        vec![
            EventKind::Meta,
            EventKind::Model,
            EventKind::SearchStart,
            EventKind::SearchFind,
            EventKind::SearchChoose,
            EventKind::SearchCite,
            EventKind::SearchCite,
            EventKind::SearchEnd,
            EventKind::Chat,
            EventKind::End
        ]
    );
    assert_eq!(frames[3].data, "5");
    assert_eq!(frames[4].data, "2");
    assert_eq!(json(&frames[5].data)["index"], 0);
    assert_eq!(json(&frames[6].data)["index"], 1);

    let input = last_input.lock().unwrap().clone();
    let question = input.last().unwrap();
    assert!(question.content.contains("Fresh facts about what's new"));
    assert!(question.content.ends_with("what's new"));
    // Source numbers in the prompt match the indices sent to the client.
    assert!(question.content.contains("[0] Result 1 (https://a.example)"));
    assert!(question.content.contains("[1] Result 2 (https://b.example)"));
    assert!(!question.content.contains("[2]"));

    let answer = &h.store.find_all("c-search").await.unwrap()[0];
    assert_eq!(answer.ext.citations.len(), 2);
    // The stored question keeps its original wording.
    assert_eq!(h.store.find_all("c-search").await.unwrap()[1].content, "what's new");
}

#[tokio::test]
async fn test_web_search_without_tool_is_rejected() {
    let h = harness(ScriptedBackend::new(vec![complete()]), &[], 8);
    let mut req = request("c-nosearch", "hi");
    req.web_search = true;

    let err = h.executor.prepare(&identity(), req).await.unwrap_err();
    assert!(matches!(err, RelayError::PreconditionFailed(_)));
}

// ============================================================================
// Non-streaming Tests
// ============================================================================

#[tokio::test]
async fn test_complete_returns_stored_answer() {
    let backend = ScriptedBackend::new(vec![text("Hel"), text("lo"), complete()]);
    let h = harness(backend, &[], 8);
    let mut req = request("c-plain", "hi");
    req.stream = false;

    let prepared = h.executor.prepare(&identity(), req).await.unwrap();
    let message = h.executor.complete(prepared).await.unwrap();

    assert_eq!(message.content, "Hello");
    let stored = h.store.find_all("c-plain").await.unwrap();
    assert_eq!(stored[0].id, message.id);
    assert_eq!(stored[0].content, "Hello");
}

#[tokio::test]
async fn test_backend_tasks_stop_when_stream_finishes() {
    let backend = ScriptedBackend::new(vec![text("x"), complete()]);
    let cancelled = backend.cancelled.clone();
    let h = harness(backend, &[], 8);

    run_to_end(&h.executor, request("c-done", "hi")).await;
    assert!(!cancelled.load(Ordering::SeqCst));
}
