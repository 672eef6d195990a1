//! Edit Mode Integration Tests
//!
//! Regenerate, replace and select-regenerated across stored turns.

use chat_relay::models::chat::MessageRef;
use chat_relay::models::message::Message;
use chat_relay::storage::MessageStore;
use chat_relay_core::RelayError;
use chat_relay_llm::MessageRole;

use crate::support::*;

fn users(messages: &[Message]) -> usize {
    messages
        .iter()
        .filter(|m| m.role == MessageRole::User)
        .count()
}

async fn first_turn(h: &Harness, conversation_id: &str) -> Vec<Message> {
    run_to_end(&h.executor, request(conversation_id, "q1")).await;
    h.store.find_all(conversation_id).await.unwrap()
}

#[tokio::test]
async fn test_regen_blanks_answer_and_adds_no_question() {
    let h = harness(ScriptedBackend::new(vec![text("answer"), complete()]), &[], 8);
    let before = first_turn(&h, "c-regen").await;
    let (a1, u1) = (before[0].clone(), before[1].clone());

    let mut req = request("c-regen", "");
    req.regen = true;
    let (_, frames) = run_to_end(&h.executor, req).await;
    let meta: serde_json::Value = serde_json::from_str(&frames[0].data).unwrap();
    assert!(meta["userMessageId"].is_null());
    assert_eq!(meta["replyId"], u1.id);

    let after = h.store.find_all("c-regen").await.unwrap();
    assert_eq!(after.len(), 3);
    assert_eq!(users(&after), users(&before));

    let a2 = &after[0];
    assert_eq!(a2.content, "answer");
    assert_eq!(a2.reply_id, u1.id);
    assert_eq!(a2.index, a1.index + 1);

    let old = after.iter().find(|m| m.id == a1.id).unwrap();
    assert!(old.content.is_empty());
    assert_eq!(old.ext.brief, "answer");
}

#[tokio::test]
async fn test_replace_blanks_last_pair_and_asks_again() {
    let h = harness(ScriptedBackend::new(vec![text("answer"), complete()]), &[], 8);
    let before = first_turn(&h, "c-replace").await;

    let mut req = request("c-replace", "q1, reworded");
    req.replace = true;
    run_to_end(&h.executor, req).await;

    let after = h.store.find_all("c-replace").await.unwrap();
    assert_eq!(after.len(), 4);
    assert_eq!(users(&after), users(&before) + 1);
    for old in &before {
        let stored = after.iter().find(|m| m.id == old.id).unwrap();
        assert!(stored.content.is_empty());
    }
    assert_eq!(after[1].content, "q1, reworded");
    assert_eq!(after[0].reply_id, after[1].id);
}

#[tokio::test]
async fn test_select_regen_restores_chosen_answer() {
    let h = harness(ScriptedBackend::new(vec![text("answer"), complete()]), &[], 8);
    let before = first_turn(&h, "c-select").await;
    let a1 = before[0].clone();

    let mut regen = request("c-select", "");
    regen.regen = true;
    run_to_end(&h.executor, regen).await;
    let a2 = h.store.find_all("c-select").await.unwrap()[0].clone();

    let mut select = request("c-select", "q2");
    select.select_regen = true;
    select.selected_id = Some(MessageRef::Number(a1.id));
    run_to_end(&h.executor, select).await;

    let after = h.store.find_all("c-select").await.unwrap();
    let restored = after.iter().find(|m| m.id == a1.id).unwrap();
    let dropped = after.iter().find(|m| m.id == a2.id).unwrap();
    assert_eq!(restored.content, restored.ext.brief);
    assert!(!restored.content.is_empty());
    assert!(dropped.content.is_empty());

    let question = &after[1];
    assert_eq!(question.role, MessageRole::User);
    assert_eq!(question.content, "q2");
    assert_eq!(question.reply_id, a1.id);
}

#[tokio::test]
async fn test_select_regen_rejects_foreign_message() {
    let h = harness(ScriptedBackend::new(vec![text("answer"), complete()]), &[], 8);
    let before = first_turn(&h, "c-foreign").await;
    let question = before[1].clone();

    let mut select = request("c-foreign", "q2");
    select.select_regen = true;
    select.selected_id = Some(MessageRef::Number(question.id));
    let err = h.executor.prepare(&identity(), select).await.unwrap_err();
    assert!(matches!(err, RelayError::InvalidReference(_)));
}

#[tokio::test]
async fn test_regen_needs_history() {
    let h = harness(ScriptedBackend::new(vec![complete()]), &[], 8);

    let mut fresh = request("", "");
    fresh.regen = true;
    let err = h.executor.prepare(&identity(), fresh).await.unwrap_err();
    assert!(matches!(err, RelayError::PreconditionFailed(_)));

    let mut empty = request("c-empty", "");
    empty.regen = true;
    let err = h.executor.prepare(&identity(), empty).await.unwrap_err();
    assert!(matches!(err, RelayError::PreconditionFailed(_)));
}

#[tokio::test]
async fn test_conflicting_edit_flags() {
    let h = harness(ScriptedBackend::new(vec![complete()]), &[], 8);
    let mut req = request("c-flags", "q");
    req.regen = true;
    req.replace = true;
    let err = h.executor.prepare(&identity(), req).await.unwrap_err();
    assert!(matches!(err, RelayError::PreconditionFailed(_)));
}

#[tokio::test]
async fn test_regen_with_unknown_reply_id_changes_nothing() {
    let h = harness(ScriptedBackend::new(vec![text("answer"), complete()]), &[], 8);
    let before = first_turn(&h, "c-unknown").await;

    let mut req = request("c-unknown", "");
    req.regen = true;
    req.reply_id = Some(MessageRef::Number(999));
    let err = h.executor.prepare(&identity(), req).await.unwrap_err();
    assert!(matches!(err, RelayError::InvalidReference(_)));

    let after = h.store.find_all("c-unknown").await.unwrap();
    assert_eq!(after.len(), before.len());
    assert_eq!(after[0].content, "answer");
}
