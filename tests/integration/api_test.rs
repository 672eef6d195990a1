//! Router Integration Tests
//!
//! Drives the axum router in-process with `tower::ServiceExt::oneshot`.

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use chat_relay::api::create_router;

use crate::support::*;

fn app() -> Router {
    create_router(app_state(ScriptedBackend::new(vec![
        text("Hel"),
        text("lo"),
        complete(),
    ])))
}

fn post(uri: &str, body: Value, authorized: bool) -> Request<Body> {
    post_as(uri, body, authorized.then_some(TOKEN))
}

fn post_as(uri: &str, body: Value, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health() {
    let response = app().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["backends"], 1);
    assert_eq!(body["database"], true);
}

#[tokio::test]
async fn test_chat_requires_token() {
    let response = app()
        .oneshot(post("/api/chat", json!({"model": MODEL_ID, "query": "hi"}), false))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "unauthorized");
}

#[tokio::test]
async fn test_chat_streams_sse() {
    let response = app()
        .oneshot(post(
            "/api/chat",
            json!({"conversationId": "c-sse", "model": MODEL_ID, "query": "hi"}),
            true,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.starts_with("text/event-stream"));

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = String::from_utf8(bytes.to_vec()).unwrap();
    let events: Vec<&str> = body
        .lines()
        .filter_map(|line| line.strip_prefix("event:").map(str::trim))
        .collect();
    assert_eq!(events, vec!["meta", "model", "chat", "chat", "end"]);
    let ids: Vec<&str> = body
        .lines()
        .filter_map(|line| line.strip_prefix("id:").map(str::trim))
        .collect();
    assert_eq!(ids, vec!["0", "1", "2", "3", "4"]);
}

#[tokio::test]
async fn test_chat_without_streaming_returns_message() {
    let response = app()
        .oneshot(post(
            "/api/chat",
            json!({"conversationId": "c-json", "model": MODEL_ID, "query": "hi", "stream": false}),
            true,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["content"], "Hello");
    assert_eq!(body["role"], "assistant");
}

#[tokio::test]
async fn test_malformed_message_id_is_rejected() {
    let response = app()
        .oneshot(post(
            "/api/chat",
            json!({
                "conversationId": "c-bad",
                "model": MODEL_ID,
                "query": "hi",
                "selectRegen": true,
                "selectedId": "not-a-number"
            }),
            true,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["code"], "invalid_reference");
}

#[tokio::test]
async fn test_pagination_and_feedback() {
    let app = app();
    let response = app
        .clone()
        .oneshot(post(
            "/api/chat",
            json!({"conversationId": "c-page", "model": MODEL_ID, "query": "hi", "stream": false}),
            true,
        ))
        .await
        .unwrap();
    let answer = body_json(response).await;

    let response = app
        .clone()
        .oneshot(get("/api/conversations/c-page/messages?size=1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let page = body_json(response).await;
    assert_eq!(page["messages"].as_array().unwrap().len(), 1);
    assert_eq!(page["hasMore"], true);
    assert_eq!(page["messages"][0]["id"], answer["id"]);

    let cursor = page["nextCursor"].as_i64().unwrap();
    let response = app
        .clone()
        .oneshot(get(&format!(
            "/api/conversations/c-page/messages?size=1&cursor={}",
            cursor
        )))
        .await
        .unwrap();
    let older = body_json(response).await;
    assert_eq!(older["messages"][0]["role"], "user");
    assert_eq!(older["hasMore"], false);
    let question_id = older["messages"][0]["id"].as_i64().unwrap();

    let response = app
        .clone()
        .oneshot(post(
            &format!("/api/messages/{}/feedback", answer["id"]),
            json!({"action": "like"}),
            true,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["feedback"], "like");

    let response = app
        .oneshot(post(
            &format!("/api/messages/{}/feedback", question_id),
            json!({"action": "like"}),
            true,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
}

#[tokio::test]
async fn test_other_users_cannot_touch_a_conversation() {
    let app = app();
    let response = app
        .clone()
        .oneshot(post(
            "/api/chat",
            json!({"conversationId": "c-mine", "model": MODEL_ID, "query": "hi", "stream": false}),
            true,
        ))
        .await
        .unwrap();
    let answer = body_json(response).await;

    let response = app
        .clone()
        .oneshot(post_as(
            "/api/chat",
            json!({
                "conversationId": "c-mine",
                "model": MODEL_ID,
                "query": "what did I say?",
                "replace": true,
                "stream": false
            }),
            Some(OTHER_TOKEN),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["code"], "invalid_reference");

    let response = app
        .clone()
        .oneshot(post_as(
            &format!("/api/messages/{}/feedback", answer["id"]),
            json!({"action": "dislike"}),
            Some(OTHER_TOKEN),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .oneshot(get("/api/conversations/c-mine/messages"))
        .await
        .unwrap();
    let page = body_json(response).await;
    assert_eq!(page["messages"].as_array().unwrap().len(), 2);
    assert_eq!(page["messages"][0]["content"], "Hello");
    assert_eq!(page["messages"][0]["feedback"], "none");
}
