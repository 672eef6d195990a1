//! Test fixtures: a scripted backend, a fake search tool and executor setup.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chat_relay::models::chat::ChatRequest;
use chat_relay::models::event::SseFrame;
use chat_relay::services::auth::{Identity, StaticTokenVerifier};
use chat_relay::services::moderation::KeywordFilter;
use chat_relay::services::relay::{PipelineExecutor, PipelineSettings, RelayOutcome};
use chat_relay::services::search::{SearchOutcome, SearchProgress, SearchTool};
use chat_relay::state::AppState;
use chat_relay::storage::{Database, SqliteMessageStore};
use chat_relay_core::{pipe, CanonicalDelta, Citation, RelayResult, UnifiedStreamEvent};
use chat_relay_llm::{
    BackendDescriptor, BackendRegistry, ChatBackend, DeltaSource, LlmRequestOptions, LlmResponse,
    LlmResult, Message, StopReason, DELTA_PIPE_CAPACITY,
};
use tokio_util::sync::CancellationToken;

pub const MODEL_ID: &str = "scripted";
pub const BOT_ID: &str = "bot-scripted";
pub const TOKEN: &str = "test-token";
pub const USER: &str = "alice";
pub const OTHER_TOKEN: &str = "other-token";
pub const OTHER_USER: &str = "mallory";

pub fn text(s: &str) -> UnifiedStreamEvent {
    UnifiedStreamEvent::delta(CanonicalDelta::text(s))
}

pub fn complete() -> UnifiedStreamEvent {
    UnifiedStreamEvent::Complete {
        stop_reason: Some("stop".to_string()),
    }
}

/// Replays a fixed event script. With `hold_after`, it stops after that
/// many events and waits to be cancelled.
pub struct ScriptedBackend {
    script: Vec<UnifiedStreamEvent>,
    hold_after: Option<usize>,
    pub cancelled: Arc<AtomicBool>,
    pub last_input: Arc<Mutex<Vec<Message>>>,
}

impl ScriptedBackend {
    pub fn new(script: Vec<UnifiedStreamEvent>) -> Self {
        Self {
            script,
            hold_after: None,
            cancelled: Arc::new(AtomicBool::new(false)),
            last_input: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn holding_after(mut self, n: usize) -> Self {
        self.hold_after = Some(n);
        self
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-1"
    }

    fn supports_thinking(&self) -> bool {
        true
    }

    async fn stream(
        &self,
        messages: Vec<Message>,
        _options: LlmRequestOptions,
        cancel: CancellationToken,
    ) -> LlmResult<DeltaSource> {
        *self.last_input.lock().unwrap() = messages;
        let (tx, rx) = pipe(DELTA_PIPE_CAPACITY);
        let script = self.script.clone();
        let hold_after = self.hold_after;
        let cancelled = self.cancelled.clone();
        tokio::spawn(async move {
            for (i, event) in script.into_iter().enumerate() {
                if hold_after == Some(i) {
                    cancel.cancelled().await;
                    cancelled.store(true, Ordering::SeqCst);
                    return;
                }
                tokio::select! {
                    _ = cancel.cancelled() => {
                        cancelled.store(true, Ordering::SeqCst);
                        return;
                    }
                    sent = tx.send(event) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
        });
        Ok(rx)
    }

    async fn generate(
        &self,
        messages: Vec<Message>,
        _options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse> {
        *self.last_input.lock().unwrap() = messages;
        let deltas = self
            .script
            .iter()
            .filter_map(|event| match event {
                UnifiedStreamEvent::Delta { delta } => Some(delta.clone()),
                _ => None,
            })
            .collect();
        Ok(LlmResponse {
            deltas,
            stop_reason: StopReason::EndTurn,
            usage: None,
            model: "scripted-1".to_string(),
        })
    }
}

/// Reports fixed progress and returns two citations.
pub struct FakeSearch;

#[async_trait]
impl SearchTool for FakeSearch {
    async fn search(
        &self,
        query: &str,
        progress: &mut dyn SearchProgress,
    ) -> RelayResult<SearchOutcome> {
        progress.on_found(5).await;
        progress.on_chosen(2).await;
        let citations: Vec<Citation> = ["https://a.example", "https://b.example"]
            .iter()
            .enumerate()
            .map(|(i, url)| Citation {
                index: i as u32 + 1,
                title: Some(format!("Result {}", i + 1)),
                url: url.to_string(),
                site_name: "example".to_string(),
                snippet: None,
            })
            .collect();
        for citation in &citations {
            progress.on_cite(citation.clone()).await;
        }
        Ok(SearchOutcome {
            citations,
            context: format!("Fresh facts about {}", query),
        })
    }
}

pub fn registry(backend: ScriptedBackend) -> BackendRegistry {
    BackendRegistry::builder()
        .register_instance(
            BackendDescriptor {
                model_id: MODEL_ID.to_string(),
                bot_id: BOT_ID.to_string(),
                bot_name: "Scripted".to_string(),
            },
            Arc::new(backend),
        )
        .build()
}

pub struct Harness {
    pub executor: PipelineExecutor,
    pub store: Arc<SqliteMessageStore>,
}

pub fn harness(backend: ScriptedBackend, banned: &[&str], moderation_every: usize) -> Harness {
    let store = Arc::new(SqliteMessageStore::new(Database::new_in_memory().unwrap()));
    let executor = PipelineExecutor::new(
        store.clone(),
        Arc::new(registry(backend)),
        Arc::new(KeywordFilter::new(banned).unwrap()),
        PipelineSettings {
            channel_capacity: 4,
            moderation_every,
        },
    );
    Harness { executor, store }
}

pub fn app_state(backend: ScriptedBackend) -> AppState {
    AppState::new(
        Database::new_in_memory().unwrap(),
        registry(backend),
        Arc::new(
            StaticTokenVerifier::default()
                .with_token(TOKEN, USER)
                .with_token(OTHER_TOKEN, OTHER_USER),
        ),
        Arc::new(KeywordFilter::empty()),
        PipelineSettings::default(),
    )
}

pub fn identity() -> Identity {
    identity_of(USER)
}

pub fn identity_of(user_id: &str) -> Identity {
    Identity {
        user_id: user_id.to_string(),
    }
}

pub fn request(conversation_id: &str, query: &str) -> ChatRequest {
    ChatRequest {
        conversation_id: conversation_id.to_string(),
        section_id: "s1".to_string(),
        model: MODEL_ID.to_string(),
        query: query.to_string(),
        ..ChatRequest::default()
    }
}

/// Run a prepared request to the end and collect every frame it sent.
pub async fn run_to_end(
    executor: &PipelineExecutor,
    request: ChatRequest,
) -> (RelayOutcome, Vec<SseFrame>) {
    let prepared = executor.prepare(&identity(), request).await.unwrap();
    let (tx, mut rx) = pipe(64);
    let outcome = executor.run(prepared, tx).await;
    let mut frames = Vec::new();
    while let Some(frame) = rx.recv().await {
        frames.push(frame);
    }
    (outcome, frames)
}

pub async fn wait_for(flag: &AtomicBool) -> bool {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !flag.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}
