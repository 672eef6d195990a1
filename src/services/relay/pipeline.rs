//! Pipeline Executor
//!
//! Drives one completion request through its stages:
//!
//! ```text
//! LoadHistory -> ResolveOptions -> [WebSearch] -> Dispatch -> Stream -> Assemble -> Persist -> Done
//! ```
//!
//! [`PipelineExecutor::prepare`] runs everything up to the first event, so
//! its errors become plain error responses. [`PipelineExecutor::run`] owns
//! the event stream; from there on failures end the stream with an `error`
//! event instead.

use std::sync::Arc;

use chat_relay_core::{
    pipe, Citation, PipeReceiver, PipeSender, RelayError, RelayResult, UnifiedStreamEvent,
};
use chat_relay_llm::{BackendRegistry, ChatBackend, LlmRequestOptions, MessageRole};
use tracing::{debug, info, warn};

use super::assembler::{EventAssembler, SearchEvents};
use super::context::{ModelSelection, RelayContext, Stage};
use super::persist::persist_exchange;
use crate::models::chat::{ChatRequest, EditDescriptor};
use crate::models::event::SseFrame;
use crate::models::message::Message;
use crate::services::auth::Identity;
use crate::services::edit::{resolve_edit, NewIds, TurnScope};
use crate::services::moderation::SensitiveFilter;
use crate::services::search::{augment_query, SearchOutcome, SearchTool, SilentProgress};
use crate::storage::MessageStore;

/// Tunables for the executor.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    /// Capacity of the pipe between the pipeline and the SSE writer
    pub channel_capacity: usize,
    /// Check the accumulated answer every this many deltas
    pub moderation_every: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            channel_capacity: 4,
            moderation_every: 8,
        }
    }
}

/// How a streamed request ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayOutcome {
    Completed,
    /// The client went away; whatever arrived was still saved
    Interrupted,
    Failed(RelayError),
}

/// A request that passed every pre-stream check and has its messages
/// allocated.
pub struct PreparedRelay {
    pub ctx: RelayContext,
    backend: Arc<dyn ChatBackend>,
    /// Model input, oldest first
    input: Vec<Message>,
    /// Question used for web search
    query: String,
    to_update: Vec<Message>,
    user_message: Option<Message>,
    assistant: Message,
}

impl std::fmt::Debug for PreparedRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedRelay")
            .field("ctx", &self.ctx)
            .field("backend", &self.backend.name())
            .field("input", &self.input.len())
            .field("to_update", &self.to_update.len())
            .finish()
    }
}

#[derive(Clone)]
pub struct PipelineExecutor {
    store: Arc<dyn MessageStore>,
    registry: Arc<BackendRegistry>,
    search: Option<Arc<dyn SearchTool>>,
    filter: Arc<dyn SensitiveFilter>,
    settings: PipelineSettings,
}

impl PipelineExecutor {
    pub fn new(
        store: Arc<dyn MessageStore>,
        registry: Arc<BackendRegistry>,
        filter: Arc<dyn SensitiveFilter>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            registry,
            search: None,
            filter,
            settings,
        }
    }

    pub fn with_search(mut self, search: Arc<dyn SearchTool>) -> Self {
        self.search = Some(search);
        self
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    /// Load history, resolve the model and apply the edit. Creates the user
    /// message and the empty assistant placeholder.
    pub async fn prepare(
        &self,
        identity: &Identity,
        request: ChatRequest,
    ) -> RelayResult<PreparedRelay> {
        let edit = request.edit_descriptor()?;

        // LoadHistory
        let (conversation_id, history) = if request.conversation_id.trim().is_empty() {
            if edit != EditDescriptor::Default {
                return Err(RelayError::precondition(format!(
                    "{} needs an existing conversation",
                    edit.mode()
                )));
            }
            (uuid::Uuid::new_v4().to_string(), Vec::new())
        } else {
            let history = self.store.find_all(&request.conversation_id).await?;
            if history.iter().any(|m| m.user_id != identity.user_id) {
                warn!(
                    user_id = %identity.user_id,
                    conversation_id = %request.conversation_id,
                    "[Pipeline] conversation belongs to another user"
                );
                return Err(RelayError::invalid_reference(format!(
                    "conversation {} not found",
                    request.conversation_id
                )));
            }
            (request.conversation_id.clone(), history)
        };

        // ResolveOptions
        let resolved = self.registry.resolve(&request.model, &identity.user_id)?;
        let mut ctx = RelayContext::new(
            conversation_id,
            request.section_id.clone(),
            identity.user_id.clone(),
            edit,
            ModelSelection::from_resolved(&resolved),
        );
        ctx.advance(Stage::ResolveOptions);
        ctx.web_search = request.web_search;

        if edit.creates_user_message() {
            if let Some(hit) = self.filter.check(&request.query) {
                warn!(
                    user_id = %ctx.user_id,
                    conversation_id = %ctx.conversation_id,
                    "[Pipeline] question blocked by moderation"
                );
                return Err(RelayError::sensitive(format!(
                    "question contains a banned term: {}",
                    hit.term
                )));
            }
        }
        if ctx.web_search && self.search.is_none() {
            return Err(RelayError::precondition("web search is not available"));
        }

        let ids = NewIds {
            user: if edit.creates_user_message() {
                Some(self.store.next_id().await?)
            } else {
                None
            },
            assistant: self.store.next_id().await?,
        };
        let scope = TurnScope {
            conversation_id: &ctx.conversation_id,
            section_id: &ctx.section_id,
            user_id: &ctx.user_id,
            query: &request.query,
        };
        let mut outcome = resolve_edit(edit, history, &scope, ids)?;

        outcome.assistant.ext.bot_state = Some(ctx.model.bot_state());
        if let Some(user) = &outcome.user_message {
            self.store.insert(user).await?;
        }
        self.store.insert(&outcome.assistant).await?;

        ctx.message_id = outcome.assistant.id;
        ctx.user_message_id = outcome.user_message.as_ref().map(|m| m.id);
        ctx.reply_id = outcome.reply_id();
        ctx.message_index = outcome.assistant.index;

        let query = outcome
            .history
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User && !m.is_blank())
            .map(|m| m.content.clone())
            .unwrap_or_else(|| request.query.clone());

        info!(
            conversation_id = %ctx.conversation_id,
            message_id = ctx.message_id,
            model = %ctx.model.model_id,
            mode = edit.mode(),
            history = outcome.history.len(),
            "[Pipeline] request prepared"
        );

        Ok(PreparedRelay {
            ctx,
            backend: resolved.backend,
            input: outcome.history,
            query,
            to_update: outcome.to_update,
            user_message: outcome.user_message,
            assistant: outcome.assistant,
        })
    }

    /// Run the prepared request on its own task and return the event stream.
    pub fn start(&self, prepared: PreparedRelay) -> PipeReceiver<SseFrame> {
        let (tx, rx) = pipe(self.settings.channel_capacity);
        let executor = self.clone();
        tokio::spawn(async move {
            executor.run(prepared, tx).await;
        });
        rx
    }

    /// Stream the prepared request into `tx`, then persist the exchange.
    pub async fn run(&self, prepared: PreparedRelay, tx: PipeSender<SseFrame>) -> RelayOutcome {
        let PreparedRelay {
            mut ctx,
            backend,
            mut input,
            query,
            to_update,
            user_message,
            assistant,
        } = prepared;
        let assembler = EventAssembler::new(tx);

        let result = self
            .stream_phase(&mut ctx, &assembler, backend.as_ref(), &mut input, &query)
            .await;

        ctx.advance(Stage::Assemble);
        assembler.finish(&mut ctx, &result).await;

        ctx.advance(Stage::Persist);
        persist_exchange(self.store.as_ref(), &ctx, to_update, user_message, assistant).await;

        let outcome = match result {
            Ok(()) => {
                ctx.advance(Stage::Done);
                RelayOutcome::Completed
            }
            Err(RelayError::Interrupted) => {
                ctx.advance(Stage::Done);
                RelayOutcome::Interrupted
            }
            Err(err) => {
                ctx.advance(Stage::Failed);
                RelayOutcome::Failed(err)
            }
        };
        info!(
            conversation_id = %ctx.conversation_id,
            message_id = ctx.message_id,
            deltas = ctx.buffers.deltas,
            tokens = ?ctx.buffers.usage.as_ref().map(|u| u.total_tokens()),
            events = ctx.events_issued(),
            outcome = ?outcome,
            "[Pipeline] request finished"
        );
        outcome
    }

    async fn stream_phase(
        &self,
        ctx: &mut RelayContext,
        assembler: &EventAssembler,
        backend: &dyn ChatBackend,
        input: &mut [Message],
        query: &str,
    ) -> RelayResult<()> {
        assembler.meta(ctx).await?;
        assembler.model(ctx).await?;

        if ctx.web_search {
            ctx.advance(Stage::WebSearch);
            self.web_search(ctx, assembler, input, query).await?;
        }

        ctx.advance(Stage::Dispatch);
        let messages = input.iter().map(Message::to_llm).collect();
        let options = LlmRequestOptions {
            user_id: Some(ctx.user_id.clone()),
            ..Default::default()
        };
        let mut deltas = tokio::select! {
            biased;
            _ = assembler.closed() => {
                ctx.cancel.cancel();
                return Err(RelayError::Interrupted);
            }
            source = backend.stream(messages, options, ctx.cancel.clone()) => source?,
        };

        ctx.advance(Stage::Stream);
        loop {
            let event = tokio::select! {
                biased;
                _ = assembler.closed() => {
                    debug!(
                        conversation_id = %ctx.conversation_id,
                        forwarded = ctx.buffers.deltas,
                        "[Pipeline] client disconnected, cancelling backend"
                    );
                    ctx.cancel.cancel();
                    return Err(RelayError::Interrupted);
                }
                event = deltas.recv() => event,
            };

            match event {
                Some(UnifiedStreamEvent::Delta { delta }) => {
                    if delta.is_empty() {
                        continue;
                    }
                    if let Err(err) = assembler.chat(ctx, delta).await {
                        ctx.cancel.cancel();
                        return Err(err);
                    }
                    if ctx.buffers.deltas % self.settings.moderation_every.max(1) == 0 {
                        self.moderate_output(ctx)?;
                    }
                }
                Some(UnifiedStreamEvent::Usage {
                    input_tokens,
                    output_tokens,
                    thinking_tokens,
                }) => ctx
                    .buffers
                    .record_usage(input_tokens, output_tokens, thinking_tokens),
                Some(UnifiedStreamEvent::Error { message, .. }) => {
                    warn!(
                        conversation_id = %ctx.conversation_id,
                        backend = backend.name(),
                        "[Pipeline] backend failed mid-stream: {}",
                        message
                    );
                    return Err(RelayError::backend(message));
                }
                Some(UnifiedStreamEvent::Complete { stop_reason }) => {
                    debug!(
                        conversation_id = %ctx.conversation_id,
                        stop_reason = ?stop_reason,
                        "[Pipeline] backend complete"
                    );
                    break;
                }
                None => {
                    return Err(RelayError::backend(
                        "backend stream closed without a terminal event",
                    ));
                }
            }
        }

        self.moderate_output(ctx)
    }

    async fn web_search(
        &self,
        ctx: &mut RelayContext,
        assembler: &EventAssembler,
        input: &mut [Message],
        query: &str,
    ) -> RelayResult<()> {
        let tool = self
            .search
            .clone()
            .ok_or_else(|| RelayError::precondition("web search is not available"))?;

        assembler.search_start(ctx).await?;
        let (searched, failure) = {
            let mut events = SearchEvents::new(assembler, ctx);
            let searched = tool.search(query, &mut events).await;
            (searched, events.into_failure())
        };
        if let Some(err) = failure {
            return Err(err);
        }

        let outcome = match searched {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(
                    conversation_id = %ctx.conversation_id,
                    "[Pipeline] web search failed, answering without it: {}",
                    err
                );
                SearchOutcome::default()
            }
        };
        if ctx.buffers.citations.is_empty() {
            for citation in outcome.citations.iter().cloned() {
                assembler.search_cite(ctx, citation).await?;
            }
        }
        assembler.search_end(ctx).await?;

        rewrite_last_question(input, &outcome.context, &ctx.buffers.citations);
        Ok(())
    }

    fn moderate_output(&self, ctx: &mut RelayContext) -> RelayResult<()> {
        let buffers = &ctx.buffers;
        let Some(hit) = [&buffers.text, &buffers.think, &buffers.suggest]
            .into_iter()
            .find_map(|channel| self.filter.check(channel))
        else {
            return Ok(());
        };
        warn!(
            conversation_id = %ctx.conversation_id,
            message_id = ctx.message_id,
            "[Pipeline] answer blocked by moderation"
        );
        ctx.buffers.sensitive = true;
        ctx.cancel.cancel();
        Err(RelayError::sensitive(format!(
            "answer contains a banned term: {}",
            hit.term
        )))
    }

    /// Non-streaming path: generate the whole answer, persist it and return
    /// the stored assistant message.
    pub async fn complete(&self, prepared: PreparedRelay) -> RelayResult<Message> {
        let PreparedRelay {
            mut ctx,
            backend,
            mut input,
            query,
            to_update,
            user_message,
            assistant,
        } = prepared;

        let result = self
            .generate_phase(&mut ctx, backend.as_ref(), &mut input, &query)
            .await;

        ctx.advance(Stage::Assemble);
        if let Err(err) = &result {
            warn!(
                conversation_id = %ctx.conversation_id,
                code = err.code(),
                "[Pipeline] generate failed: {}",
                err
            );
        }
        ctx.advance(Stage::Persist);
        let stored =
            persist_exchange(self.store.as_ref(), &ctx, to_update, user_message, assistant).await;
        ctx.advance(if result.is_ok() {
            Stage::Done
        } else {
            Stage::Failed
        });
        result.map(|()| stored)
    }

    async fn generate_phase(
        &self,
        ctx: &mut RelayContext,
        backend: &dyn ChatBackend,
        input: &mut [Message],
        query: &str,
    ) -> RelayResult<()> {
        if ctx.web_search {
            ctx.advance(Stage::WebSearch);
            let tool = self
                .search
                .clone()
                .ok_or_else(|| RelayError::precondition("web search is not available"))?;
            let mut progress = SilentProgress::default();
            let outcome = tool.search(query, &mut progress).await.unwrap_or_else(|err| {
                warn!("[Pipeline] web search failed, answering without it: {}", err);
                SearchOutcome::default()
            });
            let cited = if progress.cited.is_empty() {
                outcome.citations.clone()
            } else {
                progress.cited
            };
            for citation in cited {
                ctx.buffers.add_citation(citation);
            }
            rewrite_last_question(input, &outcome.context, &ctx.buffers.citations);
        }

        ctx.advance(Stage::Dispatch);
        let messages = input.iter().map(Message::to_llm).collect();
        let options = LlmRequestOptions {
            user_id: Some(ctx.user_id.clone()),
            ..Default::default()
        };
        let response = backend.generate(messages, options).await?;
        for delta in response.deltas.iter().filter(|d| !d.is_empty()) {
            ctx.buffers.push(delta);
        }
        if let Some(usage) = response.usage {
            ctx.buffers.record_usage(
                usage.input_tokens,
                usage.output_tokens,
                usage.thinking_tokens,
            );
        }
        self.moderate_output(ctx)
    }
}

/// Replace the newest non-empty user message with its search-augmented form.
fn rewrite_last_question(input: &mut [Message], context: &str, citations: &[Citation]) {
    if let Some(question) = input
        .iter_mut()
        .rev()
        .find(|m| m.role == MessageRole::User && !m.is_blank())
    {
        question.content = augment_query(&question.content, context, citations);
    }
}
