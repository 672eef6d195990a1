//! Event Assembler
//!
//! Turns lifecycle markers and canonical deltas into ordered, identified
//! [`SseFrame`]s and hands them to the transport pipe. Deltas are added to
//! the context's buffers only once their `chat` frame has been accepted.

use async_trait::async_trait;
use chat_relay_core::{CanonicalDelta, Citation, PipeSender, RelayError, RelayResult};
use serde::Serialize;

use super::context::RelayContext;
use crate::models::event::{
    ChatContent, ChatPayload, ErrorPayload, EventKind, MetaPayload, ModelPayload, SseFrame,
    EMPTY_PAYLOAD,
};
use crate::services::search::SearchProgress;

pub const STATUS_STREAMING: &str = "streaming";

/// Writes one request's events to its transport pipe.
pub struct EventAssembler {
    tx: PipeSender<SseFrame>,
}

impl EventAssembler {
    pub fn new(tx: PipeSender<SseFrame>) -> Self {
        Self { tx }
    }

    /// Resolves once the client side of the stream is gone.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    async fn emit(&self, ctx: &mut RelayContext, kind: EventKind, data: String) -> RelayResult<()> {
        let frame = SseFrame {
            id: ctx.next_event_id(),
            kind,
            data,
        };
        self.tx
            .send(frame)
            .await
            .map_err(|_| RelayError::Interrupted)
    }

    async fn emit_json<T: Serialize>(
        &self,
        ctx: &mut RelayContext,
        kind: EventKind,
        payload: &T,
    ) -> RelayResult<()> {
        let data = serde_json::to_string(payload)?;
        self.emit(ctx, kind, data).await
    }

    pub async fn meta(&self, ctx: &mut RelayContext) -> RelayResult<()> {
        let payload = MetaPayload {
            conversation_id: ctx.conversation_id.clone(),
            section_id: ctx.section_id.clone(),
            user_message_id: ctx.user_message_id,
            message_id: ctx.message_id,
            reply_id: ctx.reply_id,
            message_index: ctx.message_index,
        };
        self.emit_json(ctx, EventKind::Meta, &payload).await
    }

    pub async fn model(&self, ctx: &mut RelayContext) -> RelayResult<()> {
        let payload = ModelPayload {
            model: ctx.model.model_id.clone(),
            bot_id: ctx.model.bot_id.clone(),
            bot_name: ctx.model.bot_name.clone(),
        };
        self.emit_json(ctx, EventKind::Model, &payload).await
    }

    /// Send one delta, then accumulate it.
    pub async fn chat(&self, ctx: &mut RelayContext, delta: CanonicalDelta) -> RelayResult<()> {
        let payload = ChatPayload {
            message: ChatContent {
                content: delta.payload().to_string(),
                content_type: delta.content_type().to_string(),
            },
            conversation_id: ctx.conversation_id.clone(),
            section_id: ctx.section_id.clone(),
            reply_id: ctx.reply_id,
            is_delta: true,
            status: STATUS_STREAMING.to_string(),
            message_index: ctx.message_index,
            bot_id: ctx.model.bot_id.clone(),
        };
        self.emit_json(ctx, EventKind::Chat, &payload).await?;
        ctx.buffers.push(&delta);
        Ok(())
    }

    pub async fn search_start(&self, ctx: &mut RelayContext) -> RelayResult<()> {
        self.emit(ctx, EventKind::SearchStart, EMPTY_PAYLOAD.to_string())
            .await
    }

    pub async fn search_found(&self, ctx: &mut RelayContext, n: usize) -> RelayResult<()> {
        self.emit(ctx, EventKind::SearchFind, n.to_string()).await
    }

    pub async fn search_chosen(&self, ctx: &mut RelayContext, n: usize) -> RelayResult<()> {
        self.emit(ctx, EventKind::SearchChoose, n.to_string()).await
    }

    /// Number the citation, record it, then send it.
    pub async fn search_cite(&self, ctx: &mut RelayContext, citation: Citation) -> RelayResult<()> {
        let citation = ctx.buffers.add_citation(citation);
        self.emit_json(ctx, EventKind::SearchCite, &citation).await
    }

    pub async fn search_end(&self, ctx: &mut RelayContext) -> RelayResult<()> {
        self.emit(ctx, EventKind::SearchEnd, EMPTY_PAYLOAD.to_string())
            .await
    }

    /// Send the terminal event for `result` and close the pipe. An
    /// interruption has no terminal event; nobody is listening.
    pub async fn finish(self, ctx: &mut RelayContext, result: &RelayResult<()>) {
        let sent = match result {
            Ok(()) => {
                self.emit(ctx, EventKind::End, EMPTY_PAYLOAD.to_string())
                    .await
            }
            Err(RelayError::Interrupted) => Ok(()),
            Err(err) => {
                let payload = ErrorPayload {
                    code: err.code().to_string(),
                    message: err.to_string(),
                };
                self.emit_json(ctx, EventKind::Error, &payload).await
            }
        };
        if sent.is_err() {
            tracing::debug!(
                conversation_id = %ctx.conversation_id,
                "[Pipeline] client left before the terminal event"
            );
        }
        self.tx.close();
    }
}

/// Streams search progress as events while the search runs.
pub struct SearchEvents<'a> {
    assembler: &'a EventAssembler,
    ctx: &'a mut RelayContext,
    failure: Option<RelayError>,
}

impl<'a> SearchEvents<'a> {
    pub fn new(assembler: &'a EventAssembler, ctx: &'a mut RelayContext) -> Self {
        Self {
            assembler,
            ctx,
            failure: None,
        }
    }

    /// The first send failure, if the client left mid-search.
    pub fn into_failure(self) -> Option<RelayError> {
        self.failure
    }

    fn record(&mut self, result: RelayResult<()>) {
        if let Err(err) = result {
            self.failure.get_or_insert(err);
        }
    }
}

#[async_trait]
impl SearchProgress for SearchEvents<'_> {
    async fn on_found(&mut self, n: usize) {
        if self.failure.is_none() {
            let result = self.assembler.search_found(self.ctx, n).await;
            self.record(result);
        }
    }

    async fn on_chosen(&mut self, n: usize) {
        if self.failure.is_none() {
            let result = self.assembler.search_chosen(self.ctx, n).await;
            self.record(result);
        }
    }

    async fn on_cite(&mut self, citation: Citation) {
        if self.failure.is_none() {
            let result = self.assembler.search_cite(self.ctx, citation).await;
            self.record(result);
        }
    }
}
