//! Relay Context
//!
//! Request-scoped state owned by the pipeline for the lifetime of one
//! completion request.

use chat_relay_core::{CanonicalDelta, Citation};
use chat_relay_llm::{ResolvedBackend, UsageStats};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::models::chat::EditDescriptor;
use crate::models::message::{BotState, CodeSegment};

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    LoadHistory,
    ResolveOptions,
    WebSearch,
    Dispatch,
    Stream,
    Assemble,
    Persist,
    Done,
    Failed,
}

/// The model serving this request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model_id: String,
    pub bot_id: String,
    pub bot_name: String,
}

impl ModelSelection {
    pub fn from_resolved(resolved: &ResolvedBackend) -> Self {
        Self {
            model_id: resolved.descriptor.model_id.clone(),
            bot_id: resolved.descriptor.bot_id.clone(),
            bot_name: resolved.descriptor.bot_name.clone(),
        }
    }

    pub fn bot_state(&self) -> BotState {
        BotState {
            model: self.model_id.clone(),
            bot_id: self.bot_id.clone(),
            bot_name: self.bot_name.clone(),
        }
    }
}

/// Content accumulated for persistence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Accumulator {
    pub text: String,
    pub think: String,
    pub suggest: String,
    pub code_segments: Vec<CodeSegment>,
    pub citations: Vec<Citation>,
    pub usage: Option<UsageStats>,
    pub sensitive: bool,
    /// Deltas accepted so far
    pub deltas: usize,
}

impl Accumulator {
    pub fn push(&mut self, delta: &CanonicalDelta) {
        match delta {
            CanonicalDelta::Text { text } => self.text.push_str(text),
            CanonicalDelta::Think { text } => self.think.push_str(text),
            CanonicalDelta::Suggest { text } => self.suggest.push_str(text),
            CanonicalDelta::CodeFence { language, index } => {
                self.code_segments.push(CodeSegment {
                    index: *index,
                    language: language.clone(),
                    code: String::new(),
                });
            }
            CanonicalDelta::CodeBody { text, index } => match self.code_segments.last_mut() {
                Some(segment) if segment.index == *index => segment.code.push_str(text),
                _ => self.code_segments.push(CodeSegment {
                    index: *index,
                    language: String::new(),
                    code: text.clone(),
                }),
            },
        }
        self.deltas += 1;
    }

    /// Append a citation, numbering it by arrival order.
    pub fn add_citation(&mut self, mut citation: Citation) -> Citation {
        citation.index = self.citations.len() as u32;
        self.citations.push(citation.clone());
        citation
    }

    pub fn record_usage(&mut self, input: u32, output: u32, thinking: Option<u32>) {
        self.usage
            .get_or_insert_with(UsageStats::default)
            .merge(input, output, thinking);
    }
}

/// State of one in-flight completion request.
#[derive(Debug)]
pub struct RelayContext {
    pub conversation_id: String,
    pub section_id: String,
    pub user_id: String,
    pub edit: EditDescriptor,
    pub model: ModelSelection,
    pub web_search: bool,
    /// Id of the assistant message being produced
    pub message_id: i64,
    /// Id of the user message created for this turn, if any
    pub user_message_id: Option<i64>,
    pub reply_id: i64,
    pub message_index: i64,
    pub buffers: Accumulator,
    /// Cancels the backend invocation
    pub cancel: CancellationToken,
    stage: Stage,
    event_seq: u64,
}

impl RelayContext {
    pub fn new(
        conversation_id: impl Into<String>,
        section_id: impl Into<String>,
        user_id: impl Into<String>,
        edit: EditDescriptor,
        model: ModelSelection,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            section_id: section_id.into(),
            user_id: user_id.into(),
            edit,
            model,
            web_search: false,
            message_id: 0,
            user_message_id: None,
            reply_id: 0,
            message_index: 0,
            buffers: Accumulator::default(),
            cancel: CancellationToken::new(),
            stage: Stage::LoadHistory,
            event_seq: 0,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Move to a later stage. Stages only move forward.
    pub fn advance(&mut self, next: Stage) {
        debug_assert!(next > self.stage, "{:?} -> {:?}", self.stage, next);
        debug!(
            conversation_id = %self.conversation_id,
            message_id = self.message_id,
            "[Pipeline] {:?} -> {:?}",
            self.stage,
            next
        );
        self.stage = next;
    }

    /// Post-incremented event sequence number.
    pub fn next_event_id(&mut self) -> u64 {
        let id = self.event_seq;
        self.event_seq += 1;
        id
    }

    pub fn events_issued(&self) -> u64 {
        self.event_seq
    }
}
