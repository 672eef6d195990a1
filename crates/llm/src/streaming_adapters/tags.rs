//! Inline tag classification
//!
//! Some backends mark reasoning and follow-up suggestions with inline tags
//! (`<think>...</think>`, `<suggest>...</suggest>`) that the tokenizer may
//! split across several deltas, e.g. `"<"`, `"think"`, `">"`. [`TagSniffer`]
//! withholds a delta that starts with `<` for up to [`LOOKAHEAD_WINDOW`]
//! deltas until it either matches a known tag or can no longer become one.

use chat_relay_core::streaming::{CanonicalDelta, ContentType};

/// Maximum number of deltas withheld while waiting for a tag to complete.
pub const LOOKAHEAD_WINDOW: usize = 3;

const TAGS: [(&str, ContentType); 4] = [
    ("<think>", ContentType::Think),
    ("</think>", ContentType::Text),
    ("<suggest>", ContentType::Suggest),
    ("</suggest>", ContentType::Text),
];

/// Streaming tag classifier. One instance per stream.
#[derive(Debug)]
pub struct TagSniffer {
    status: ContentType,
    buffer: String,
    buffered: usize,
}

impl Default for TagSniffer {
    fn default() -> Self {
        Self::new()
    }
}

impl TagSniffer {
    pub fn new() -> Self {
        Self {
            status: ContentType::Text,
            buffer: String::new(),
            buffered: 0,
        }
    }

    /// Current classification of untagged content.
    pub fn status(&self) -> ContentType {
        self.status
    }

    /// Feed one upstream delta.
    pub fn push(&mut self, delta: &str) -> Vec<CanonicalDelta> {
        let mut out = Vec::new();
        self.feed(delta, &mut out);
        out
    }

    /// Release anything still withheld. Called once at end of stream.
    pub fn finish(&mut self) -> Vec<CanonicalDelta> {
        let mut out = Vec::new();
        self.flush(&mut out);
        out
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    fn feed(&mut self, delta: &str, out: &mut Vec<CanonicalDelta>) {
        if delta.is_empty() {
            return;
        }
        if self.buffered == 0 && !delta.trim_start().starts_with('<') {
            out.push(CanonicalDelta::inline(self.status, delta));
            return;
        }

        self.buffer.push_str(delta);
        self.buffered += 1;

        let lead = self.buffer.trim_start();
        if let Some((tag, next)) = TAGS.iter().find(|(tag, _)| lead.starts_with(tag)) {
            let rest = lead[tag.len()..].to_string();
            self.status = *next;
            self.buffer.clear();
            self.buffered = 0;
            // Content glued to the tag is classified under the new status.
            self.feed(&rest, out);
            return;
        }

        let candidate = lead.trim_end();
        let may_still_match = TAGS.iter().any(|(tag, _)| tag.starts_with(candidate));
        if may_still_match && self.buffered < LOOKAHEAD_WINDOW {
            return;
        }
        self.flush(out);
    }

    fn flush(&mut self, out: &mut Vec<CanonicalDelta>) {
        if !self.buffer.is_empty() {
            let held = std::mem::take(&mut self.buffer);
            out.push(CanonicalDelta::inline(self.status, held));
        }
        self.buffered = 0;
    }
}

/// Classify a complete response body containing inline tags anywhere.
///
/// Used for non-streaming responses, where the whole content is available
/// and tags need not start a delta.
pub fn split_inline_tags(content: &str) -> Vec<CanonicalDelta> {
    let mut out = Vec::new();
    let mut status = ContentType::Text;
    let mut rest = content;

    loop {
        let next = TAGS
            .iter()
            .filter_map(|(tag, kind)| rest.find(tag).map(|pos| (pos, *tag, *kind)))
            .min_by_key(|(pos, _, _)| *pos);

        match next {
            Some((pos, tag, kind)) => {
                if pos > 0 {
                    out.push(CanonicalDelta::inline(status, &rest[..pos]));
                }
                status = kind;
                rest = &rest[pos + tag.len()..];
            }
            None => {
                if !rest.is_empty() {
                    out.push(CanonicalDelta::inline(status, rest));
                }
                break;
            }
        }
    }
    out
}
