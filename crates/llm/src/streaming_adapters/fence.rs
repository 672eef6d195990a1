//! Code fence classification
//!
//! Splits a text channel into prose and fenced code blocks. On an opening
//! fence a `[code:N]` placeholder is emitted into the prose, followed by a
//! `CodeFence` delta carrying the language tag once the fence line is
//! complete, then `CodeBody` deltas until the closing fence. `N` is the
//! segment index and only advances when a block closes.

use chat_relay_core::streaming::CanonicalDelta;

const FENCE: &str = "```";

/// Placeholder written into prose where code block `index` sits.
pub fn code_placeholder(index: u32) -> String {
    format!("[code:{}]", index)
}

#[derive(Debug, Default)]
pub struct FenceSniffer {
    in_code: bool,
    awaiting_language: bool,
    index: u32,
    pending: String,
}

impl FenceSniffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment of the text channel.
    pub fn push(&mut self, fragment: &str) -> Vec<CanonicalDelta> {
        self.pending.push_str(fragment);
        let mut out = Vec::new();

        loop {
            if self.awaiting_language {
                let Some(newline) = self.pending.find('\n') else {
                    break;
                };
                let language = self.pending[..newline].trim().to_string();
                self.pending.drain(..=newline);
                self.awaiting_language = false;
                out.push(CanonicalDelta::CodeFence {
                    language,
                    index: self.index,
                });
                continue;
            }

            match self.pending.find(FENCE) {
                Some(pos) => {
                    let before: String = self.pending.drain(..pos).collect();
                    self.pending.drain(..FENCE.len());
                    self.emit(before, &mut out);
                    if self.in_code {
                        self.in_code = false;
                        self.index += 1;
                    } else {
                        self.in_code = true;
                        self.awaiting_language = true;
                        out.push(CanonicalDelta::text(code_placeholder(self.index)));
                    }
                }
                None => {
                    // Trailing backticks may be the start of a fence split
                    // across fragments.
                    let trailing = self.pending.len() - self.pending.trim_end_matches('`').len();
                    let held = trailing.min(FENCE.len() - 1);
                    let ready: String = self.pending.drain(..self.pending.len() - held).collect();
                    self.emit(ready, &mut out);
                    break;
                }
            }
        }
        out
    }

    /// Release anything still held at end of stream.
    pub fn finish(&mut self) -> Vec<CanonicalDelta> {
        let mut out = Vec::new();
        let rest = std::mem::take(&mut self.pending);
        if self.awaiting_language {
            self.awaiting_language = false;
            out.push(CanonicalDelta::CodeFence {
                language: rest.trim().to_string(),
                index: self.index,
            });
        } else {
            self.emit(rest, &mut out);
        }
        out
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn emit(&self, text: String, out: &mut Vec<CanonicalDelta>) {
        if text.is_empty() {
            return;
        }
        if self.in_code {
            out.push(CanonicalDelta::CodeBody {
                text,
                index: self.index,
            });
        } else {
            out.push(CanonicalDelta::Text { text });
        }
    }
}
