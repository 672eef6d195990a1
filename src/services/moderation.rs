//! Sensitive Content Filter
//!
//! Banned-term matching for questions and answers. Input hits block the
//! request; output hits stop the stream and suppress the answer.

use chat_relay_core::{RelayError, RelayResult};
use regex::Regex;

/// A banned term found in checked text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensitiveHit {
    pub term: String,
}

pub trait SensitiveFilter: Send + Sync {
    fn check(&self, text: &str) -> Option<SensitiveHit>;
}

/// Case-insensitive keyword filter compiled into a single alternation.
#[derive(Debug, Clone)]
pub struct KeywordFilter {
    pattern: Option<Regex>,
    terms: usize,
}

impl KeywordFilter {
    pub fn new<S: AsRef<str>>(terms: &[S]) -> RelayResult<Self> {
        let escaped: Vec<String> = terms
            .iter()
            .map(|t| t.as_ref().trim())
            .filter(|t| !t.is_empty())
            .map(regex::escape)
            .collect();
        if escaped.is_empty() {
            return Ok(Self::empty());
        }
        let pattern = Regex::new(&format!("(?i)(?:{})", escaped.join("|")))
            .map_err(|e| RelayError::config(format!("invalid banned term list: {}", e)))?;
        Ok(Self {
            pattern: Some(pattern),
            terms: escaped.len(),
        })
    }

    /// A filter that never matches.
    pub fn empty() -> Self {
        Self {
            pattern: None,
            terms: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.terms
    }

    pub fn is_empty(&self) -> bool {
        self.terms == 0
    }
}

impl SensitiveFilter for KeywordFilter {
    fn check(&self, text: &str) -> Option<SensitiveHit> {
        let found = self.pattern.as_ref()?.find(text)?;
        Some(SensitiveHit {
            term: found.as_str().to_string(),
        })
    }
}
