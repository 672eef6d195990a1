//! Web Search Contract
//!
//! The pipeline consumes a search tool through [`SearchTool`]; progress is
//! reported back through [`SearchProgress`] so it can be streamed to the
//! client while the search runs. No HTTP search client ships with the
//! server.

use async_trait::async_trait;
use chat_relay_core::{Citation, RelayResult};

/// Observer for search progress.
#[async_trait]
pub trait SearchProgress: Send {
    /// `n` candidate results were found.
    async fn on_found(&mut self, n: usize);
    /// `n` results were kept for the answer.
    async fn on_chosen(&mut self, n: usize);
    async fn on_cite(&mut self, citation: Citation);
}

/// Citations plus the retrieved text to prepend to the question.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchOutcome {
    pub citations: Vec<Citation>,
    pub context: String,
}

#[async_trait]
pub trait SearchTool: Send + Sync {
    async fn search(
        &self,
        query: &str,
        progress: &mut dyn SearchProgress,
    ) -> RelayResult<SearchOutcome>;
}

/// Rewrite a question so the model answers from the retrieved context.
/// `citations` must carry the indices the client sees.
pub fn augment_query(query: &str, context: &str, citations: &[Citation]) -> String {
    if context.trim().is_empty() {
        return query.to_string();
    }
    let mut sources = String::new();
    for citation in citations {
        sources.push_str(&format!(
            "[{}] {} ({})\n",
            citation.index,
            citation.title.as_deref().unwrap_or(&citation.url),
            citation.url
        ));
    }
    format!(
        "Answer the question using the search results below. Cite sources as [n].\n\n\
         # Search results\n{}\n\n# Sources\n{}\n# Question\n{}",
        context.trim(),
        sources,
        query
    )
}

/// Progress sink that discards everything; used by the non-streaming path.
#[derive(Debug, Default)]
pub struct SilentProgress {
    pub cited: Vec<Citation>,
}

#[async_trait]
impl SearchProgress for SilentProgress {
    async fn on_found(&mut self, _n: usize) {}

    async fn on_chosen(&mut self, _n: usize) {}

    async fn on_cite(&mut self, citation: Citation) {
        self.cited.push(citation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn citation(index: u32, url: &str) -> Citation {
        Citation {
            index,
            title: Some(format!("Title {}", index)),
            url: url.to_string(),
            site_name: String::new(),
            snippet: None,
        }
    }

    #[test]
    fn test_augment_query_keeps_question_last() {
        let rewritten = augment_query(
            "When did Rust ship?",
            "Rust 1.0 shipped in 2015.",
            &[citation(1, "https://a.example")],
        );
        assert!(rewritten.contains("Rust 1.0 shipped in 2015."));
        assert!(rewritten.contains("[1] Title 1 (https://a.example)"));
        assert!(rewritten.ends_with("When did Rust ship?"));
    }

    #[test]
    fn test_empty_context_leaves_query_alone() {
        assert_eq!(augment_query("q", " ", &[citation(0, "https://a.example")]), "q");
    }

    #[tokio::test]
    async fn test_silent_progress_keeps_citations() {
        let mut progress = SilentProgress::default();
        progress.on_found(3).await;
        progress.on_cite(citation(0, "https://b.example")).await;
        assert_eq!(progress.cited.len(), 1);
    }
}
