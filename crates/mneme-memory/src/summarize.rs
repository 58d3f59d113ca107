//! Summaries for compaction.
//!
//! A [`Summarizer`] (usually an LLM call owned by the host application) turns
//! the texts being compacted into one replacement text. When none is given,
//! or it fails, a plain extractive summary is used instead.

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

/// Errors a summarizer may report.
#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error("Summarizer failed: {0}")]
    Failed(String),

    #[error("Summarizer returned an empty summary")]
    Empty,
}

/// Produces one summary text from many texts.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, texts: &[String]) -> Result<String, SummarizeError>;
}

/// Adapts a plain closure into a [`Summarizer`].
pub struct FnSummarizer<F> {
    f: F,
}

impl<F> FnSummarizer<F>
where
    F: Fn(&[String]) -> Result<String, SummarizeError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Summarizer for FnSummarizer<F>
where
    F: Fn(&[String]) -> Result<String, SummarizeError> + Send + Sync,
{
    async fn summarize(&self, texts: &[String]) -> Result<String, SummarizeError> {
        (self.f)(texts)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fallback Summaries
// ─────────────────────────────────────────────────────────────────────────────

/// Texts considered by [`first_sentences`].
const SENTENCE_SCAN_LIMIT: usize = 200;

/// Sentences kept by [`first_sentences`].
const SENTENCE_KEEP_LIMIT: usize = 100;

/// Texts considered by [`leading_excerpts`].
const EXCERPT_TEXT_LIMIT: usize = 50;

/// Characters kept from each text by [`leading_excerpts`].
const EXCERPT_CHARS: usize = 100;

/// Summary used when no summarizer is configured: the first sentence of each
/// non-blank text, joined with `" / "`.
pub fn first_sentences(texts: &[String], char_budget: usize) -> String {
    let pieces: Vec<&str> = texts
        .iter()
        .take(SENTENCE_SCAN_LIMIT)
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(|t| t.split('.').next().unwrap_or(t))
        .take(SENTENCE_KEEP_LIMIT)
        .collect();
    truncate_chars(&pieces.join(" / "), char_budget)
}

/// Summary used when the summarizer fails: the opening characters of each
/// text, joined with spaces.
pub fn leading_excerpts(texts: &[String], char_budget: usize) -> String {
    let pieces: Vec<String> = texts
        .iter()
        .take(EXCERPT_TEXT_LIMIT)
        .map(|t| t.chars().take(EXCERPT_CHARS).collect())
        .collect();
    truncate_chars(&pieces.join(" "), char_budget)
}

/// Summarize with `summarizer`, falling back to the extractive summaries.
pub async fn summarize_or_fallback(
    summarizer: Option<&dyn Summarizer>,
    texts: &[String],
    char_budget: usize,
) -> String {
    let Some(summarizer) = summarizer else {
        return first_sentences(texts, char_budget);
    };

    match summarizer.summarize(texts).await {
        Ok(summary) if !summary.trim().is_empty() => summary,
        Ok(_) => {
            warn!(error = %SummarizeError::Empty, "Summarizer failed, using excerpts");
            leading_excerpts(texts, char_budget)
        }
        Err(e) => {
            warn!(error = %e, "Summarizer failed, using excerpts");
            leading_excerpts(texts, char_budget)
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_first_sentences() {
        let input = texts(&["  First one. More text", "", "   ", "No period here", "Second. x"]);
        assert_eq!(
            first_sentences(&input, 2000),
            "First one / No period here / Second"
        );
    }

    #[test]
    fn test_first_sentences_limits() {
        let input: Vec<String> = (0..300).map(|i| format!("s{}. tail", i)).collect();
        let summary = first_sentences(&input, usize::MAX);
        assert_eq!(summary.split(" / ").count(), 100);
        assert!(summary.ends_with("s99"));

        assert_eq!(first_sentences(&input, 5).chars().count(), 5);
    }

    #[test]
    fn test_leading_excerpts() {
        let long = "x".repeat(150);
        let input = texts(&["short", &long]);
        let summary = leading_excerpts(&input, 2000);
        assert_eq!(summary, format!("short {}", "x".repeat(100)));
    }

    #[test]
    fn test_leading_excerpts_limits() {
        let input: Vec<String> = (0..80).map(|i| format!("t{}", i)).collect();
        let summary = leading_excerpts(&input, 2000);
        assert_eq!(summary.split(' ').count(), 50);
        assert_eq!(leading_excerpts(&input, 3), "t0 ");
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let input = texts(&["héllo wörld"]);
        assert_eq!(leading_excerpts(&input, 2), "hé");
    }

    #[tokio::test]
    async fn test_summarizer_used() {
        let summarizer = FnSummarizer::new(|texts: &[String]| Ok(format!("{} texts", texts.len())));
        let summary = summarize_or_fallback(Some(&summarizer), &texts(&["a", "b"]), 2000).await;
        assert_eq!(summary, "2 texts");
    }

    #[tokio::test]
    async fn test_no_summarizer_uses_first_sentences() {
        let summary = summarize_or_fallback(None, &texts(&["One. Two"]), 2000).await;
        assert_eq!(summary, "One");
    }

    #[tokio::test]
    async fn test_failing_summarizer_uses_excerpts() {
        let summarizer =
            FnSummarizer::new(|_: &[String]| Err(SummarizeError::Failed("boom".to_string())));
        let summary = summarize_or_fallback(Some(&summarizer), &texts(&["One. Two"]), 2000).await;
        assert_eq!(summary, "One. Two");
    }

    #[tokio::test]
    async fn test_empty_summary_counts_as_failure() {
        let summarizer = FnSummarizer::new(|_: &[String]| Ok("   ".to_string()));
        let summary = summarize_or_fallback(Some(&summarizer), &texts(&["abc"]), 2000).await;
        assert_eq!(summary, "abc");
    }
}
