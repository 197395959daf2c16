//! Summarization of extracted paper text.
//!
//! Disabled by default: `NoopSummarizer` returns an empty summary and records
//! are persisted with an empty body. `LlmSummarizer` sends the text to a
//! language-model backend when enabled in config.

use std::sync::Arc;

use async_trait::async_trait;
use paperdrop_common::Result;
use paperdrop_llm::{LlmBackend, LlmRequest, Message};
use tracing::{info, instrument};

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, system_prompt: &str, document_text: &str) -> Result<String>;
}

/// Always returns an empty summary.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSummarizer;

#[async_trait]
impl Summarizer for NoopSummarizer {
    async fn summarize(&self, _system_prompt: &str, _document_text: &str) -> Result<String> {
        Ok(String::new())
    }
}

pub struct LlmSummarizer {
    backend: Arc<dyn LlmBackend>,
    /// Document text beyond this many characters is dropped before sending.
    max_input_chars: usize,
}

impl LlmSummarizer {
    pub fn new(backend: Arc<dyn LlmBackend>, max_input_chars: usize) -> Self {
        Self { backend, max_input_chars }
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    #[instrument(skip_all)]
    async fn summarize(&self, system_prompt: &str, document_text: &str) -> Result<String> {
        let text = truncate_chars(document_text, self.max_input_chars);
        let req = LlmRequest {
            messages: vec![Message::system(system_prompt), Message::user(text)],
            model: None,
            max_tokens: Some(self.backend.max_output_tokens() as u32),
            temperature: None,
        };

        let resp = self.backend.complete(req).await?;
        info!(
            model = %resp.model,
            input_chars = text.len(),
            prompt_tokens = resp.prompt_tokens,
            completion_tokens = resp.completion_tokens,
            total_tokens = resp.total_tokens(),
            "Summary generated"
        );
        Ok(resp.content.trim().to_string())
    }
}

/// Longest prefix of `text` with at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paperdrop_common::PaperdropError;
    use paperdrop_llm::{LlmError, LlmResponse};
    use std::sync::Mutex;

    struct RecordingBackend {
        seen: Mutex<Vec<LlmRequest>>,
        fail: bool,
    }

    #[async_trait]
    impl LlmBackend for RecordingBackend {
        async fn complete(&self, req: LlmRequest) -> std::result::Result<LlmResponse, LlmError> {
            self.seen.lock().unwrap().push(req);
            if self.fail {
                return Err(LlmError::ApiError { status: 503, message: "overloaded".into() });
            }
            Ok(LlmResponse {
                content: "  A concise summary.\n".to_string(),
                model: "test-model".to_string(),
                prompt_tokens: 10,
                completion_tokens: 4,
            })
        }
        fn model_id(&self) -> &str { "test-model" }
        fn max_output_tokens(&self) -> usize { 512 }
    }

    #[tokio::test]
    async fn test_noop_returns_empty() {
        let s = NoopSummarizer;
        assert_eq!(s.summarize("prompt", "long text").await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_llm_summarizer_sends_system_and_user_messages() {
        let backend = Arc::new(RecordingBackend { seen: Mutex::new(vec![]), fail: false });
        let s = LlmSummarizer::new(backend.clone(), 5);

        let summary = s.summarize("Summarize in Japanese.", "abcdefghij").await.unwrap();
        assert_eq!(summary, "A concise summary.");

        let seen = backend.seen.lock().unwrap();
        let req = &seen[0];
        assert_eq!(req.messages[0].role, "system");
        assert_eq!(req.messages[0].content, "Summarize in Japanese.");
        assert_eq!(req.messages[1].role, "user");
        assert_eq!(req.messages[1].content, "abcde");
        assert_eq!(req.max_tokens, Some(512));
    }

    #[tokio::test]
    async fn test_backend_failure_is_summarization_error() {
        let backend = Arc::new(RecordingBackend { seen: Mutex::new(vec![]), fail: true });
        let s = LlmSummarizer::new(backend, 1000);
        let err = s.summarize("p", "t").await.unwrap_err();
        assert!(matches!(err, PaperdropError::Summarization(_)));
    }

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("量子力学と生成モデル", 4), "量子力学");
        assert_eq!(truncate_chars("short", 100), "short");
        assert_eq!(truncate_chars("", 3), "");
    }
}
