//! paperdrop-llm: Language-model backend abstraction used by the summarizer.

pub mod backend;

pub use backend::{LlmBackend, LlmError, LlmRequest, LlmResponse, Message};
