//! LLM provider trait definition

use async_trait::async_trait;
use std::sync::Arc;

use crate::providers::{GeminiConfig, GeminiProvider, OpenAIConfig, OpenAIProvider};
use crate::{CompletionRequest, CompletionResponse, LLMError, Result};

/// Trait for LLM providers
///
/// Implementations of this trait provide access to different LLM services
/// (e.g., Gemini, OpenAI and compatible servers).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Generate a completion from the LLM
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    /// Get the provider name (e.g., "gemini", "openai")
    fn name(&self) -> &str;

    /// Model used when the caller has no preference
    fn default_model(&self) -> &str;
}

/// Pick a provider from configuration keys
///
/// `GEMINI_API_KEY` wins when set; otherwise `OPENAI_API_KEY` (with optional
/// `OPENAI_API_BASE` / `OPENAI_MODEL`) selects the OpenAI-compatible client.
pub fn provider_from_lookup(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Arc<dyn LLMProvider>> {
    if let Ok(config) = GeminiConfig::from_lookup(&lookup) {
        return Ok(Arc::new(GeminiProvider::with_config(config)?));
    }
    if let Ok(config) = OpenAIConfig::from_lookup(&lookup) {
        return Ok(Arc::new(OpenAIProvider::with_config(config)?));
    }
    Err(LLMError::ConfigurationError(
        "set GEMINI_API_KEY or OPENAI_API_KEY to enable narrative generation".to_string(),
    ))
}
