//! LLM-written report narrative

pub mod prompt;
pub mod summary;

pub use prompt::PromptRenderer;
pub use summary::DataSummary;

use async_trait::async_trait;
use chrono::Utc;
use report_llm::{CompletionRequest, LLMError, LLMProvider, Message, StopReason};
use report_pipeline::{ChartFile, CollaboratorError, Narrative, Narrator, StageInputs};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::charts::Indicators;

pub const DEFAULT_MAX_TOKENS: usize = 8192;
pub const DEFAULT_TEMPERATURE: f32 = 0.3;

/// Narrator backed by an [`LLMProvider`]
///
/// The response must contain every required section; anything else is
/// reported as malformed and the pipeline skips the narrative.
pub struct LlmNarrator {
    provider: Arc<dyn LLMProvider>,
    model: String,
    max_tokens: usize,
    temperature: f32,
    prompts: PromptRenderer,
}

impl LlmNarrator {
    /// Use the provider's default model
    pub fn new(provider: Arc<dyn LLMProvider>) -> Result<Self, CollaboratorError> {
        let model = provider.default_model().to_string();
        Ok(Self {
            provider,
            model,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            prompts: PromptRenderer::new()?,
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Map provider failures onto the collaborator taxonomy
pub fn classify_llm_error(err: LLMError) -> CollaboratorError {
    if err.is_timeout() {
        return CollaboratorError::Timeout(err.to_string());
    }
    match err {
        LLMError::RateLimitExceeded(msg) => CollaboratorError::RateLimited(msg),
        e if e.is_transient() => CollaboratorError::Upstream(e.to_string()),
        e @ (LLMError::UnexpectedResponse(_)
        | LLMError::Blocked(_)
        | LLMError::SerializationError(_)) => CollaboratorError::Malformed(e.to_string()),
        e => CollaboratorError::InvalidInput(e.to_string()),
    }
}

#[async_trait]
impl Narrator for LlmNarrator {
    #[instrument(skip(self, inputs, charts), fields(ticker = %inputs.request.ticker, model = %self.model))]
    async fn narrate(
        &self,
        inputs: &StageInputs,
        charts: &[ChartFile],
    ) -> Result<Narrative, CollaboratorError> {
        let indicators = Indicators::compute(&inputs.report_series)?;
        let summary = DataSummary::new(&inputs.report_series, &indicators);
        let prompt = self.prompts.render(inputs, &summary, charts, Utc::now())?;

        let request = CompletionRequest::builder(&self.model)
            .system(prompt::SYSTEM_PROMPT)
            .add_message(Message::user(prompt))
            .max_tokens(self.max_tokens)
            .temperature(self.temperature)
            .build();

        let response = self
            .provider
            .complete(request)
            .await
            .map_err(classify_llm_error)?;
        if response.stop_reason == StopReason::MaxTokens {
            warn!(max_tokens = self.max_tokens, "Narrative hit the token limit");
        }

        let author = format!("{}/{}", self.provider.name(), self.model);
        let narrative = Narrative::from_markdown(response.text(), author)?;
        info!(
            sections = narrative.sections.len(),
            output_tokens = response.usage.output_tokens,
            "Narrative received"
        );
        Ok(narrative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_inputs;
    use report_llm::{CompletionResponse, TokenUsage};
    use report_pipeline::REQUIRED_SECTIONS;
    use std::sync::Mutex;

    /// Replays canned responses and records requests
    struct ScriptedProvider {
        responses: Mutex<Vec<report_llm::Result<CompletionResponse>>>,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<report_llm::Result<CompletionResponse>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LLMProvider for ScriptedProvider {
        async fn complete(&self, request: CompletionRequest) -> report_llm::Result<CompletionResponse> {
            self.requests.lock().unwrap().push(request);
            self.responses.lock().unwrap().remove(0)
        }

        fn name(&self) -> &str {
            "scripted"
        }

        fn default_model(&self) -> &str {
            "scripted-1"
        }
    }

    fn reply(text: String) -> report_llm::Result<CompletionResponse> {
        Ok(CompletionResponse {
            message: Message::assistant(text),
            stop_reason: StopReason::EndTurn,
            usage: TokenUsage::default(),
        })
    }

    fn full_report() -> String {
        REQUIRED_SECTIONS
            .iter()
            .map(|s| format!("## {s}\nAnalysis for {s}.\n"))
            .collect()
    }

    #[tokio::test]
    async fn test_narrate_parses_sections() {
        let provider = ScriptedProvider::new(vec![reply(full_report())]);
        let narrator = LlmNarrator::new(provider.clone()).unwrap().with_max_tokens(1000);

        let narrative = narrator.narrate(&sample_inputs(120), &[]).await.unwrap();
        assert_eq!(narrative.sections.len(), REQUIRED_SECTIONS.len());
        assert_eq!(narrative.author, "scripted/scripted-1");

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].model, "scripted-1");
        assert_eq!(requests[0].max_tokens, 1000);
        assert!(requests[0].system.is_some());
        assert!(requests[0].messages[0].content.contains("TST"));
    }

    #[tokio::test]
    async fn test_incomplete_response_is_malformed() {
        let text = full_report().replace("## Risk Assessment", "## Risks");
        let provider = ScriptedProvider::new(vec![reply(text)]);
        let narrator = LlmNarrator::new(provider).unwrap();

        let err = narrator.narrate(&sample_inputs(120), &[]).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Malformed(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_provider_errors_are_classified() {
        let provider = ScriptedProvider::new(vec![Err(LLMError::RateLimitExceeded("slow down".into()))]);
        let narrator = LlmNarrator::new(provider).unwrap().with_model("other");
        let err = narrator.narrate(&sample_inputs(120), &[]).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::RateLimited(_)));
        assert_eq!(narrator.model(), "other");
    }

    #[test]
    fn test_classify_llm_error() {
        assert!(matches!(
            classify_llm_error(LLMError::ServerError {
                status: 503,
                body: "busy".into()
            }),
            CollaboratorError::Upstream(_)
        ));
        assert!(matches!(
            classify_llm_error(LLMError::AuthenticationFailed),
            CollaboratorError::InvalidInput(_)
        ));
        assert!(matches!(
            classify_llm_error(LLMError::Blocked("safety".into())),
            CollaboratorError::Malformed(_)
        ));
    }
}
