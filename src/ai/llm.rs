//! Production [`AiActionClient`] built on `edgequake-llm`.
//!
//! Text and vision actions go through an [`LLMProvider`]; speech goes
//! through [`SpeechClient`]. Every attempt is bounded by `ai_timeout_secs`.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors from LLM APIs are transient. Failed attempts are
//! retried with exponential backoff (`retry_backoff_ms * 2^attempt`, at most 60 s), so with
//! the defaults the waits are 500 ms → 1 s → 2 s. Only when every attempt has
//! failed does the client return `AiResponse { success: false, .. }`.

use super::encode::normalize_page_image;
use super::speech::SpeechClient;
use super::{AiAction, AiActionClient, AiActionKind, AiResponse};
use crate::config::PipelineConfig;
use crate::error::AiContractError;
use crate::prompts::GENERATION_SYSTEM_PROMPT;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Default model when a provider is named without one.
const DEFAULT_MODEL: &str = "gpt-4.1-mini";

/// Upper bound for a single backoff wait.
const MAX_BACKOFF_MS: u64 = 60_000;

/// AI client backed by an LLM provider and a speech endpoint.
pub struct LlmActionClient {
    provider: Arc<dyn LLMProvider>,
    speech: Option<SpeechClient>,
    temperature: f32,
    max_tokens: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
    timeout: Duration,
}

impl LlmActionClient {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &PipelineConfig) -> Self {
        Self {
            provider,
            speech: None,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            timeout: Duration::from_secs(config.ai_timeout_secs),
        }
    }

    pub fn with_speech(mut self, speech: SpeechClient) -> Self {
        self.speech = Some(speech);
        self
    }

    /// Resolve provider and speech client from config and environment.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, AiContractError> {
        let provider = resolve_provider(config)?;
        let client = Self::new(provider, config);
        Ok(match SpeechClient::from_config(config) {
            Ok(speech) => client.with_speech(speech),
            Err(e) => {
                warn!("text-to-speech disabled: {}", e);
                client
            }
        })
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor).min(MAX_BACKOFF_MS))
    }

    async fn chat_with_retry(&self, kind: AiActionKind, messages: Vec<ChatMessage>) -> AiResponse {
        let start = Instant::now();
        let options = self.options();
        let mut last_err = (String::from("unknown"), String::from("Unknown error"));

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.backoff(attempt);
                warn!("{}: retry {}/{} after {:?}", kind, attempt, self.max_retries, backoff);
                sleep(backoff).await;
            }

            match timeout(self.timeout, self.provider.chat(&messages, Some(&options))).await {
                Ok(Ok(response)) => {
                    debug!(
                        "{}: {} input tokens, {} output tokens, {:?}",
                        kind,
                        response.prompt_tokens,
                        response.completion_tokens,
                        start.elapsed()
                    );
                    return AiResponse::text(response.content, response.finish_reason);
                }
                Ok(Err(e)) => {
                    warn!("{}: attempt {} failed: {}", kind, attempt + 1, e);
                    last_err = ("llm_error".into(), e.to_string());
                }
                Err(_) => {
                    warn!("{}: attempt {} timed out after {:?}", kind, attempt + 1, self.timeout);
                    last_err = (
                        "timeout".into(),
                        format!("no answer within {}s", self.timeout.as_secs()),
                    );
                }
            }
        }

        AiResponse::failure(last_err.0, last_err.1)
    }

    async fn speech_with_retry(&self, text: &str) -> AiResponse {
        let Some(ref speech) = self.speech else {
            return AiResponse::failure("not_configured", "no text-to-speech endpoint configured");
        };

        let mut last = AiResponse::failure("unknown", "Unknown error");
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                sleep(self.backoff(attempt)).await;
            }
            match speech.synthesize(text).await {
                Ok(bytes) => return AiResponse::audio(bytes),
                Err(e) => {
                    warn!("text_to_speech: attempt {} failed: [{}] {}", attempt + 1, e.code, e.message);
                    // Client errors will not improve on retry.
                    let permanent = e.code.starts_with('4') && e.code != "429";
                    last = AiResponse::failure(e.code, e.message);
                    if permanent {
                        break;
                    }
                }
            }
        }
        last
    }
}

#[async_trait]
impl AiActionClient for LlmActionClient {
    async fn invoke(&self, action: AiAction) -> Result<AiResponse, AiContractError> {
        action.validate()?;
        let kind = action.kind();

        let response = match action {
            AiAction::ExtractPageText { image_base64, prompt } => {
                let image = normalize_page_image(&image_base64)?;
                let data = ImageData::new(image.base64, image.mime_type).with_detail("high");
                let messages = vec![
                    ChatMessage::system(&prompt),
                    ChatMessage::user_with_images("", vec![data]),
                ];
                self.chat_with_retry(kind, messages).await
            }
            AiAction::GenerateText { prompt } => {
                let messages = vec![
                    ChatMessage::system(GENERATION_SYSTEM_PROMPT),
                    ChatMessage::user(&prompt),
                ];
                self.chat_with_retry(kind, messages).await
            }
            AiAction::TextToSpeech { text } => self.speech_with_retry(&text).await,
        };
        Ok(response)
    }
}

/// Instantiate a named provider with the given model.
fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, AiContractError> {
    ProviderFactory::create_llm_provider(provider_name, model)
        .map_err(|e| AiContractError::ProviderNotConfigured(format!("{provider_name}: {e}")))
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider** (`config.provider_name`) with `config.model`.
/// 3. **Environment pair** `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`.
/// 4. **OpenAI** when `OPENAI_API_KEY` is set.
/// 5. **Full auto-detection** via `ProviderFactory::from_env`.
pub fn resolve_provider(config: &PipelineConfig) -> Result<Arc<dyn LLMProvider>, AiContractError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);

    if let Some(ref name) = config.provider_name {
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return create_provider(&prov, &env_model);
        }
    }

    if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
        return create_provider("openai", model);
    }

    let (llm_provider, _embedding) = ProviderFactory::from_env().map_err(|e| {
        AiContractError::ProviderNotConfigured(format!(
            "No LLM provider could be auto-detected from environment.\n\
             Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
             Error: {e}"
        ))
    })?;

    Ok(llm_provider)
}
