//! AI Action Client: the narrow contract between stages and AI backends.
//!
//! Stages describe *what* they need as an [`AiAction`]; an
//! [`AiActionClient`] implementation decides *how* to get it. The contract
//! is deliberately lopsided:
//!
//! - A remote failure (HTTP error, provider error, timeout) is **data**:
//!   `Ok(AiResponse { success: false, .. })`. The calling stage decides
//!   whether that is fatal.
//! - Only a malformed request (empty prompt, undecodable image) is an
//!   `Err(AiContractError)`, because it is a programming error that retrying
//!   cannot fix.
//!
//! [`LlmActionClient`] is the production implementation.

pub mod encode;
pub mod llm;
pub mod speech;

pub use llm::LlmActionClient;
pub use speech::SpeechClient;

use crate::error::{AiContractError, PipelineError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The AI capabilities the pipeline uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiActionKind {
    ExtractPageText,
    GenerateText,
    TextToSpeech,
}

impl fmt::Display for AiActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AiActionKind::ExtractPageText => "extract_page_text",
            AiActionKind::GenerateText => "generate_text",
            AiActionKind::TextToSpeech => "text_to_speech",
        })
    }
}

/// One request to an AI backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AiAction {
    /// Transcribe one page image (base64 or data URL).
    ExtractPageText { image_base64: String, prompt: String },
    /// Free-form text generation.
    GenerateText { prompt: String },
    /// Synthesize speech for `text`.
    TextToSpeech { text: String },
}

impl AiAction {
    pub fn kind(&self) -> AiActionKind {
        match self {
            AiAction::ExtractPageText { .. } => AiActionKind::ExtractPageText,
            AiAction::GenerateText { .. } => AiActionKind::GenerateText,
            AiAction::TextToSpeech { .. } => AiActionKind::TextToSpeech,
        }
    }

    /// Reject payloads no backend could accept.
    pub fn validate(&self) -> Result<(), AiContractError> {
        let empty = |field| AiContractError::EmptyPayload {
            kind: self.kind().to_string(),
            field,
        };
        match self {
            AiAction::ExtractPageText { image_base64, .. } => {
                if image_base64.trim().is_empty() {
                    return Err(empty("image"));
                }
                encode::normalize_page_image(image_base64).map(|_| ())
            }
            AiAction::GenerateText { prompt } if prompt.trim().is_empty() => Err(empty("prompt")),
            AiAction::TextToSpeech { text } if text.trim().is_empty() => Err(empty("text")),
            _ => Ok(()),
        }
    }
}

/// Payload of a successful response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AiContent {
    Text(String),
    Audio(Vec<u8>),
    Empty,
}

/// Normalised answer of an AI backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AiResponse {
    pub success: bool,
    pub content: AiContent,
    pub finish_reason: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub time_created: DateTime<Utc>,
}

impl AiResponse {
    pub fn text(content: impl Into<String>, finish_reason: Option<String>) -> Self {
        Self {
            success: true,
            content: AiContent::Text(content.into()),
            finish_reason,
            error_code: None,
            error_message: None,
            time_created: Utc::now(),
        }
    }

    pub fn audio(bytes: Vec<u8>) -> Self {
        Self {
            success: true,
            content: AiContent::Audio(bytes),
            finish_reason: None,
            error_code: None,
            error_message: None,
            time_created: Utc::now(),
        }
    }

    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            content: AiContent::Empty,
            finish_reason: None,
            error_code: Some(code.into()),
            error_message: Some(message.into()),
            time_created: Utc::now(),
        }
    }

    fn into_failure(self, kind: AiActionKind) -> PipelineError {
        PipelineError::AiActionFailure {
            kind: kind.to_string(),
            error_code: self.error_code.unwrap_or_else(|| "unknown".into()),
            message: self
                .error_message
                .unwrap_or_else(|| "no error message".into()),
        }
    }

    /// Generated text, or the failure as a stage error.
    pub fn into_text(self, kind: AiActionKind) -> Result<String, PipelineError> {
        if !self.success {
            return Err(self.into_failure(kind));
        }
        match self.content {
            AiContent::Text(t) => Ok(t),
            other => Err(PipelineError::AiActionFailure {
                kind: kind.to_string(),
                error_code: "unexpected_content".into(),
                message: format!("expected text, got {}", content_label(&other)),
            }),
        }
    }

    /// Generated audio, or the failure as a stage error.
    pub fn into_audio(self, kind: AiActionKind) -> Result<Vec<u8>, PipelineError> {
        if !self.success {
            return Err(self.into_failure(kind));
        }
        match self.content {
            AiContent::Audio(bytes) if !bytes.is_empty() => Ok(bytes),
            other => Err(PipelineError::AiActionFailure {
                kind: kind.to_string(),
                error_code: "unexpected_content".into(),
                message: format!("expected audio, got {}", content_label(&other)),
            }),
        }
    }

    /// One-line description of a failed response, for page tallies.
    pub fn describe_error(&self) -> String {
        format!(
            "[{}] {}",
            self.error_code.as_deref().unwrap_or("unknown"),
            self.error_message.as_deref().unwrap_or("no error message")
        )
    }
}

fn content_label(content: &AiContent) -> &'static str {
    match content {
        AiContent::Text(_) => "text",
        AiContent::Audio(bytes) if bytes.is_empty() => "empty audio",
        AiContent::Audio(_) => "audio",
        AiContent::Empty => "nothing",
    }
}

/// Invokes named AI capabilities.
#[async_trait]
pub trait AiActionClient: Send + Sync {
    async fn invoke(&self, action: AiAction) -> Result<AiResponse, AiContractError>;
}
