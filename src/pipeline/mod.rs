//! Stage functions of the course-to-video pipeline.
//!
//! Each submodule implements one step (or, for extraction, the three steps
//! that build the content buffer). Stages take the [`RunContext`] and the
//! typed output of the stage before them, and return a [`StageOutput`]
//! carrying their own typed result plus the report line. They never decide
//! whether the run continues; that is the orchestrator's job.
//!
//! ## Data Flow
//!
//! ```text
//! extract ──▶ refine ──▶ slides ──▶ render ──▶ narrate ──▶ audio ──▶ assemble ──▶ publish
//! (AI/page)   (AI)       (AI)       (marp)     (AI)        (TTS)     (ffmpeg)     (store)
//! ```
//!
//! [`RunContext`]: crate::model::RunContext

pub mod assemble;
pub mod audio;
pub mod extract;
pub mod narrate;
pub mod postprocess;
pub mod publish;
pub mod refine;
pub mod render;
pub mod slides;

use crate::ai::{AiAction, AiActionClient, AiActionKind};
use crate::error::PipelineError;
use tracing::warn;

/// Result of a successful stage: its typed value and the report line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutput<T> {
    pub value: T,
    pub report: String,
}

impl<T> StageOutput<T> {
    pub fn new(value: T, report: impl Into<String>) -> Self {
        Self {
            value,
            report: report.into(),
        }
    }
}

/// Run one `generate_text` action and return the cleaned answer.
///
/// Remote failures and empty answers both become `AiActionFailure`.
pub(crate) async fn generate_text(
    ai: &dyn AiActionClient,
    prompt: String,
) -> Result<String, PipelineError> {
    let kind = AiActionKind::GenerateText;
    let response = ai.invoke(AiAction::GenerateText { prompt }).await?;
    if let Some(ref reason) = response.finish_reason {
        if reason == "length" {
            warn!("generated text was truncated at the token limit");
        }
    }
    let text = postprocess::clean_generated_text(&response.into_text(kind)?);
    if text.trim().is_empty() {
        return Err(PipelineError::AiActionFailure {
            kind: kind.to_string(),
            error_code: "empty_content".into(),
            message: "the model returned no text".into(),
        });
    }
    Ok(text)
}
