//! Stage 8: synthesize one narration clip per speaker-text block.
//!
//! All-or-nothing: a video with silent slides is not a valid result, so the
//! first failed fragment fails the stage.

use super::{postprocess, StageOutput};
use crate::ai::{AiAction, AiActionClient, AiActionKind};
use crate::artifacts::ArtifactStore;
use crate::error::PipelineError;
use crate::model::{audio_file_name, ArtifactKind, NarrationSet, RunContext, SpeakerScript};
use tracing::{debug, info};

pub async fn synthesize_audio(
    ctx: &RunContext,
    ai: &dyn AiActionClient,
    store: &ArtifactStore,
    script: &SpeakerScript,
) -> Result<StageOutput<NarrationSet>, PipelineError> {
    let fragments = postprocess::split_speaker_text(&script.text);
    if fragments.is_empty() {
        return Err(PipelineError::AiActionFailure {
            kind: AiActionKind::GenerateText.to_string(),
            error_code: "empty_content".into(),
            message: "speaker text contains no fragments".into(),
        });
    }

    let dir = store.allocate(&ctx.run_id, ArtifactKind::Audio).await?;
    info!(run_id = %ctx.run_id, clips = fragments.len(), "synthesizing narration");

    for (i, fragment) in fragments.iter().enumerate() {
        let n = i + 1;
        let bytes = ai
            .invoke(AiAction::TextToSpeech {
                text: fragment.clone(),
            })
            .await?
            .into_audio(AiActionKind::TextToSpeech)
            .map_err(|e| match e {
                PipelineError::AiActionFailure {
                    kind,
                    error_code,
                    message,
                } => PipelineError::AiActionFailure {
                    kind,
                    error_code,
                    message: format!("slide {n}: {message}"),
                },
                other => other,
            })?;

        let path = dir.join(audio_file_name(n));
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| PipelineError::io(&path, e))?;
        debug!(run_id = %ctx.run_id, clip = n, bytes = bytes.len(), "narration clip written");
    }

    let count = fragments.len();
    Ok(StageOutput::new(
        NarrationSet { dir, fragments },
        format!("Synthesized {count} audio clips"),
    ))
}
