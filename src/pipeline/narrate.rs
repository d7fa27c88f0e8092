//! Stage 7: write the speaker text for the rendered deck.

use super::{generate_text, postprocess, StageOutput};
use crate::ai::AiActionClient;
use crate::error::PipelineError;
use crate::model::{RenderedAssets, RunContext, SlideDeck, SpeakerScript};
use crate::prompts::speaker_text_prompt;
use tracing::{info, warn};

pub async fn generate_speaker_text(
    ctx: &RunContext,
    ai: &dyn AiActionClient,
    deck: &SlideDeck,
    rendered: &RenderedAssets,
) -> Result<StageOutput<SpeakerScript>, PipelineError> {
    info!(run_id = %ctx.run_id, slides = rendered.count, "generating speaker text");

    let text = generate_text(ai, speaker_text_prompt(rendered.count, &deck.markup)).await?;
    let blocks = postprocess::split_speaker_text(&text).len();
    if blocks != rendered.count {
        warn!(
            run_id = %ctx.run_id,
            blocks,
            slides = rendered.count,
            "speaker text block count differs from slide count"
        );
    }

    Ok(StageOutput::new(
        SpeakerScript { text },
        format!("Speaker text with {blocks} blocks for {} slides", rendered.count),
    ))
}
