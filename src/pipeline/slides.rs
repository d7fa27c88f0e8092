//! Stage 5: turn refined content into a Marp slide deck.

use super::{generate_text, postprocess, StageOutput};
use crate::ai::{AiActionClient, AiActionKind};
use crate::error::PipelineError;
use crate::model::{RefinedContent, RunContext, SlideDeck};
use crate::prompts::slide_deck_prompt;
use tracing::{info, warn};

pub async fn build_slide_deck(
    ctx: &RunContext,
    ai: &dyn AiActionClient,
    content: &RefinedContent,
) -> Result<StageOutput<SlideDeck>, PipelineError> {
    let requested = content.pages;
    info!(run_id = %ctx.run_id, requested, "building slide deck");

    let raw = generate_text(ai, slide_deck_prompt(requested, &content.text)).await?;
    let deck = SlideDeck {
        markup: postprocess::clean_slide_markup(&raw),
    };

    let slides = deck.slide_count();
    if slides == 0 {
        return Err(PipelineError::AiActionFailure {
            kind: AiActionKind::GenerateText.to_string(),
            error_code: "empty_content".into(),
            message: "the generated deck contains no slides".into(),
        });
    }
    // Title and references slides come on top of the content slides.
    if slides != requested + 2 {
        warn!(run_id = %ctx.run_id, slides, requested, "slide count differs from request");
    }

    Ok(StageOutput::new(
        deck,
        format!("Slide deck with {slides} slides ({requested} content slides requested)"),
    ))
}
