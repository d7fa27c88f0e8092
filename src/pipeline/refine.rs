//! Stage 4: refine the extracted content with the requester's instructions.

use super::{generate_text, StageOutput};
use crate::ai::AiActionClient;
use crate::error::PipelineError;
use crate::model::{ExtractedContent, RefinedContent, RunContext};
use crate::prompts::{refine_prompt, DEFAULT_REFINE_INSTRUCTION};
use tracing::info;

/// The instruction actually used: the requester's, or the configured default.
pub fn effective_instruction<'a>(ctx: &'a RunContext, instructions: &'a str) -> &'a str {
    if instructions.trim().is_empty() {
        ctx.config
            .default_instruction
            .as_deref()
            .unwrap_or(DEFAULT_REFINE_INSTRUCTION)
    } else {
        instructions
    }
}

pub async fn refine_content(
    ctx: &RunContext,
    ai: &dyn AiActionClient,
    content: &ExtractedContent,
    instructions: &str,
) -> Result<StageOutput<RefinedContent>, PipelineError> {
    let default_used = instructions.trim().is_empty();
    let instruction = effective_instruction(ctx, instructions);
    info!(run_id = %ctx.run_id, default_used, "refining course content");

    let text = generate_text(ai, refine_prompt(instruction, &content.text)).await?;
    let report = format!(
        "Refined content: {} characters{}",
        text.chars().count(),
        if default_used { " (default instructions)" } else { "" }
    );
    Ok(StageOutput::new(
        RefinedContent {
            text,
            pages: content.pages,
        },
        report,
    ))
}
