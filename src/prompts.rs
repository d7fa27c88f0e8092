//! Prompts sent to the AI backends.
//!
//! Keeping every prompt here gives one place to tune wording and lets tests
//! assert on what a stage asked for without a live model.
//!
//! Callers can override the page-extraction prompt and the default refinement
//! instruction via [`crate::config::PipelineConfig`]; the constants here are
//! used only when no override is provided.

/// Prompt sent with every PDF page image.
pub const DEFAULT_EXTRACTION_PROMPT: &str = "Extract the text from the above document as if you were reading it naturally. Return the tables in html format. Return the equations in LaTeX representation. If there is an image in the document and image caption is not present, add a small description of the image inside the <img></img> tag; otherwise, add the image caption inside <img></img>. Watermarks should be wrapped in brackets. Ex: <watermark>OFFICIAL COPY</watermark>. Page numbers should be wrapped in brackets. Ex: <page_number>14</page_number> or <page_number>9/22</page_number>. Prefer using ☐ and ☑ for check boxes.";

/// Refinement instruction used when the requester left the field empty.
pub const DEFAULT_REFINE_INSTRUCTION: &str = "Improve the structure and clarity of the following course content. Fix extraction artefacts, merge text that was split across pages, and keep every fact. Keep the \"Page N:\" markers so each section stays identifiable.";

/// System message for every text-generation request.
pub const GENERATION_SYSTEM_PROMPT: &str = "You are an experienced instructional designer who turns course material into clear teaching resources. Answer with the requested content only, without commentary.";

/// Line that opens the speaker text of slide `n`: `[SLIDE n]`.
pub const SPEAKER_DELIMITER_PREFIX: &str = "[SLIDE ";

/// The delimiter line for slide `n`.
pub fn speaker_delimiter(n: usize) -> String {
    format!("{SPEAKER_DELIMITER_PREFIX}{n}]")
}

/// Prompt for the refine-content stage.
pub fn refine_prompt(instructions: &str, content: &str) -> String {
    format!("{}\n\n{}", instructions.trim(), content.trim())
}

/// Prompt for the build-slide-deck stage.
///
/// Asks for `slide_count` content slides, one per "Page X:" marker, framed
/// by a title slide and a references slide.
pub fn slide_deck_prompt(slide_count: usize, content: &str) -> String {
    format!(
        r#"Create a presentation in Marp markdown from the course content below.

Rules:
- Start with Marp front matter (`marp: true`, `paginate: true`).
- Separate slides with a line containing only `---`.
- The first slide is a title slide naming the topic of the course.
- Then create exactly {slide_count} content slides, one for each "Page X:" marker, in order.
- The last slide lists the references and sources used.
- Keep each slide short: a heading and at most six bullet points.
- Output ONLY the Marp markdown. Do NOT wrap it in ```markdown fences.

Course content:

{content}"#,
        content = content.trim()
    )
}

/// Prompt for the generate-speaker-text stage.
pub fn speaker_text_prompt(slide_count: usize, deck: &str) -> String {
    format!(
        r#"Write the speaker text for the following Marp presentation with {slide_count} slides.

Rules:
- Write one block of spoken text per slide, in slide order, including the title and references slides.
- Start every block with a line containing only the slide marker, e.g. `{first}` for the first slide, `{second}` for the second.
- Write natural, flowing speech. No bullet points, no markdown, no stage directions.
- Output ONLY the marked blocks.

Presentation:

{deck}"#,
        first = speaker_delimiter(1),
        second = speaker_delimiter(2),
        deck = deck.trim()
    )
}
