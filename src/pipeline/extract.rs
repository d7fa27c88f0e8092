//! Content extraction: PDF pages, source texts, and the presence check.
//!
//! Pages are transcribed concurrently (`extract_concurrency`) but numbered
//! in source/page order. Only successful pages get a number, so the
//! "Page N:" sequence stays contiguous when some pages fail; the source
//! texts continue the same sequence.

use super::StageOutput;
use crate::ai::{AiAction, AiActionClient, AiActionKind};
use crate::error::{PageError, PipelineError};
use crate::model::{ExtractedContent, RunContext, SourceInput};
use crate::prompts::DEFAULT_EXTRACTION_PROMPT;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

struct PageJob {
    source_id: String,
    page: usize,
    image: String,
}

/// Transcribe one page. Contract violations (undecodable image) count as a
/// failed page rather than aborting the stage.
async fn extract_page(
    ai: &dyn AiActionClient,
    prompt: &str,
    job: PageJob,
) -> Result<String, PageError> {
    let PageJob {
        source_id,
        page,
        image,
    } = job;
    let fail = |detail: String| PageError::ExtractionFailed {
        source_id: source_id.clone(),
        page,
        detail,
    };

    let action = AiAction::ExtractPageText {
        image_base64: image,
        prompt: prompt.to_string(),
    };
    let response = ai.invoke(action).await.map_err(|e| fail(e.to_string()))?;
    if !response.success {
        return Err(fail(response.describe_error()));
    }
    let text = response
        .into_text(AiActionKind::ExtractPageText)
        .map_err(|e| fail(e.to_string()))?;
    if text.trim().is_empty() {
        return Err(fail("page produced no text".into()));
    }
    Ok(text)
}

/// Stage 1: transcribe every PDF page image.
///
/// Succeeds when there are no PDF pages at all, or when at least one page
/// was transcribed. Page failures are tallied, logged and reported.
pub async fn extract_pdf_pages(
    ctx: &RunContext,
    ai: &dyn AiActionClient,
    inputs: &[SourceInput],
) -> Result<StageOutput<ExtractedContent>, PipelineError> {
    let prompt = ctx
        .config
        .extraction_prompt
        .as_deref()
        .unwrap_or(DEFAULT_EXTRACTION_PROMPT);

    let jobs: Vec<PageJob> = inputs
        .iter()
        .filter_map(|input| match input {
            SourceInput::PdfPages { source_id, images } => Some((source_id, images)),
            SourceInput::Text { .. } => None,
        })
        .flat_map(|(source_id, images)| {
            images.iter().enumerate().map(move |(i, image)| PageJob {
                source_id: source_id.clone(),
                page: i + 1,
                image: image.clone(),
            })
        })
        .collect();

    let mut content = ExtractedContent::default();
    if jobs.is_empty() {
        info!(run_id = %ctx.run_id, "no PDF pages to extract");
        return Ok(StageOutput::new(content, "0 PDF pages"));
    }

    let total = jobs.len();
    info!(run_id = %ctx.run_id, total, "extracting PDF pages");

    // `buffered` yields in submission order, so numbering below is stable.
    let results: Vec<Result<String, PageError>> = stream::iter(jobs)
        .map(|job| extract_page(ai, prompt, job))
        .buffered(ctx.config.extract_concurrency)
        .collect()
        .await;

    let mut errors = Vec::new();
    for result in results {
        match result {
            Ok(text) => {
                content.push_page(&text);
                debug!(run_id = %ctx.run_id, page = content.pages, "page extracted");
            }
            Err(e) => {
                warn!(run_id = %ctx.run_id, "{}", e);
                errors.push(e);
            }
        }
    }

    let ok = content.pages;
    if ok == 0 {
        let first = errors
            .first()
            .map(ToString::to_string)
            .unwrap_or_else(|| "Unknown error".to_string());
        return Err(PipelineError::AiActionFailure {
            kind: AiActionKind::ExtractPageText.to_string(),
            error_code: "all_pages_failed".into(),
            message: format!("all {total} PDF pages failed; first error: {first}"),
        });
    }

    let mut report = format!("{total} PDF pages: {ok} success, {} errors", errors.len());
    for e in &errors {
        report.push_str(&format!("\n  {e}"));
    }
    Ok(StageOutput::new(content, report))
}

/// Stage 2: append the already-extracted source texts, continuing the page
/// numbering. Blank texts are skipped and do not consume a number.
pub fn append_source_texts(
    ctx: &RunContext,
    mut content: ExtractedContent,
    inputs: &[SourceInput],
) -> StageOutput<ExtractedContent> {
    let before = content.pages;
    let mut skipped = 0;
    for input in inputs {
        if let SourceInput::Text { text } = input {
            if text.trim().is_empty() {
                skipped += 1;
                continue;
            }
            content.push_page(text);
        }
    }
    let added = content.pages - before;
    debug!(run_id = %ctx.run_id, added, skipped, "source texts appended");

    let report = if skipped > 0 {
        format!("{added} source texts added ({skipped} empty skipped)")
    } else {
        format!("{added} source texts added")
    };
    StageOutput::new(content, report)
}

/// Stage 3: refuse to continue with nothing but whitespace.
pub fn check_content_presence(
    content: ExtractedContent,
) -> Result<StageOutput<ExtractedContent>, PipelineError> {
    if content.text.trim().is_empty() {
        return Err(PipelineError::NoContentExtracted);
    }
    let report = format!(
        "{} pages of content ({} characters)",
        content.pages,
        content.text.chars().count()
    );
    Ok(StageOutput::new(content, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::AiResponse;
    use crate::config::PipelineConfig;
    use crate::error::AiContractError;
    use async_trait::async_trait;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use std::sync::Arc;

    /// Answers with the decoded image bytes as text; fails images that
    /// decode to "FAIL".
    struct EchoClient;

    #[async_trait]
    impl AiActionClient for EchoClient {
        async fn invoke(&self, action: AiAction) -> Result<AiResponse, AiContractError> {
            action.validate()?;
            match action {
                AiAction::ExtractPageText { image_base64, .. } => {
                    let bytes = STANDARD.decode(image_base64).unwrap();
                    let text = String::from_utf8(bytes).unwrap();
                    if text == "FAIL" {
                        Ok(AiResponse::failure("500", "vision backend error"))
                    } else {
                        Ok(AiResponse::text(text, Some("stop".into())))
                    }
                }
                _ => unreachable!(),
            }
        }
    }

    fn ctx() -> RunContext {
        let config = PipelineConfig::builder().extract_concurrency(3).build().unwrap();
        RunContext::new(1, 2, Arc::new(config))
    }

    fn pdf(id: &str, pages: &[&str]) -> SourceInput {
        SourceInput::PdfPages {
            source_id: id.into(),
            images: pages.iter().map(|p| STANDARD.encode(p)).collect(),
        }
    }

    #[tokio::test]
    async fn no_pdfs_reports_zero_pages() {
        let out = extract_pdf_pages(&ctx(), &EchoClient, &[SourceInput::Text { text: "t".into() }])
            .await
            .unwrap();
        assert_eq!(out.report, "0 PDF pages");
        assert_eq!(out.value.pages, 0);
    }

    #[tokio::test]
    async fn failed_page_is_skipped_and_numbering_stays_contiguous() {
        let inputs = [pdf("7", &["one", "FAIL", "three"])];
        let out = extract_pdf_pages(&ctx(), &EchoClient, &inputs).await.unwrap();
        assert!(out.report.contains("2 success, 1 errors"), "{}", out.report);
        assert_eq!(out.value.text, "Page 1:\none\n\nPage 2:\nthree\n\n");
    }

    #[tokio::test]
    async fn numbering_runs_across_sources() {
        let inputs = [pdf("a", &["a1", "a2"]), pdf("b", &["b1"])];
        let out = extract_pdf_pages(&ctx(), &EchoClient, &inputs).await.unwrap();
        assert_eq!(out.value.pages, 3);
        assert!(out.value.text.contains("Page 3:\nb1"));
    }

    #[tokio::test]
    async fn extraction_runs_inside_a_spawned_task() {
        let inputs = vec![pdf("s", &["one", "two"])];
        let out = tokio::spawn(async move {
            let ctx = ctx();
            extract_pdf_pages(&ctx, &EchoClient, &inputs).await
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(out.value.pages, 2);
    }

    #[tokio::test]
    async fn all_pages_failing_fails_the_stage() {
        let inputs = [pdf("x", &["FAIL", "FAIL"])];
        let err = extract_pdf_pages(&ctx(), &EchoClient, &inputs).await.unwrap_err();
        assert!(matches!(err, PipelineError::AiActionFailure { .. }));
    }

    #[tokio::test]
    async fn invalid_image_counts_as_page_error() {
        let inputs = [
            SourceInput::PdfPages {
                source_id: "bad".into(),
                images: vec!["%%%".into()],
            },
            pdf("good", &["ok"]),
        ];
        let out = extract_pdf_pages(&ctx(), &EchoClient, &inputs).await.unwrap();
        assert!(out.report.contains("1 success, 1 errors"));
    }

    #[test]
    fn source_texts_continue_numbering() {
        let mut content = ExtractedContent::default();
        content.push_page("pdf page");
        let inputs = [
            SourceInput::Text { text: "first".into() },
            SourceInput::Text { text: "  ".into() },
            SourceInput::Text { text: "second".into() },
        ];
        let out = append_source_texts(&ctx(), content, &inputs);
        assert_eq!(out.value.pages, 3);
        assert!(out.value.text.contains("Page 2:\nfirst"));
        assert!(out.value.text.contains("Page 3:\nsecond"));
        assert!(out.report.contains("1 empty skipped"));
    }

    #[test]
    fn whitespace_only_content_is_rejected() {
        let content = ExtractedContent {
            text: " \n\t ".into(),
            pages: 0,
        };
        assert!(matches!(
            check_content_presence(content),
            Err(PipelineError::NoContentExtracted)
        ));
    }
}
