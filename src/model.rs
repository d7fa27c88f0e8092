//! Core data types shared by every stage.
//!
//! The content buffer changes meaning as it moves through the pipeline
//! (raw page text → refined text → slide markup → speaker text). Each
//! representation gets its own newtype so a stage cannot be handed the wrong
//! one; [`CourseContent`] is the stage-tagged, type-erased form used for
//! reporting and notification.

use crate::config::PipelineConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// ── Identifiers ──────────────────────────────────────────────────────────

/// Opaque run/content identifier; also the artifact namespace of the run.
///
/// Only ASCII alphanumerics, `-` and `_` are accepted so that a run id is
/// always a single path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RunId(String);

impl RunId {
    /// Fresh random run id.
    pub fn generate() -> Self {
        RunId(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Validate an externally supplied id.
    pub fn parse(raw: impl Into<String>) -> Result<Self, String> {
        let raw = raw.into();
        let valid = !raw.is_empty()
            && raw.len() <= 64
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(RunId(raw))
        } else {
            Err(format!("invalid run id '{raw}'"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RunId {
    type Error = String;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        RunId::parse(value)
    }
}

impl From<RunId> for String {
    fn from(id: RunId) -> Self {
        id.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Cancellation ─────────────────────────────────────────────────────────

/// Cooperative cancellation flag, checked by the orchestrator between stages.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ── Run request & context ────────────────────────────────────────────────

/// What the requester submitted: the job payload queued for the worker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunRequest {
    /// Base64 page images per PDF source, each list in page order.
    #[serde(default)]
    pub pdf_page_image_sets: BTreeMap<String, Vec<String>>,
    /// Already-extracted text of labels, pages, resources and folder files.
    #[serde(default)]
    pub source_texts: Vec<String>,
    /// Free-text refinement instructions; empty means "use the default".
    #[serde(default)]
    pub instructions: String,
    pub course_id: i64,
}

impl RunRequest {
    /// Flatten the request into its ordered source inputs: PDFs first, then texts.
    pub fn inputs(&self) -> Vec<SourceInput> {
        let pdfs = self
            .pdf_page_image_sets
            .iter()
            .map(|(id, images)| SourceInput::PdfPages {
                source_id: id.clone(),
                images: images.clone(),
            });
        let texts = self
            .source_texts
            .iter()
            .map(|t| SourceInput::Text { text: t.clone() });
        pdfs.chain(texts).collect()
    }

    /// Total number of PDF page images across all sources.
    pub fn pdf_page_count(&self) -> usize {
        self.pdf_page_image_sets.values().map(Vec::len).sum()
    }
}

/// One unit of input content. Immutable once queued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceInput {
    /// One PDF rendered to page images (base64).
    PdfPages { source_id: String, images: Vec<String> },
    /// A plain text blob from a non-PDF course module.
    Text { text: String },
}

/// Everything a stage needs to know about the run it belongs to.
///
/// Passed explicitly into every stage; nothing is read from ambient state.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: RunId,
    pub course_id: i64,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
    pub config: Arc<PipelineConfig>,
    pub cancel: CancellationToken,
}

impl RunContext {
    pub fn new(course_id: i64, user_id: i64, config: Arc<PipelineConfig>) -> Self {
        Self {
            run_id: RunId::generate(),
            course_id,
            user_id,
            created_at: Utc::now(),
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = run_id;
        self
    }

    /// Run timestamp used in published file names.
    pub fn timestamp(&self) -> String {
        self.created_at.format("%Y%m%d_%H%M%S").to_string()
    }
}

// ── Stage-tagged content ─────────────────────────────────────────────────

/// Which representation a content buffer currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentStage {
    Extracted,
    Refined,
    SlideMarkup,
    SpeakerText,
}

impl fmt::Display for ContentStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ContentStage::Extracted => "Generated Course Content",
            ContentStage::Refined => "Refined Course Content",
            ContentStage::SlideMarkup => "Slide Deck",
            ContentStage::SpeakerText => "Speaker Text",
        })
    }
}

/// The content buffer together with its provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseContent {
    pub stage: ContentStage,
    pub text: String,
}

/// Page-tagged text accumulated by extraction and append stages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedContent {
    pub text: String,
    /// Number of "Page N:" items in `text`; the next item gets `pages + 1`.
    pub pages: usize,
}

impl ExtractedContent {
    /// Append one item, tagged with the next page number.
    pub fn push_page(&mut self, body: &str) {
        self.pages += 1;
        self.text
            .push_str(&format!("Page {}:\n{}\n\n", self.pages, body.trim()));
    }
}

/// Course content after the refinement prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefinedContent {
    pub text: String,
    /// Page count carried forward; sizes the slide deck.
    pub pages: usize,
}

/// Slide markup, ready for the renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlideDeck {
    pub markup: String,
}

impl SlideDeck {
    /// Number of slides, counting `---` separators outside the front matter.
    pub fn slide_count(&self) -> usize {
        crate::pipeline::postprocess::count_slides(&self.markup)
    }
}

/// Speaker text, one delimited block per slide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeakerScript {
    pub text: String,
}

impl From<&ExtractedContent> for CourseContent {
    fn from(c: &ExtractedContent) -> Self {
        CourseContent {
            stage: ContentStage::Extracted,
            text: c.text.clone(),
        }
    }
}

impl From<&RefinedContent> for CourseContent {
    fn from(c: &RefinedContent) -> Self {
        CourseContent {
            stage: ContentStage::Refined,
            text: c.text.clone(),
        }
    }
}

impl From<&SlideDeck> for CourseContent {
    fn from(d: &SlideDeck) -> Self {
        CourseContent {
            stage: ContentStage::SlideMarkup,
            text: d.markup.clone(),
        }
    }
}

impl From<&SpeakerScript> for CourseContent {
    fn from(s: &SpeakerScript) -> Self {
        CourseContent {
            stage: ContentStage::SpeakerText,
            text: s.text.clone(),
        }
    }
}

/// Rendered slide images: `slide_1.png` … `slide_{count}.png` inside `dir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedAssets {
    pub dir: PathBuf,
    pub count: usize,
}

impl RenderedAssets {
    pub fn slide(&self, n: usize) -> PathBuf {
        self.dir.join(slide_file_name(n))
    }
}

/// Per-slide speaker fragments and the `audio_{n}.mp3` clips made from them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NarrationSet {
    pub dir: PathBuf,
    pub fragments: Vec<String>,
}

impl NarrationSet {
    pub fn clip(&self, n: usize) -> PathBuf {
        self.dir.join(audio_file_name(n))
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

/// The assembled MP4. Owned by the run until the publisher copies it out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoArtifact {
    pub path: PathBuf,
    pub clips: usize,
}

// ── Artifacts ────────────────────────────────────────────────────────────

/// Kinds of per-run working directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Markdown,
    Images,
    Audio,
    Video,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 4] = [
        ArtifactKind::Markdown,
        ArtifactKind::Images,
        ArtifactKind::Audio,
        ArtifactKind::Video,
    ];

    pub fn dir_name(self) -> &'static str {
        match self {
            ArtifactKind::Markdown => "markdown",
            ArtifactKind::Images => "images",
            ArtifactKind::Audio => "audio",
            ArtifactKind::Video => "video",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// File name of the `n`-th rendered slide (1-based).
pub fn slide_file_name(n: usize) -> String {
    format!("slide_{n}.png")
}

/// File name of the `n`-th narration clip (1-based).
pub fn audio_file_name(n: usize) -> String {
    format!("audio_{n}.mp3")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_rejects_path_components() {
        assert!(RunId::parse("../other").is_err());
        assert!(RunId::parse("a/b").is_err());
        assert!(RunId::parse("").is_err());
        assert!(RunId::parse("run-42_x").is_ok());
    }

    #[test]
    fn generated_run_ids_are_unique_and_valid() {
        let a = RunId::generate();
        let b = RunId::generate();
        assert_ne!(a, b);
        assert!(RunId::parse(a.as_str()).is_ok());
    }

    #[test]
    fn push_page_numbers_contiguously() {
        let mut c = ExtractedContent::default();
        c.push_page("alpha");
        c.push_page("  beta \n");
        assert_eq!(c.pages, 2);
        assert_eq!(c.text, "Page 1:\nalpha\n\nPage 2:\nbeta\n\n");
    }

    #[test]
    fn inputs_put_pdfs_before_texts() {
        let mut req = RunRequest {
            source_texts: vec!["t1".into()],
            course_id: 7,
            ..Default::default()
        };
        req.pdf_page_image_sets
            .insert("12".into(), vec!["aaa".into(), "bbb".into()]);
        let inputs = req.inputs();
        assert!(matches!(inputs[0], SourceInput::PdfPages { .. }));
        assert_eq!(inputs[1], SourceInput::Text { text: "t1".into() });
        assert_eq!(req.pdf_page_count(), 2);
    }

    #[test]
    fn content_keeps_its_stage_tag() {
        let deck = SlideDeck {
            markup: "---\nmarp: true\n---\n# T".into(),
        };
        let tagged = CourseContent::from(&deck);
        assert_eq!(tagged.stage, ContentStage::SlideMarkup);
    }

    #[test]
    fn request_deserialises_with_defaults() {
        let req: RunRequest = serde_json::from_str(r#"{"course_id": 3}"#).unwrap();
        assert_eq!(req.course_id, 3);
        assert!(req.source_texts.is_empty());
        assert!(req.instructions.is_empty());
    }

    #[test]
    fn cancellation_is_shared_between_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
