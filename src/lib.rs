//! # edgequake-course2video
//!
//! Turn the documents of a course into a narrated slide video.
//!
//! PDF pages are read by a vision model, the resulting text is refined and
//! rewritten as a [Marp](https://marp.app) slide deck, the deck is rendered
//! to images, a speaker script is generated per slide and spoken by a
//! text-to-speech model, and ffmpeg stitches image and audio into one MP4.
//! The finished video is published into the requesting user's file area and
//! the user gets a report of every stage.
//!
//! ## Pipeline Overview
//!
//! ```text
//! RunRequest (PDF page images + plain texts + instructions)
//!  │
//!  ├─  1. Extract     one vision call per PDF page, bounded concurrency
//!  ├─  2. Append      plain texts as further "Page N:" items
//!  ├─  3. Check       nothing extracted → stop
//!  ├─  4. Refine      instructions applied to the whole text
//!  ├─  5. Slides      Marp markup, one slide per page plus title/references
//!  ├─  6. Render      marp → slide_1.png … slide_N.png
//!  ├─  7. Narrate     speaker text, one [SLIDE n] block per image
//!  ├─  8. Audio       text-to-speech per block → audio_n.mp3
//!  ├─  9. Assemble    ffmpeg clip per slide, then concat → final.mp4
//!  ├─ 10. Publish     copy into the user's private files, return a URL
//!  ├─ 11. Cleanup     remove the run's working directories   (always)
//!  └─     Notify      one message with a line per stage      (always)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_course2video::{Pipeline, PipelineConfig, RunRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / EDGEQUAKE_LLM_PROVIDER
//!     let config = PipelineConfig::builder().work_dir("/tmp/c2v").build()?;
//!     let pipeline = Pipeline::builder(config).build()?;
//!
//!     let request = RunRequest {
//!         source_texts: vec!["Photosynthesis converts light into sugar.".into()],
//!         course_id: 42,
//!         ..Default::default()
//!     };
//!     let ctx = pipeline.context(request.course_id, 7);
//!     let report = pipeline.run(&request, ctx).await;
//!     println!("{}", report.render_lines());
//!     Ok(())
//! }
//! ```
//!
//! For background execution use [`spawn_worker`]: [`JobQueue::submit`]
//! returns a run id straight away and reports arrive on the
//! [`WorkerHandle`].
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `course2video` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! ## External tools
//!
//! `marp` (marp-cli) and `ffmpeg` must be installed; their paths are set in
//! [`PipelineConfig`]. On Windows they are started through `cmd /C`.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod ai;
pub mod artifacts;
pub mod config;
pub mod documents;
pub mod error;
pub mod model;
pub mod notify;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod publish;
pub mod tools;
pub mod worker;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use ai::{AiAction, AiActionClient, AiActionKind, AiResponse, LlmActionClient, SpeechClient};
pub use artifacts::ArtifactStore;
pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use documents::{DocumentToText, PlainTextExtractor};
pub use error::{
    AiContractError, DocumentError, NotifyError, PageError, PipelineError, PublishError,
};
pub use model::{
    ArtifactKind, CancellationToken, ContentStage, CourseContent, RunContext, RunId, RunRequest,
    SourceInput,
};
pub use notify::{MailDropNotifier, Notification, Notifier, TracingNotifier, WebhookNotifier};
pub use orchestrator::{Pipeline, PipelineBuilder};
pub use output::{RunReport, RunState, RunStatus, Stage, StageOutcome};
pub use progress::{NoopProgressCallback, ProgressCallback, RunProgressCallback};
pub use publish::{LocalFilePublisher, Publisher};
pub use tools::{ExternalToolInvoker, ProcessRunner};
pub use worker::{spawn_worker, JobQueue, WorkerHandle};
