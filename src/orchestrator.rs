//! Pipeline orchestrator: runs the stages of one run in order.
//!
//! [`Pipeline::run`] never fails. Whatever happens inside a stage ends up as
//! a line in the [`RunReport`]; the first failure stops forward progress,
//! and cleanup plus notification run afterwards in every case.
//!
//! ```text
//! Pending → Extracting → Refining → BuildingSlides → RenderingImages
//!   → GeneratingSpeakerText → SynthesizingAudio → AssemblingVideo
//!   → Publishing → CleaningUp → Notified(Succeeded | Failed)
//!          (any failure) ───────────────▶ CleaningUp
//! ```

use crate::ai::{AiActionClient, LlmActionClient};
use crate::artifacts::ArtifactStore;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::model::{CourseContent, RunContext, RunRequest};
use crate::notify::{Notification, Notifier, TracingNotifier};
use crate::output::{RunReport, RunState, RunStatus, Stage, StageOutcome};
use crate::pipeline::{assemble, audio, extract, narrate, publish, refine, render, slides, StageOutput};
use crate::progress::ProgressCallback;
use crate::publish::{LocalFilePublisher, Publisher};
use crate::tools::ExternalToolInvoker;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn, Instrument};

/// Everything one run accumulates on its way through the stages.
struct RunRecorder<'a> {
    ctx: &'a RunContext,
    callback: Option<&'a ProgressCallback>,
    state: RunState,
    outcomes: Vec<StageOutcome>,
    content: Option<CourseContent>,
    speaker_text: Option<String>,
    video_url: Option<String>,
}

impl<'a> RunRecorder<'a> {
    fn new(ctx: &'a RunContext, callback: Option<&'a ProgressCallback>) -> Self {
        Self {
            ctx,
            callback,
            state: RunState::Pending,
            outcomes: Vec::new(),
            content: None,
            speaker_text: None,
            video_url: None,
        }
    }

    fn advance(&mut self, next: RunState) {
        if self.state != next {
            debug_assert!(self.state.can_advance_to(next), "{:?} → {:?}", self.state, next);
            debug!(run_id = %self.ctx.run_id, from = ?self.state, to = ?next, "state change");
            self.state = next;
        }
    }

    fn record(&mut self, stage: Stage, success: bool, message: String) {
        let run_id = self.ctx.run_id.as_str();
        if let Some(cb) = self.callback {
            if success {
                cb.on_stage_complete(run_id, stage, &message);
            } else {
                cb.on_stage_error(run_id, stage, &message);
            }
        }
        self.outcomes.push(StageOutcome {
            stage,
            success,
            message,
        });
    }

    /// Run one stage: cancellation check, state change, outcome line.
    async fn stage<T>(
        &mut self,
        stage: Stage,
        work: impl Future<Output = Result<StageOutput<T>, PipelineError>>,
    ) -> Result<T, PipelineError> {
        if self.ctx.cancel.is_cancelled() {
            let err = PipelineError::Cancelled {
                stage: stage.name().to_string(),
            };
            warn!(run_id = %self.ctx.run_id, "{}", err);
            self.record(stage, false, err.to_string());
            return Err(err);
        }

        self.advance(stage.state());
        if let Some(cb) = self.callback {
            cb.on_stage_start(self.ctx.run_id.as_str(), stage);
        }
        info!(run_id = %self.ctx.run_id, stage = stage.name(), "stage started");

        match work.await {
            Ok(out) => {
                info!(run_id = %self.ctx.run_id, stage = stage.name(), "{}", out.report);
                self.record(stage, true, out.report);
                Ok(out.value)
            }
            Err(e) => {
                warn!(run_id = %self.ctx.run_id, stage = stage.name(), "stage failed: {}", e);
                self.record(stage, false, e.to_string());
                Err(e)
            }
        }
    }
}

/// The course-to-video pipeline and its collaborators.
#[derive(Clone)]
pub struct Pipeline {
    config: Arc<PipelineConfig>,
    ai: Arc<dyn AiActionClient>,
    tools: ExternalToolInvoker,
    store: Arc<ArtifactStore>,
    publisher: Arc<dyn Publisher>,
    notifier: Arc<dyn Notifier>,
}

impl Pipeline {
    pub fn builder(config: PipelineConfig) -> PipelineBuilder {
        PipelineBuilder {
            config,
            ai: None,
            tools: None,
            store: None,
            publisher: None,
            notifier: None,
        }
    }

    pub fn config(&self) -> &Arc<PipelineConfig> {
        &self.config
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// A fresh context for a run of `course_id` requested by `user_id`.
    pub fn context(&self, course_id: i64, user_id: i64) -> RunContext {
        RunContext::new(course_id, user_id, Arc::clone(&self.config))
    }

    /// Execute one run to completion and return its report.
    ///
    /// Cleanup and notification always run, exactly once.
    pub async fn run(&self, request: &RunRequest, ctx: RunContext) -> RunReport {
        let span = info_span!("run", run_id = %ctx.run_id, course_id = ctx.course_id);
        self.run_inner(request, &ctx).instrument(span).await
    }

    async fn run_inner(&self, request: &RunRequest, ctx: &RunContext) -> RunReport {
        let start = Instant::now();
        let callback = self.config.progress_callback.as_ref();
        if let Some(cb) = callback {
            cb.on_run_start(ctx.run_id.as_str());
        }
        info!(
            run_id = %ctx.run_id,
            pdfs = request.pdf_page_image_sets.len(),
            pdf_pages = request.pdf_page_count(),
            texts = request.source_texts.len(),
            "run started"
        );

        let mut rec = RunRecorder::new(ctx, callback);
        let status = match self.execute(request, ctx, &mut rec).await {
            Ok(()) => RunStatus::Succeeded,
            Err(_) => RunStatus::Failed,
        };

        // ── Cleanup ──────────────────────────────────────────────────────
        rec.advance(RunState::CleaningUp);
        if let Some(cb) = callback {
            cb.on_stage_start(ctx.run_id.as_str(), Stage::Cleanup);
        }
        let removed = self.store.release(&ctx.run_id).await;
        rec.record(
            Stage::Cleanup,
            true,
            format!("Removed {removed} working directories"),
        );

        // ── Notify ───────────────────────────────────────────────────────
        rec.advance(RunState::Notified(status));
        let report = RunReport {
            run_id: ctx.run_id.clone(),
            course_id: ctx.course_id,
            user_id: ctx.user_id,
            instructions: request.instructions.clone(),
            outcomes: rec.outcomes,
            status,
            state: rec.state,
            video_url: rec.video_url,
            content: rec.content,
            speaker_text: rec.speaker_text,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        let notification = Notification::for_report(&report, &self.config);
        if let Err(e) = self.notifier.send(&notification).await {
            warn!(run_id = %ctx.run_id, "notification failed: {}", e);
        }

        info!(
            run_id = %ctx.run_id,
            status = ?status,
            duration_ms = report.duration_ms,
            "run finished"
        );
        if let Some(cb) = callback {
            cb.on_run_complete(ctx.run_id.as_str(), status);
        }
        report
    }

    /// Close a run whose task died before it could report: release its
    /// working directories, send the failure notification and return a
    /// failed report.
    pub async fn abort_run(&self, ctx: &RunContext, instructions: String, reason: &str) -> RunReport {
        let start = Instant::now();
        let callback = self.config.progress_callback.as_ref();
        warn!(run_id = %ctx.run_id, "run aborted: {}", reason);

        let mut rec = RunRecorder::new(ctx, callback);
        rec.advance(RunState::CleaningUp);
        let removed = self.store.release(&ctx.run_id).await;
        rec.record(
            Stage::Cleanup,
            true,
            format!("Run aborted ({reason}); removed {removed} working directories"),
        );
        rec.advance(RunState::Notified(RunStatus::Failed));

        let report = RunReport {
            run_id: ctx.run_id.clone(),
            course_id: ctx.course_id,
            user_id: ctx.user_id,
            instructions,
            outcomes: rec.outcomes,
            status: RunStatus::Failed,
            state: rec.state,
            video_url: None,
            content: None,
            speaker_text: None,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        let notification = Notification::for_report(&report, &self.config);
        if let Err(e) = self.notifier.send(&notification).await {
            warn!(run_id = %ctx.run_id, "notification failed: {}", e);
        }
        if let Some(cb) = callback {
            cb.on_run_complete(ctx.run_id.as_str(), RunStatus::Failed);
        }
        report
    }

    /// Stages 1–10. Returns at the first failure; the error is already in
    /// the recorder.
    async fn execute(
        &self,
        request: &RunRequest,
        ctx: &RunContext,
        rec: &mut RunRecorder<'_>,
    ) -> Result<(), PipelineError> {
        let ai = self.ai.as_ref();
        let store = self.store.as_ref();
        let inputs = &request.inputs();

        let extracted = rec
            .stage(Stage::ExtractPdfPages, extract::extract_pdf_pages(ctx, ai, inputs))
            .await?;
        rec.content = Some((&extracted).into());

        let extracted = rec
            .stage(Stage::AppendSourceTexts, async move {
                Ok(extract::append_source_texts(ctx, extracted, inputs))
            })
            .await?;
        rec.content = Some((&extracted).into());

        let extracted = rec
            .stage(Stage::ContentPresenceCheck, async move {
                extract::check_content_presence(extracted)
            })
            .await?;

        let refined = rec
            .stage(
                Stage::RefineContent,
                refine::refine_content(ctx, ai, &extracted, &request.instructions),
            )
            .await?;
        rec.content = Some((&refined).into());

        let deck = rec
            .stage(Stage::BuildSlideDeck, slides::build_slide_deck(ctx, ai, &refined))
            .await?;
        rec.content = Some((&deck).into());

        let rendered = rec
            .stage(
                Stage::RenderImages,
                render::render_images(ctx, &self.tools, store, &deck),
            )
            .await?;

        let script = rec
            .stage(
                Stage::GenerateSpeakerText,
                narrate::generate_speaker_text(ctx, ai, &deck, &rendered),
            )
            .await?;
        rec.speaker_text = Some(script.text.clone());

        let narration = rec
            .stage(
                Stage::SynthesizeAudio,
                audio::synthesize_audio(ctx, ai, store, &script),
            )
            .await?;

        let video = rec
            .stage(
                Stage::AssembleVideo,
                assemble::assemble_video(ctx, &self.tools, store, &rendered, &narration),
            )
            .await?;

        let url = rec
            .stage(
                Stage::Publish,
                publish::publish_video(ctx, self.publisher.as_ref(), &video),
            )
            .await?;
        rec.video_url = Some(url);
        Ok(())
    }
}

/// Builder for [`Pipeline`]. Unset collaborators get production defaults.
pub struct PipelineBuilder {
    config: PipelineConfig,
    ai: Option<Arc<dyn AiActionClient>>,
    tools: Option<ExternalToolInvoker>,
    store: Option<Arc<ArtifactStore>>,
    publisher: Option<Arc<dyn Publisher>>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl PipelineBuilder {
    pub fn ai_client(mut self, ai: Arc<dyn AiActionClient>) -> Self {
        self.ai = Some(ai);
        self
    }

    pub fn tool_invoker(mut self, tools: ExternalToolInvoker) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn artifact_store(mut self, store: Arc<ArtifactStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Assemble the pipeline.
    ///
    /// Defaults: [`LlmActionClient::from_config`], the platform process
    /// runner, an artifact store under `work_dir`, a [`LocalFilePublisher`]
    /// under `work_dir/published`, and a [`TracingNotifier`].
    pub fn build(self) -> Result<Pipeline, PipelineError> {
        let config = self.config;
        let ai = match self.ai {
            Some(ai) => ai,
            None => Arc::new(LlmActionClient::from_config(&config)?),
        };
        let tools = self.tools.unwrap_or_else(|| {
            ExternalToolInvoker::for_platform(Duration::from_secs(config.tool_timeout_secs))
        });
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(ArtifactStore::new(&config.work_dir)));
        let publisher = self
            .publisher
            .unwrap_or_else(|| Arc::new(LocalFilePublisher::new(config.work_dir.join("published"))));
        let notifier = self.notifier.unwrap_or_else(|| Arc::new(TracingNotifier));

        Ok(Pipeline {
            config: Arc::new(config),
            ai,
            tools,
            store,
            publisher,
            notifier,
        })
    }
}
