//! Test doubles for running the whole pipeline without network or binaries.

#![allow(dead_code)]

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_course2video::error::{AiContractError, NotifyError, PublishError};
use edgequake_course2video::pipeline::postprocess::count_slides;
use edgequake_course2video::prompts::speaker_delimiter;
use edgequake_course2video::tools::{RawOutput, RunnerError, ToolInvocation};
use edgequake_course2video::{
    AiAction, AiActionClient, AiResponse, ExternalToolInvoker, LocalFilePublisher, Notification,
    Notifier, Pipeline, PipelineConfig, ProcessRunner, Publisher, RunContext, RunRequest,
};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Base64 stand-in for a page image; the fake AI "reads" the decoded label.
pub fn page_image(label: &str) -> String {
    STANDARD.encode(label)
}

/// A request with one PDF source made of the given page labels.
pub fn pdf_request(course_id: i64, source: &str, labels: &[&str]) -> RunRequest {
    let mut sets = BTreeMap::new();
    sets.insert(
        source.to_string(),
        labels.iter().map(|l| page_image(l)).collect(),
    );
    RunRequest {
        pdf_page_image_sets: sets,
        course_id,
        ..Default::default()
    }
}

// ── AI ──────────────────────────────────────────────────────────────────────

/// Deterministic AI backend.
///
/// - page extraction answers `Text of <label>`, or fails for labels in
///   `failing_pages`;
/// - the slide-deck prompt is answered with `deck_slides` slides;
/// - the speaker-text prompt with one `[SLIDE n]` block per deck slide;
/// - any other generation prompt (refinement) is echoed back;
/// - speech returns a few fake MP3 bytes, or panics with `panic_on_speech`.
#[derive(Default)]
pub struct ScriptedAi {
    pub failing_pages: HashSet<String>,
    pub deck_slides: usize,
    pub fail_speech: bool,
    pub panic_on_speech: bool,
    prompts: Mutex<Vec<String>>,
    speech_calls: Mutex<usize>,
}

impl ScriptedAi {
    pub fn new(deck_slides: usize) -> Self {
        Self {
            deck_slides,
            ..Default::default()
        }
    }

    pub fn failing(mut self, label: &str) -> Self {
        self.failing_pages.insert(label.to_string());
        self
    }

    /// Generation prompts, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn speech_calls(&self) -> usize {
        *self.speech_calls.lock().unwrap()
    }

    fn deck(&self) -> String {
        let slides: Vec<String> = (1..=self.deck_slides)
            .map(|i| format!("# Slide {i}\n\n- point {i}"))
            .collect();
        format!("```markdown\n---\nmarp: true\n---\n\n{}\n```", slides.join("\n\n---\n\n"))
    }

    fn speaker_text(&self) -> String {
        (1..=self.deck_slides)
            .map(|i| format!("{}\nNarration for slide {i}.\n", speaker_delimiter(i)))
            .collect()
    }
}

#[async_trait]
impl AiActionClient for ScriptedAi {
    async fn invoke(&self, action: AiAction) -> Result<AiResponse, AiContractError> {
        action.validate()?;
        match action {
            AiAction::ExtractPageText { image_base64, .. } => {
                let label = String::from_utf8(STANDARD.decode(&image_base64).unwrap()).unwrap();
                if self.failing_pages.contains(&label) {
                    Ok(AiResponse::failure("llm_error", format!("model refused {label}")))
                } else {
                    Ok(AiResponse::text(format!("Text of {label}"), None))
                }
            }
            AiAction::GenerateText { prompt } => {
                self.prompts.lock().unwrap().push(prompt.clone());
                let answer = if prompt.starts_with("Create a presentation") {
                    self.deck()
                } else if prompt.starts_with("Write the speaker text") {
                    self.speaker_text()
                } else {
                    format!("Refined course:\n{prompt}")
                };
                Ok(AiResponse::text(answer, None))
            }
            AiAction::TextToSpeech { .. } => {
                *self.speech_calls.lock().unwrap() += 1;
                if self.panic_on_speech {
                    panic!("speech backend crashed");
                }
                if self.fail_speech {
                    Ok(AiResponse::failure("rate_limited", "speech quota exceeded"))
                } else {
                    Ok(AiResponse::audio(b"ID3\x04fake".to_vec()))
                }
            }
        }
    }
}

// ── External tools ──────────────────────────────────────────────────────────

/// Pretends to be marp and ffmpeg by creating the files they would write.
#[derive(Default)]
pub struct FakeRunner {
    pub fail_marp: bool,
    invocations: Mutex<Vec<ToolInvocation>>,
}

impl FakeRunner {
    pub fn failing_marp() -> Self {
        Self {
            fail_marp: true,
            ..Default::default()
        }
    }

    pub fn invocations(&self) -> Vec<ToolInvocation> {
        self.invocations.lock().unwrap().clone()
    }

    /// Invocations of the program whose file name is `name`.
    pub fn calls_to(&self, name: &str) -> Vec<ToolInvocation> {
        self.invocations()
            .into_iter()
            .filter(|i| i.program.file_name().and_then(|n| n.to_str()) == Some(name))
            .collect()
    }

    fn marp(&self, inv: &ToolInvocation) -> RawOutput {
        if self.fail_marp {
            return RawOutput {
                exit_code: Some(1),
                stdout: String::new(),
                stderr: "[  ERROR ] Failed converting Markdown: Chromium not found".into(),
            };
        }
        let deck = std::fs::read_to_string(&inv.args[0]).unwrap();
        let out = arg_after(inv, "-o");
        let dir = out.parent().unwrap();
        for n in 1..=count_slides(&deck) {
            std::fs::write(dir.join(format!("slide.{n:03}.png")), b"\x89PNG").unwrap();
        }
        ok()
    }

    fn ffmpeg(&self, inv: &ToolInvocation) -> RawOutput {
        if inv.args.iter().any(|a| a == "concat") {
            let list = arg_after(inv, "-i");
            assert!(list.exists(), "concat list must be written first");
        }
        let output = PathBuf::from(inv.args.last().unwrap());
        std::fs::write(output, b"mp4").unwrap();
        ok()
    }
}

fn arg_after(inv: &ToolInvocation, flag: &str) -> PathBuf {
    let pos = inv.args.iter().position(|a| a == flag).unwrap();
    PathBuf::from(&inv.args[pos + 1])
}

fn ok() -> RawOutput {
    RawOutput {
        exit_code: Some(0),
        ..Default::default()
    }
}

#[async_trait]
impl ProcessRunner for FakeRunner {
    async fn run(&self, invocation: &ToolInvocation) -> Result<RawOutput, RunnerError> {
        self.invocations.lock().unwrap().push(invocation.clone());
        let name = invocation
            .program
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        Ok(match name {
            "marp" => self.marp(invocation),
            "ffmpeg" => self.ffmpeg(invocation),
            other => panic!("unexpected program {other}"),
        })
    }
}

// ── Delivery ────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// A file store that is always down.
pub struct FailingPublisher;

#[async_trait]
impl Publisher for FailingPublisher {
    async fn publish(
        &self,
        local: &Path,
        _ctx: &RunContext,
        _file_name: &str,
    ) -> Result<String, PublishError> {
        Err(PublishError::Store {
            path: local.to_path_buf(),
            source: std::io::Error::other("file store unavailable"),
        })
    }
}

// ── Harness ─────────────────────────────────────────────────────────────────

pub struct Harness {
    pub tmp: TempDir,
    pub ai: Arc<ScriptedAi>,
    pub runner: Arc<FakeRunner>,
    pub notifier: Arc<RecordingNotifier>,
    pub pipeline: Pipeline,
}

impl Harness {
    pub fn new(ai: ScriptedAi, runner: FakeRunner) -> Self {
        Self::with_publisher(ai, runner, None)
    }

    pub fn with_publisher(
        ai: ScriptedAi,
        runner: FakeRunner,
        publisher: Option<Arc<dyn Publisher>>,
    ) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let ai = Arc::new(ai);
        let runner = Arc::new(runner);
        let notifier = Arc::new(RecordingNotifier::default());
        let publisher = publisher
            .unwrap_or_else(|| Arc::new(LocalFilePublisher::new(tmp.path().join("files"))));

        let config = PipelineConfig::builder()
            .work_dir(tmp.path().join("work"))
            .max_concurrent_runs(2)
            .build()
            .unwrap();
        let pipeline = Pipeline::builder(config)
            .ai_client(ai.clone())
            .tool_invoker(ExternalToolInvoker::new(
                runner.clone(),
                Duration::from_secs(5),
            ))
            .publisher(publisher)
            .notifier(notifier.clone())
            .build()
            .unwrap();

        Self {
            tmp,
            ai,
            runner,
            notifier,
            pipeline,
        }
    }

    pub fn files_root(&self) -> PathBuf {
        self.tmp.path().join("files")
    }
}
