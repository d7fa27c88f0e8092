//! CLI binary for edgequake-course2video.
//!
//! A thin shim over the library crate: gathers page images and text files
//! into a `RunRequest`, maps flags to `PipelineConfig`, runs the job through
//! the worker queue and prints the report.

use anyhow::{bail, Context, Result};
use clap::Parser;
use edgequake_course2video::ai::encode::encode_image_file;
use edgequake_course2video::documents::mime_from_path;
use edgequake_course2video::{
    spawn_worker, DocumentToText, LocalFilePublisher, MailDropNotifier, Notifier, Pipeline,
    PipelineConfig, PlainTextExtractor, ProgressCallback, RunProgressCallback, RunReport,
    RunRequest, RunStatus, Stage, TracingNotifier, WebhookNotifier,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner showing the current stage, with one log line per finished stage.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Queued");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl RunProgressCallback for CliProgressCallback {
    fn on_run_start(&self, run_id: &str) {
        self.bar.set_prefix("Running");
        self.bar.set_message(dim(run_id));
    }

    fn on_stage_start(&self, _run_id: &str, stage: Stage) {
        self.bar.set_message(stage.name().to_string());
    }

    fn on_stage_complete(&self, _run_id: &str, stage: Stage, message: &str) {
        self.bar
            .println(format!("  {} {:<24} {}", green("✓"), stage.name(), dim(message)));
    }

    fn on_stage_error(&self, _run_id: &str, stage: Stage, error: &str) {
        let msg = if error.chars().count() > 100 {
            format!("{}\u{2026}", error.chars().take(99).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar
            .println(format!("  {} {:<24} {}", red("✗"), stage.name(), red(&msg)));
    }

    fn on_run_complete(&self, _run_id: &str, _status: RunStatus) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # One PDF (pages exported as images) plus lecture notes
  course2video --pdf-images pages/ --text notes.txt --course-id 42

  # Several PDFs, custom instructions
  course2video --pdf-images intro/ --pdf-images chapter1/ \
      --instructions "Keep it short, for first-year students" --course-id 42

  # Job file as queued by a host platform
  course2video --job job.json --user-id 7 --json > report.json

  # Deliver the notification as an .eml file
  course2video --job job.json --mail-dir ./outbox

JOB FILE:
  {
    "course_id": 42,
    "instructions": "optional refinement instructions",
    "pdf_page_image_sets": { "lecture.pdf": ["<base64 png>", "..."] },
    "source_texts": ["plain text of a label or page", "..."]
  }

EXTERNAL TOOLS:
  marp     npm install -g @marp-team/marp-cli
  ffmpeg   any recent build with libx264 and aac

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          API key for the LLM and the speech endpoint
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  RUST_LOG                Log filter (overrides --verbose/--quiet)
"#;

/// Turn course documents into a narrated slide video.
#[derive(Parser, Debug)]
#[command(
    name = "course2video",
    version,
    about = "Turn course documents into a narrated slide video",
    long_about = "Extract course content from PDF page images and text files with a vision LLM, \
rewrite it as a Marp slide deck, narrate every slide with text-to-speech and assemble an MP4 \
with ffmpeg.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Directory of page images (png/jpg) of one PDF, in file-name order. Repeatable.
    #[arg(long = "pdf-images", value_name = "DIR")]
    pdf_images: Vec<PathBuf>,

    /// Plain text file to include after the PDFs. Repeatable.
    #[arg(long = "text", value_name = "FILE")]
    texts: Vec<PathBuf>,

    /// JSON job file (RunRequest); --pdf-images and --text add to it.
    #[arg(long, value_name = "FILE")]
    job: Option<PathBuf>,

    /// Refinement instructions. Empty uses the built-in default.
    #[arg(long, env = "C2V_INSTRUCTIONS")]
    instructions: Option<String>,

    /// Course the content belongs to.
    #[arg(long, env = "C2V_COURSE_ID")]
    course_id: Option<i64>,

    /// User who requested the run and receives the video.
    #[arg(long, env = "C2V_USER_ID", default_value_t = 0)]
    user_id: i64,

    /// Root for per-run working directories.
    #[arg(long, env = "C2V_WORK_DIR")]
    work_dir: Option<PathBuf>,

    /// Marp CLI executable.
    #[arg(long, env = "C2V_MARP", default_value = "marp")]
    marp: PathBuf,

    /// ffmpeg executable.
    #[arg(long, env = "C2V_FFMPEG", default_value = "ffmpeg")]
    ffmpeg: PathBuf,

    /// Slide image scale (1–4).
    #[arg(long, env = "C2V_IMAGE_SCALE", default_value_t = 2,
          value_parser = clap::value_parser!(u32).range(1..=4))]
    image_scale: u32,

    /// Concurrent page-extraction calls.
    #[arg(short, long, env = "C2V_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// LLM model ID.
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Max LLM output tokens per call.
    #[arg(long, env = "C2V_MAX_TOKENS", default_value_t = 8192)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "C2V_TEMPERATURE", default_value_t = 0.2)]
    temperature: f32,

    /// Retries per AI call.
    #[arg(long, env = "C2V_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Per AI call timeout in seconds.
    #[arg(long, env = "C2V_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Per marp/ffmpeg invocation timeout in seconds.
    #[arg(long, env = "C2V_TOOL_TIMEOUT", default_value_t = 600)]
    tool_timeout: u64,

    /// OpenAI-compatible speech endpoint base URL.
    #[arg(long, env = "C2V_TTS_BASE_URL")]
    tts_base_url: Option<String>,

    /// Text-to-speech model.
    #[arg(long, env = "C2V_TTS_MODEL")]
    tts_model: Option<String>,

    /// Text-to-speech voice.
    #[arg(long, env = "C2V_TTS_VOICE")]
    tts_voice: Option<String>,

    /// Base URL of the course platform, for links in the notification.
    #[arg(long, env = "C2V_COURSE_BASE_URL")]
    course_base_url: Option<String>,

    /// Where published videos are stored. Default: <work-dir>/published.
    #[arg(long, env = "C2V_PUBLISH_DIR")]
    publish_dir: Option<PathBuf>,

    /// Public base URL of --publish-dir.
    #[arg(long, env = "C2V_PUBLIC_BASE_URL")]
    public_base_url: Option<String>,

    /// Write the notification as an .eml file into this directory.
    #[arg(long, env = "C2V_MAIL_DIR", conflicts_with = "webhook_url")]
    mail_dir: Option<PathBuf>,

    /// POST the notification as JSON to this URL.
    #[arg(long, env = "C2V_WEBHOOK_URL")]
    webhook_url: Option<String>,

    /// Print the run report as JSON.
    #[arg(long, env = "C2V_JSON")]
    json: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "C2V_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "C2V_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and the report.
    #[arg(short, long, env = "C2V_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build request ────────────────────────────────────────────────────
    let request = build_request(&cli).await?;
    if request.pdf_page_image_sets.is_empty() && request.source_texts.is_empty() {
        bail!("nothing to do: pass --pdf-images, --text or a --job with content");
    }

    // ── Build pipeline ───────────────────────────────────────────────────
    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn RunProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress)?;

    let publish_root = cli
        .publish_dir
        .clone()
        .unwrap_or_else(|| config.work_dir.join("published"));
    let mut publisher = LocalFilePublisher::new(publish_root);
    if let Some(ref base) = cli.public_base_url {
        publisher = publisher.with_public_base_url(base);
    }

    let notifier: Arc<dyn Notifier> = if let Some(ref dir) = cli.mail_dir {
        Arc::new(MailDropNotifier::new(dir))
    } else if let Some(ref url) = cli.webhook_url {
        Arc::new(
            WebhookNotifier::new(url, Duration::from_secs(30))
                .context("Failed to set up webhook notifier")?,
        )
    } else {
        Arc::new(TracingNotifier)
    };

    let pipeline = Pipeline::builder(config)
        .publisher(Arc::new(publisher))
        .notifier(notifier)
        .build()
        .context("Failed to set up pipeline")?;

    // ── Run ──────────────────────────────────────────────────────────────
    let (queue, mut worker) = spawn_worker(pipeline, 1);
    let run_id = queue
        .submit(request, cli.user_id)
        .await
        .context("Failed to queue run")?;
    drop(queue);
    if !cli.quiet && !cli.json {
        eprintln!("{} run {}", bold("◆"), dim(run_id.as_str()));
    }

    let report = worker
        .next_report()
        .await
        .context("Worker stopped without a report")?;
    worker.join().await;

    print_report(&cli, &report)?;
    if !report.succeeded() {
        std::process::exit(1);
    }
    Ok(())
}

fn print_report(cli: &Cli, report: &RunReport) -> Result<()> {
    if cli.json {
        let json = serde_json::to_string_pretty(report).context("Failed to serialise report")?;
        println!("{json}");
        return Ok(());
    }

    if !cli.quiet {
        println!("{}", report.render_lines());
    }
    match report.video_url {
        Some(ref url) => eprintln!(
            "{}  {}  {}ms",
            green("✔"),
            bold(url),
            report.duration_ms
        ),
        None => eprintln!(
            "{}  run failed after {}ms",
            red("✘"),
            report.duration_ms
        ),
    }
    Ok(())
}

/// Merge the job file with page-image directories and text files.
async fn build_request(cli: &Cli) -> Result<RunRequest> {
    let mut request = match cli.job {
        Some(ref path) => {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read job file {:?}", path))?;
            serde_json::from_str::<RunRequest>(&raw)
                .with_context(|| format!("Invalid job file {:?}", path))?
        }
        None => RunRequest::default(),
    };

    for dir in &cli.pdf_images {
        let images = load_page_images(dir).await?;
        let source_id = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.display().to_string());
        request.pdf_page_image_sets.insert(source_id, images);
    }

    for path in &cli.texts {
        let text = PlainTextExtractor
            .extract(path, mime_from_path(path))
            .await
            .with_context(|| format!("Failed to read text from {:?}", path))?;
        request.source_texts.push(text);
    }

    if let Some(ref instructions) = cli.instructions {
        request.instructions = instructions.clone();
    }
    if let Some(course_id) = cli.course_id {
        request.course_id = course_id;
    }
    Ok(request)
}

/// Base64 PNG of every image in `dir`, sorted by file name.
async fn load_page_images(dir: &Path) -> Result<Vec<String>> {
    let mut paths = Vec::new();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to list {:?}", dir))?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| matches!(e.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg"))
            .unwrap_or(false);
        if is_image {
            paths.push(path);
        }
    }
    paths.sort();
    if paths.is_empty() {
        bail!("no page images found in {:?}", dir);
    }

    let encoded = tokio::task::spawn_blocking(move || {
        paths
            .iter()
            .map(|p| encode_image_file(p).with_context(|| format!("Failed to load {:?}", p)))
            .collect::<Result<Vec<_>>>()
    })
    .await
    .context("Image loading task failed")??;
    Ok(encoded)
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .marp_path(&cli.marp)
        .ffmpeg_path(&cli.ffmpeg)
        .image_scale(cli.image_scale)
        .extract_concurrency(cli.concurrency)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .max_retries(cli.max_retries)
        .ai_timeout_secs(cli.api_timeout)
        .tool_timeout_secs(cli.tool_timeout)
        .max_concurrent_runs(1);

    if let Some(ref dir) = cli.work_dir {
        builder = builder.work_dir(dir);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref url) = cli.tts_base_url {
        builder = builder.tts_base_url(url);
    }
    if let Some(ref model) = cli.tts_model {
        builder = builder.tts_model(model);
    }
    if let Some(ref voice) = cli.tts_voice {
        builder = builder.tts_voice(voice);
    }
    if let Some(ref url) = cli.course_base_url {
        builder = builder.course_base_url(url);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
