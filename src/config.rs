//! Configuration for course-to-video runs.
//!
//! Every knob lives in [`PipelineConfig`], built through
//! [`PipelineConfigBuilder`]. A run holds the config behind an `Arc` inside
//! its [`crate::model::RunContext`], so all stages of all concurrent runs
//! read the same immutable settings.

use crate::error::PipelineError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for the content pipeline.
///
/// # Example
/// ```rust
/// use edgequake_course2video::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .marp_path("/usr/local/bin/marp")
///     .image_scale(2)
///     .tool_timeout_secs(300)
///     .build()
///     .unwrap();
/// assert_eq!(config.image_scale, 2);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Root for per-run working directories. Default: `$TMPDIR/course2video`.
    pub work_dir: PathBuf,

    /// Marp CLI executable. Default: `marp` (resolved through `PATH`).
    pub marp_path: PathBuf,

    /// ffmpeg executable. Default: `ffmpeg`.
    pub ffmpeg_path: PathBuf,

    /// Slide image scale factor passed to the renderer. Range: 1–4. Default: 2.
    pub image_scale: u32,

    /// Number of concurrent page-extraction calls. Default: 4.
    ///
    /// Results are re-ordered by page before numbering, so this never changes
    /// the produced text.
    pub extract_concurrency: usize,

    /// LLM model identifier. If None, uses the provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for text generation. Default: 0.2.
    pub temperature: f32,

    /// Maximum tokens per generated answer. Default: 8192.
    ///
    /// Slide decks and speaker scripts for long courses are several thousand
    /// tokens; a low cap truncates the last slides.
    pub max_tokens: usize,

    /// Retries of a failing AI call inside the client. Default: 3, at most 10.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-AI-call timeout in seconds. Default: 120.
    pub ai_timeout_secs: u64,

    /// Per-external-process timeout in seconds. Default: 600.
    pub tool_timeout_secs: u64,

    /// Prompt sent with every PDF page image. If None, uses the built-in default.
    pub extraction_prompt: Option<String>,

    /// Refinement instruction used when the requester gave none.
    pub default_instruction: Option<String>,

    /// Base URL of the OpenAI-compatible speech endpoint.
    pub tts_base_url: String,

    /// Text-to-speech model. Default: "tts-1".
    pub tts_model: String,

    /// Text-to-speech voice. Default: "alloy".
    pub tts_voice: String,

    /// Base URL of the host course platform, used for links in notifications.
    pub course_base_url: String,

    /// Maximum number of runs the worker executes at once. Default: 2.
    pub max_concurrent_runs: usize,

    /// Optional stage progress observer.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir().join("course2video"),
            marp_path: PathBuf::from("marp"),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            image_scale: 2,
            extract_concurrency: 4,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.2,
            max_tokens: 8192,
            max_retries: 3,
            retry_backoff_ms: 500,
            ai_timeout_secs: 120,
            tool_timeout_secs: 600,
            extraction_prompt: None,
            default_instruction: None,
            tts_base_url: "https://api.openai.com/v1".to_string(),
            tts_model: "tts-1".to_string(),
            tts_voice: "alloy".to_string(),
            course_base_url: "http://localhost".to_string(),
            max_concurrent_runs: 2,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("work_dir", &self.work_dir)
            .field("marp_path", &self.marp_path)
            .field("ffmpeg_path", &self.ffmpeg_path)
            .field("image_scale", &self.image_scale)
            .field("extract_concurrency", &self.extract_concurrency)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("ai_timeout_secs", &self.ai_timeout_secs)
            .field("tool_timeout_secs", &self.tool_timeout_secs)
            .field("tts_model", &self.tts_model)
            .field("tts_voice", &self.tts_voice)
            .field("course_base_url", &self.course_base_url)
            .field("max_concurrent_runs", &self.max_concurrent_runs)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Link to the course page, as shown in notifications.
    pub fn course_url(&self, course_id: i64) -> String {
        format!(
            "{}/course/view.php?id={}",
            self.course_base_url.trim_end_matches('/'),
            course_id
        )
    }
}

/// Builder for [`PipelineConfig`].
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl fmt::Debug for PipelineConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl PipelineConfigBuilder {
    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.work_dir = dir.into();
        self
    }

    pub fn marp_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.marp_path = path.into();
        self
    }

    pub fn ffmpeg_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.ffmpeg_path = path.into();
        self
    }

    pub fn image_scale(mut self, scale: u32) -> Self {
        self.config.image_scale = scale.clamp(1, 4);
        self
    }

    pub fn extract_concurrency(mut self, n: usize) -> Self {
        self.config.extract_concurrency = n.max(1);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n.min(10);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn ai_timeout_secs(mut self, secs: u64) -> Self {
        self.config.ai_timeout_secs = secs;
        self
    }

    pub fn tool_timeout_secs(mut self, secs: u64) -> Self {
        self.config.tool_timeout_secs = secs;
        self
    }

    pub fn extraction_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.extraction_prompt = Some(prompt.into());
        self
    }

    pub fn default_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.config.default_instruction = Some(instruction.into());
        self
    }

    pub fn tts_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.tts_base_url = url.into();
        self
    }

    pub fn tts_model(mut self, model: impl Into<String>) -> Self {
        self.config.tts_model = model.into();
        self
    }

    pub fn tts_voice(mut self, voice: impl Into<String>) -> Self {
        self.config.tts_voice = voice.into();
        self
    }

    pub fn course_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.course_base_url = url.into();
        self
    }

    pub fn max_concurrent_runs(mut self, n: usize) -> Self {
        self.config.max_concurrent_runs = n.max(1);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if c.ai_timeout_secs == 0 || c.tool_timeout_secs == 0 {
            return Err(PipelineError::InvalidConfig(
                "Timeouts must be ≥ 1 second".into(),
            ));
        }
        if c.marp_path.as_os_str().is_empty() || c.ffmpeg_path.as_os_str().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "Executable paths must not be empty".into(),
            ));
        }
        if c.work_dir.as_os_str().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "Work directory must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_renderer_contract() {
        let c = PipelineConfig::default();
        assert_eq!(c.image_scale, 2);
        assert_eq!(c.marp_path, PathBuf::from("marp"));
        assert_eq!(c.ffmpeg_path, PathBuf::from("ffmpeg"));
    }

    #[test]
    fn setters_clamp_out_of_range_values() {
        let c = PipelineConfig::builder()
            .image_scale(9)
            .extract_concurrency(0)
            .temperature(5.0)
            .max_retries(500)
            .build()
            .unwrap();
        assert_eq!(c.image_scale, 4);
        assert_eq!(c.extract_concurrency, 1);
        assert_eq!(c.temperature, 2.0);
        assert_eq!(c.max_retries, 10);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = PipelineConfig::builder().tool_timeout_secs(0).build();
        assert!(matches!(err, Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn course_url_has_no_double_slash() {
        let c = PipelineConfig::builder()
            .course_base_url("https://lms.example.org/")
            .build()
            .unwrap();
        assert_eq!(
            c.course_url(42),
            "https://lms.example.org/course/view.php?id=42"
        );
    }
}
