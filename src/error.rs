//! Error types for the edgequake-course2video library.
//!
//! Three layers of failure exist and each has its own type:
//!
//! * [`PipelineError`]: **Stage-fatal**: the stage that raised it cannot
//!   produce its output, so the run stops. The orchestrator catches every
//!   `PipelineError`, turns it into a report line and still runs cleanup and
//!   notification; it is never propagated past [`crate::Pipeline::run`].
//!
//! * [`PageError`]: **Non-fatal**: a single PDF page could not be
//!   transcribed. Extraction tallies these and continues with the remaining
//!   pages, the same way a partial conversion keeps its good pages.
//!
//! * Contract errors ([`AiContractError`], [`DocumentError`],
//!   [`PublishError`], [`NotifyError`]): raised by collaborators at their
//!   interface boundary and mapped into a `PipelineError` by the calling stage.

use crate::model::ArtifactKind;
use std::path::PathBuf;
use thiserror::Error;

/// Stage-fatal errors. Any of these stops forward progress of a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Remote AI ─────────────────────────────────────────────────────────
    /// The AI backend answered, but the action did not succeed.
    #[error("AI action '{kind}' failed [{error_code}]: {message}")]
    AiActionFailure {
        kind: String,
        error_code: String,
        message: String,
    },

    /// The request handed to the AI client was malformed.
    #[error(transparent)]
    AiContract(#[from] AiContractError),

    // ── External executables ──────────────────────────────────────────────
    /// Renderer or encoder exited non-zero, timed out, or could not start.
    #[error("{tool} failed (exit code {}):\n{output}", exit_code.map_or_else(|| "none".to_string(), |c| c.to_string()))]
    ExternalToolFailure {
        tool: String,
        exit_code: Option<i32>,
        output: String,
    },

    // ── Artifacts ─────────────────────────────────────────────────────────
    /// A slide image or audio clip expected at assembly time is absent.
    #[error("{}", describe_missing(*kind, *index))]
    ArtifactMissing { kind: ArtifactKind, index: usize },

    /// Extraction and append stages produced nothing but whitespace.
    #[error("No content could be extracted from the selected sources")]
    NoContentExtracted,

    /// The final video could not be stored in the user's file area.
    #[error("Publishing the video failed: {0}")]
    PublishFailure(#[from] PublishError),

    /// Local file-system operation failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Control ───────────────────────────────────────────────────────────
    /// The run was cancelled between two stages.
    #[error("Run cancelled before stage '{stage}'")]
    Cancelled { stage: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn describe_missing(kind: ArtifactKind, index: usize) -> String {
    match (kind, index) {
        (ArtifactKind::Images, 1) => "No slides found: slide_1.png is missing".to_string(),
        (ArtifactKind::Audio, n) => format!("Missing audio for slide {n}: audio_{n}.mp3 not found"),
        (kind, n) => format!("Missing {kind} artifact #{n}"),
    }
}

impl PipelineError {
    /// Shorthand for wrapping an `io::Error` with the path it concerned.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }
}

/// A non-fatal failure for one PDF page.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// The AI backend could not transcribe the page.
    #[error("Page {page} of '{source_id}': {detail}")]
    ExtractionFailed {
        source_id: String,
        page: usize,
        detail: String,
    },
}

/// A malformed request to the AI client. Remote failures are *not* errors;
/// they come back as `AiResponse { success: false, .. }`.
#[derive(Debug, Error)]
pub enum AiContractError {
    #[error("AI action '{kind}' requires a non-empty {field}")]
    EmptyPayload { kind: String, field: &'static str },

    #[error("Page image is not valid base64: {0}")]
    InvalidImage(String),

    #[error("AI provider is not configured: {0}")]
    ProviderNotConfigured(String),
}

/// Failures of the document-to-text collaborator.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// The MIME type is outside the allow-list or has no extractor.
    #[error("Text extraction not available for MIME type '{mime}'")]
    NotAvailable { mime: String },

    #[error("Failed to read document '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures of the course-file publishing collaborator.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Source video '{path}' does not exist")]
    SourceMissing { path: PathBuf },

    #[error("Failed to store '{path}': {source}")]
    Store {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures of the notification collaborator.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Failed to write notification '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Webhook delivery failed: {0}")]
    Webhook(String),
}
