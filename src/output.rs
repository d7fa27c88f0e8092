//! Run results: stages, the run state machine, and the [`RunReport`].

use crate::model::{CourseContent, RunId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    ExtractPdfPages,
    AppendSourceTexts,
    ContentPresenceCheck,
    RefineContent,
    BuildSlideDeck,
    RenderImages,
    GenerateSpeakerText,
    SynthesizeAudio,
    AssembleVideo,
    Publish,
    Cleanup,
}

impl Stage {
    /// Stable name used in logs and reports.
    pub fn name(self) -> &'static str {
        match self {
            Stage::ExtractPdfPages => "extract-pdf-pages",
            Stage::AppendSourceTexts => "append-source-texts",
            Stage::ContentPresenceCheck => "content-presence-check",
            Stage::RefineContent => "refine-content",
            Stage::BuildSlideDeck => "build-slide-deck",
            Stage::RenderImages => "render-images",
            Stage::GenerateSpeakerText => "generate-speaker-text",
            Stage::SynthesizeAudio => "synthesize-audio",
            Stage::AssembleVideo => "assemble-video",
            Stage::Publish => "publish",
            Stage::Cleanup => "cleanup",
        }
    }

    /// The run state entered when this stage starts.
    pub fn state(self) -> RunState {
        match self {
            Stage::ExtractPdfPages | Stage::AppendSourceTexts | Stage::ContentPresenceCheck => {
                RunState::Extracting
            }
            Stage::RefineContent => RunState::Refining,
            Stage::BuildSlideDeck => RunState::BuildingSlides,
            Stage::RenderImages => RunState::RenderingImages,
            Stage::GenerateSpeakerText => RunState::GeneratingSpeakerText,
            Stage::SynthesizeAudio => RunState::SynthesizingAudio,
            Stage::AssembleVideo => RunState::AssemblingVideo,
            Stage::Publish => RunState::Publishing,
            Stage::Cleanup => RunState::CleaningUp,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Final verdict of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
}

/// Lifecycle of a run. Transitions only move forward; a failure jumps
/// straight to `CleaningUp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "status")]
pub enum RunState {
    Pending,
    Extracting,
    Refining,
    BuildingSlides,
    RenderingImages,
    GeneratingSpeakerText,
    SynthesizingAudio,
    AssemblingVideo,
    Publishing,
    CleaningUp,
    Notified(RunStatus),
}

impl RunState {
    /// Whether moving from `self` to `next` respects the state machine.
    pub fn can_advance_to(self, next: RunState) -> bool {
        match (self, next) {
            (RunState::Notified(_), _) => false,
            (RunState::CleaningUp, RunState::Notified(_)) => true,
            (_, RunState::CleaningUp) => true,
            (current, next) => next >= current && !matches!(next, RunState::Notified(_)),
        }
    }
}

/// One line of the report: what a stage did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: Stage,
    pub success: bool,
    pub message: String,
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = if self.success { "OK" } else { "FAILED" };
        write!(f, "[{}] {}: {}", mark, self.stage, self.message)
    }
}

/// The human-readable record of one run, delivered by notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub course_id: i64,
    pub user_id: i64,
    pub instructions: String,
    pub outcomes: Vec<StageOutcome>,
    pub status: RunStatus,
    pub state: RunState,
    /// URL of the published video, when publishing succeeded.
    pub video_url: Option<String>,
    /// Most recent generated content, whatever stage it came from.
    pub content: Option<CourseContent>,
    /// Speaker text, if that stage was reached.
    pub speaker_text: Option<String>,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    /// Stages that were attempted, in order.
    pub fn attempted_stages(&self) -> Vec<Stage> {
        self.outcomes.iter().map(|o| o.stage).collect()
    }

    /// Outcome line for a stage, if it was attempted.
    pub fn outcome(&self, stage: Stage) -> Option<&StageOutcome> {
        self.outcomes.iter().find(|o| o.stage == stage)
    }

    /// The report body: one line per attempted stage.
    pub fn render_lines(&self) -> String {
        self.outcomes
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_moves_forward_only() {
        assert!(RunState::Pending.can_advance_to(RunState::Extracting));
        assert!(RunState::Refining.can_advance_to(RunState::BuildingSlides));
        assert!(!RunState::BuildingSlides.can_advance_to(RunState::Refining));
    }

    #[test]
    fn any_state_can_jump_to_cleanup() {
        assert!(RunState::Extracting.can_advance_to(RunState::CleaningUp));
        assert!(RunState::Publishing.can_advance_to(RunState::CleaningUp));
    }

    #[test]
    fn notification_only_follows_cleanup() {
        assert!(!RunState::Publishing.can_advance_to(RunState::Notified(RunStatus::Succeeded)));
        assert!(RunState::CleaningUp.can_advance_to(RunState::Notified(RunStatus::Failed)));
        assert!(!RunState::Notified(RunStatus::Failed).can_advance_to(RunState::CleaningUp));
    }

    #[test]
    fn notified_states_rank_after_every_stage() {
        assert!(RunState::CleaningUp < RunState::Notified(RunStatus::Succeeded));
        assert!(RunState::Notified(RunStatus::Succeeded) < RunState::Notified(RunStatus::Failed));
        assert!(!RunState::Notified(RunStatus::Succeeded)
            .can_advance_to(RunState::Notified(RunStatus::Failed)));
    }

    #[test]
    fn outcome_display_marks_failures() {
        let o = StageOutcome {
            stage: Stage::RenderImages,
            success: false,
            message: "marp exited 1".into(),
        };
        assert_eq!(o.to_string(), "[FAILED] render-images: marp exited 1");
    }
}
