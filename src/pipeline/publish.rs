//! Stage 10: hand the assembled video to the publisher.

use super::StageOutput;
use crate::error::PipelineError;
use crate::model::{RunContext, VideoArtifact};
use crate::publish::Publisher;

/// Published name of a run's video: `course{id}_video_{timestamp}.mp4`.
pub fn video_file_name(ctx: &RunContext) -> String {
    format!("course{}_video_{}.mp4", ctx.course_id, ctx.timestamp())
}

/// Returns the durable URL of the published video.
pub async fn publish_video(
    ctx: &RunContext,
    publisher: &dyn Publisher,
    video: &VideoArtifact,
) -> Result<StageOutput<String>, PipelineError> {
    let name = video_file_name(ctx);
    let url = publisher.publish(&video.path, ctx, &name).await?;
    let report = format!("Video published as {name}: {url}");
    Ok(StageOutput::new(url, report))
}
