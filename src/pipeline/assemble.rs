//! Stage 9: encode slide/audio pairs into clips and join them into one MP4.
//!
//! Preconditions are checked before the encoder is started: `slide_1.png`
//! must exist, and every slide `n` up to the last contiguous slide needs its
//! `audio_{n}.mp3`.

use super::StageOutput;
use crate::artifacts::ArtifactStore;
use crate::error::PipelineError;
use crate::model::{
    audio_file_name, slide_file_name, ArtifactKind, NarrationSet, RenderedAssets, RunContext,
    VideoArtifact,
};
use crate::tools::ExternalToolInvoker;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// File name of the assembled video inside the run's video directory.
pub const FINAL_VIDEO_NAME: &str = "final.mp4";

/// Number of contiguous, complete slide/audio pairs, starting at 1.
pub async fn check_pairs(images_dir: &Path, audio_dir: &Path) -> Result<usize, PipelineError> {
    let mut count = 0;
    while tokio::fs::try_exists(images_dir.join(slide_file_name(count + 1)))
        .await
        .unwrap_or(false)
    {
        count += 1;
    }
    if count == 0 {
        return Err(PipelineError::ArtifactMissing {
            kind: ArtifactKind::Images,
            index: 1,
        });
    }

    for n in 1..=count {
        let exists = tokio::fs::try_exists(audio_dir.join(audio_file_name(n)))
            .await
            .unwrap_or(false);
        if !exists {
            return Err(PipelineError::ArtifactMissing {
                kind: ArtifactKind::Audio,
                index: n,
            });
        }
    }

    if tokio::fs::try_exists(audio_dir.join(audio_file_name(count + 1)))
        .await
        .unwrap_or(false)
    {
        warn!(slides = count, "more audio clips than slides; extra clips are ignored");
    }
    Ok(count)
}

/// Encoder arguments for one still-image clip.
pub fn clip_args(slide: &Path, audio: &Path, clip: &Path) -> Vec<String> {
    let mut args: Vec<String> = ["-y", "-loop", "1", "-i"].map(String::from).into();
    args.push(slide.display().to_string());
    args.push("-i".into());
    args.push(audio.display().to_string());
    args.extend(
        [
            "-c:v", "libx264", "-tune", "stillimage", "-c:a", "aac", "-b:a", "192k", "-pix_fmt",
            "yuv420p", "-shortest",
        ]
        .map(String::from),
    );
    args.push(clip.display().to_string());
    args
}

/// Encoder arguments for a stream-copy concatenation.
pub fn concat_args(list: &Path, output: &Path) -> Vec<String> {
    vec![
        "-y".into(),
        "-f".into(),
        "concat".into(),
        "-safe".into(),
        "0".into(),
        "-i".into(),
        list.display().to_string(),
        "-c".into(),
        "copy".into(),
        output.display().to_string(),
    ]
}

/// Concat-demuxer list: one `file '<path>'` line per clip.
pub fn concat_list(clips: &[PathBuf]) -> String {
    clips
        .iter()
        .map(|c| format!("file '{}'\n", c.display().to_string().replace('\'', r"'\''")))
        .collect()
}

pub async fn assemble_video(
    ctx: &RunContext,
    tools: &ExternalToolInvoker,
    store: &ArtifactStore,
    rendered: &RenderedAssets,
    narration: &NarrationSet,
) -> Result<StageOutput<VideoArtifact>, PipelineError> {
    let count = check_pairs(&rendered.dir, &narration.dir).await?;
    let video_dir = store.allocate(&ctx.run_id, ArtifactKind::Video).await?;
    let ffmpeg = &ctx.config.ffmpeg_path;
    info!(run_id = %ctx.run_id, clips = count, "assembling video");

    let mut clips = Vec::with_capacity(count);
    for n in 1..=count {
        let clip = video_dir.join(format!("clip_{n}.mp4"));
        let args = clip_args(&rendered.slide(n), &narration.clip(n), &clip);
        tools.run("ffmpeg", ffmpeg, &args, &[]).await?;
        clips.push(clip);
    }

    let output = video_dir.join(FINAL_VIDEO_NAME);
    if clips.len() > 1 {
        let list = video_dir.join("clips.txt");
        tokio::fs::write(&list, concat_list(&clips))
            .await
            .map_err(|e| PipelineError::io(&list, e))?;
        tools
            .run("ffmpeg", ffmpeg, &concat_args(&list, &output), &[])
            .await?;
    } else {
        tokio::fs::rename(&clips[0], &output)
            .await
            .map_err(|e| PipelineError::io(&clips[0], e))?;
    }

    if !tokio::fs::try_exists(&output).await.unwrap_or(false) {
        return Err(PipelineError::ArtifactMissing {
            kind: ArtifactKind::Video,
            index: 1,
        });
    }

    Ok(StageOutput::new(
        VideoArtifact {
            path: output,
            clips: count,
        },
        format!("Assembled video from {count} clips"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"x").unwrap();
    }

    #[tokio::test]
    async fn missing_first_slide_is_no_slides() {
        let tmp = tempfile::tempdir().unwrap();
        let err = check_pairs(tmp.path(), tmp.path()).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ArtifactMissing { kind: ArtifactKind::Images, index: 1 }
        ));
    }

    #[tokio::test]
    async fn missing_audio_names_its_slide() {
        let images = tempfile::tempdir().unwrap();
        let audio = tempfile::tempdir().unwrap();
        for n in 1..=3 {
            touch(images.path(), &slide_file_name(n));
        }
        touch(audio.path(), "audio_1.mp3");
        touch(audio.path(), "audio_3.mp3");

        let err = check_pairs(images.path(), audio.path()).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ArtifactMissing { kind: ArtifactKind::Audio, index: 2 }
        ));
    }

    #[tokio::test]
    async fn complete_pairs_are_counted() {
        let images = tempfile::tempdir().unwrap();
        let audio = tempfile::tempdir().unwrap();
        for n in 1..=2 {
            touch(images.path(), &slide_file_name(n));
            touch(audio.path(), &audio_file_name(n));
        }
        touch(audio.path(), "audio_3.mp3");
        assert_eq!(check_pairs(images.path(), audio.path()).await.unwrap(), 2);
    }

    #[test]
    fn clip_args_loop_the_still_and_stop_at_shortest() {
        let args = clip_args(Path::new("s.png"), Path::new("a.mp3"), Path::new("c.mp4"));
        assert_eq!(args[..3], ["-y", "-loop", "1"]);
        assert!(args.contains(&"-shortest".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("c.mp4"));
    }

    #[test]
    fn concat_uses_stream_copy() {
        let args = concat_args(Path::new("list.txt"), Path::new("out.mp4"));
        let joined = args.join(" ");
        assert!(joined.contains("-f concat -safe 0 -i list.txt -c copy out.mp4"));
    }

    #[test]
    fn concat_list_quotes_paths() {
        let list = concat_list(&[PathBuf::from("/w/clip_1.mp4"), PathBuf::from("/w/it's.mp4")]);
        assert_eq!(list, "file '/w/clip_1.mp4'\nfile '/w/it'\\''s.mp4'\n");
    }
}
