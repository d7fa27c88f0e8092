//! Stage 6: render the slide deck to PNG images with the Marp CLI.
//!
//! Marp writes `slide.001.png`, `slide.002.png`, … for `-o slide.png`.
//! [`normalize_slide_names`] then renames whatever the renderer produced into
//! the strict `slide_{n}.png` sequence the assembly stage expects. Renaming
//! is idempotent: a directory that is already correctly named is left as is.

use super::StageOutput;
use crate::artifacts::ArtifactStore;
use crate::error::PipelineError;
use crate::model::{slide_file_name, ArtifactKind, RenderedAssets, RunContext, SlideDeck};
use crate::tools::ExternalToolInvoker;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Name of the deck file inside the run's markdown directory.
pub const DECK_FILE_NAME: &str = "slides.md";

static RE_SLIDE_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+)\.png$").expect("valid regex"));

/// Build the renderer arguments for `input` → `<out_dir>/slide.png`.
pub fn marp_args(input: &Path, out_dir: &Path, image_scale: u32) -> Vec<String> {
    vec![
        input.display().to_string(),
        "--images".into(),
        "png".into(),
        "--image-scale".into(),
        image_scale.to_string(),
        "-o".into(),
        out_dir.join("slide.png").display().to_string(),
    ]
}

pub async fn render_images(
    ctx: &RunContext,
    tools: &ExternalToolInvoker,
    store: &ArtifactStore,
    deck: &SlideDeck,
) -> Result<StageOutput<RenderedAssets>, PipelineError> {
    let deck_path = store
        .file(&ctx.run_id, ArtifactKind::Markdown, DECK_FILE_NAME)
        .await?;
    tokio::fs::write(&deck_path, &deck.markup)
        .await
        .map_err(|e| PipelineError::io(&deck_path, e))?;

    let images_dir = store.allocate(&ctx.run_id, ArtifactKind::Images).await?;
    let args = marp_args(&deck_path, &images_dir, ctx.config.image_scale);
    info!(run_id = %ctx.run_id, "rendering slide images");
    tools
        .run("marp", &ctx.config.marp_path, &args, &[])
        .await?;

    let count = normalize_slide_names(&images_dir).await?;
    if count == 0 {
        return Err(PipelineError::ArtifactMissing {
            kind: ArtifactKind::Images,
            index: 1,
        });
    }

    Ok(StageOutput::new(
        RenderedAssets {
            dir: images_dir,
            count,
        },
        format!("Rendered {count} slide images"),
    ))
}

/// Rename the PNG files in `dir` into `slide_1.png` … `slide_{n}.png`.
///
/// Files are ordered by the last number in their name; files without a
/// number sort after numbered ones, by name. Returns the number of slides.
pub async fn normalize_slide_names(dir: &Path) -> Result<usize, PipelineError> {
    let mut found: Vec<(Option<u64>, String)> = Vec::new();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| PipelineError::io(dir, e))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| PipelineError::io(dir, e))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.to_ascii_lowercase().ends_with(".png") {
            continue;
        }
        let number = RE_SLIDE_NUMBER
            .captures(&name)
            .and_then(|c| c[1].parse::<u64>().ok());
        found.push((number, name));
    }

    found.sort_by(|a, b| match (a.0, b.0) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.1.cmp(&b.1)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.1.cmp(&b.1),
    });

    // Two phases so that a target name never overwrites a file still waiting
    // to be moved.
    let mut staged: Vec<(PathBuf, PathBuf)> = Vec::new();
    for (i, (_, name)) in found.iter().enumerate() {
        let target = slide_file_name(i + 1);
        if *name == target {
            continue;
        }
        let from = dir.join(name);
        let temp = dir.join(format!(".renaming_{}", i + 1));
        tokio::fs::rename(&from, &temp)
            .await
            .map_err(|e| PipelineError::io(&from, e))?;
        staged.push((temp, dir.join(target)));
    }
    for (temp, target) in &staged {
        tokio::fs::rename(temp, target)
            .await
            .map_err(|e| PipelineError::io(target, e))?;
    }

    debug!(dir = %dir.display(), slides = found.len(), renamed = staged.len(), "slide names normalised");
    Ok(found.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(dir: &Path) -> Vec<String> {
        let mut v: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        v.sort();
        v
    }

    #[test]
    fn args_request_png_at_scale() {
        let args = marp_args(Path::new("/w/slides.md"), Path::new("/w/images"), 2);
        assert_eq!(args[1..5], ["--images", "png", "--image-scale", "2"]);
        assert_eq!(args[6], Path::new("/w/images").join("slide.png").display().to_string());
    }

    #[tokio::test]
    async fn marp_output_is_renamed_in_numeric_order() {
        let tmp = tempfile::tempdir().unwrap();
        for (name, body) in [("slide.010.png", "ten"), ("slide.002.png", "two"), ("slide.001.png", "one")] {
            std::fs::write(tmp.path().join(name), body).unwrap();
        }
        std::fs::write(tmp.path().join("slides.md"), "deck").unwrap();

        let count = normalize_slide_names(tmp.path()).await.unwrap();
        assert_eq!(count, 3);
        assert_eq!(
            names(tmp.path()),
            vec!["slide_1.png", "slide_2.png", "slide_3.png", "slides.md"]
        );
        assert_eq!(std::fs::read_to_string(tmp.path().join("slide_3.png")).unwrap(), "ten");
    }

    #[tokio::test]
    async fn renaming_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        for n in 1..=3 {
            std::fs::write(tmp.path().join(slide_file_name(n)), n.to_string()).unwrap();
        }
        assert_eq!(normalize_slide_names(tmp.path()).await.unwrap(), 3);
        assert_eq!(normalize_slide_names(tmp.path()).await.unwrap(), 3);
        for n in 1..=3 {
            let body = std::fs::read_to_string(tmp.path().join(slide_file_name(n))).unwrap();
            assert_eq!(body, n.to_string());
        }
    }

    #[tokio::test]
    async fn gaps_are_closed_without_overwriting() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("slide_2.png"), "b").unwrap();
        std::fs::write(tmp.path().join("slide_5.png"), "c").unwrap();
        std::fs::write(tmp.path().join("slide_1.png"), "a").unwrap();

        assert_eq!(normalize_slide_names(tmp.path()).await.unwrap(), 3);
        assert_eq!(std::fs::read_to_string(tmp.path().join("slide_3.png")).unwrap(), "c");
        assert_eq!(names(tmp.path()).len(), 3);
    }

    #[tokio::test]
    async fn upper_case_extension_keeps_numeric_order() {
        let tmp = tempfile::tempdir().unwrap();
        for (name, body) in [("slide.010.PNG", "ten"), ("slide.009.PNG", "nine")] {
            std::fs::write(tmp.path().join(name), body).unwrap();
        }

        assert_eq!(normalize_slide_names(tmp.path()).await.unwrap(), 2);
        assert_eq!(std::fs::read_to_string(tmp.path().join("slide_1.png")).unwrap(), "nine");
        assert_eq!(std::fs::read_to_string(tmp.path().join("slide_2.png")).unwrap(), "ten");
    }

    #[tokio::test]
    async fn empty_dir_has_no_slides() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(normalize_slide_names(tmp.path()).await.unwrap(), 0);
    }
}
