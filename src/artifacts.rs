//! Artifact store: per-run working directories.
//!
//! Every file a stage produces (slide markdown, rendered PNGs, narration
//! clips, encoded video) lives below `<work_dir>/<run_id>/<kind>/`. Because
//! the run id is validated to be a single path component, releasing a run
//! can only ever remove that run's own tree.

use crate::error::PipelineError;
use crate::model::{ArtifactKind, RunId};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Creates, names and deletes the transient files of each run.
#[derive(Debug)]
pub struct ArtifactStore {
    root: PathBuf,
    allocated: Mutex<HashMap<RunId, BTreeSet<ArtifactKind>>>,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            allocated: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding all artifacts of `run_id`.
    pub fn run_root(&self, run_id: &RunId) -> PathBuf {
        self.root.join(run_id.as_str())
    }

    /// Create (idempotently) the working directory for `kind` and return it.
    pub async fn allocate(&self, run_id: &RunId, kind: ArtifactKind) -> Result<PathBuf, PipelineError> {
        let dir = self.run_root(run_id).join(kind.dir_name());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| PipelineError::io(&dir, e))?;
        self.allocated
            .lock()
            .map_err(|_| PipelineError::Internal("artifact registry poisoned".into()))?
            .entry(run_id.clone())
            .or_default()
            .insert(kind);
        debug!(run_id = %run_id, kind = %kind, "allocated {}", dir.display());
        Ok(dir)
    }

    /// Path of `name` inside the `kind` directory of `run_id`, allocating it.
    pub async fn file(
        &self,
        run_id: &RunId,
        kind: ArtifactKind,
        name: &str,
    ) -> Result<PathBuf, PipelineError> {
        Ok(self.allocate(run_id, kind).await?.join(name))
    }

    /// Kinds allocated so far for `run_id`.
    pub fn allocated_kinds(&self, run_id: &RunId) -> Vec<ArtifactKind> {
        self.allocated
            .lock()
            .map(|m| m.get(run_id).map(|s| s.iter().copied().collect()).unwrap_or_default())
            .unwrap_or_default()
    }

    /// Delete every directory allocated for `run_id`.
    ///
    /// Missing paths are not an error. Returns the number of directories that
    /// were actually removed. Failures are logged and skipped; releasing is
    /// best-effort and never fails the run.
    pub async fn release(&self, run_id: &RunId) -> usize {
        if let Ok(mut map) = self.allocated.lock() {
            map.remove(run_id);
        }

        let mut removed = 0;
        for kind in ArtifactKind::ALL {
            let dir = self.run_root(run_id).join(kind.dir_name());
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(run_id = %run_id, "failed to remove {}: {}", dir.display(), e),
            }
        }

        // The run root only ever holds the kind directories.
        let run_root = self.run_root(run_id);
        match tokio::fs::remove_dir_all(&run_root).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(run_id = %run_id, "failed to remove {}: {}", run_root.display(), e),
        }

        debug!(run_id = %run_id, removed, "released run artifacts");
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allocate_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let run = RunId::parse("run1").unwrap();

        let a = store.allocate(&run, ArtifactKind::Images).await.unwrap();
        let b = store.allocate(&run, ArtifactKind::Images).await.unwrap();
        assert_eq!(a, b);
        assert!(a.is_dir());
        assert_eq!(store.allocated_kinds(&run), vec![ArtifactKind::Images]);
    }

    #[tokio::test]
    async fn release_only_touches_its_own_run() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let mine = RunId::parse("mine").unwrap();
        let other = RunId::parse("other").unwrap();

        let audio = store.file(&mine, ArtifactKind::Audio, "audio_1.mp3").await.unwrap();
        std::fs::write(&audio, b"x").unwrap();
        let keep = store.file(&other, ArtifactKind::Audio, "audio_1.mp3").await.unwrap();
        std::fs::write(&keep, b"y").unwrap();

        assert_eq!(store.release(&mine).await, 1);
        assert!(!store.run_root(&mine).exists());
        assert!(keep.exists());
    }

    #[tokio::test]
    async fn release_tolerates_clean_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let run = RunId::parse("never-used").unwrap();

        assert_eq!(store.release(&run).await, 0);
        assert_eq!(store.release(&run).await, 0);
    }
}
