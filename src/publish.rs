//! Course-file publishing: moving the finished video out of the run's
//! working area and into durable, user-owned storage.

use crate::error::PublishError;
use crate::model::RunContext;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

/// Stores a finished file for a user and returns a durable URL to it.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(
        &self,
        local: &Path,
        ctx: &RunContext,
        file_name: &str,
    ) -> Result<String, PublishError>;
}

/// Publishes into `<root>/user_<id>/private/` on the local file system.
///
/// The copy goes to a temporary file in the destination directory first and
/// is renamed into place, so a reader never sees a half-written video.
#[derive(Debug, Clone)]
pub struct LocalFilePublisher {
    root: PathBuf,
    public_base_url: Option<String>,
}

impl LocalFilePublisher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            public_base_url: None,
        }
    }

    /// Return `{base}/user_<id>/private/<name>` URLs instead of `file://` ones.
    pub fn with_public_base_url(mut self, base: impl Into<String>) -> Self {
        self.public_base_url = Some(base.into());
        self
    }

    fn relative_dir(user_id: i64) -> PathBuf {
        PathBuf::from(format!("user_{user_id}")).join("private")
    }

    /// Directory that receives files for `user_id`.
    pub fn user_dir(&self, user_id: i64) -> PathBuf {
        self.root.join(Self::relative_dir(user_id))
    }

    fn url_for(&self, user_id: i64, dest: &Path, file_name: &str) -> String {
        match self.public_base_url {
            Some(ref base) => format!(
                "{}/user_{}/private/{}",
                base.trim_end_matches('/'),
                user_id,
                file_name
            ),
            None => format!("file://{}", dest.display()),
        }
    }
}

#[async_trait]
impl Publisher for LocalFilePublisher {
    async fn publish(
        &self,
        local: &Path,
        ctx: &RunContext,
        file_name: &str,
    ) -> Result<String, PublishError> {
        if !tokio::fs::try_exists(local).await.unwrap_or(false) {
            return Err(PublishError::SourceMissing {
                path: local.to_path_buf(),
            });
        }

        let dir = self.user_dir(ctx.user_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| PublishError::Store {
                path: dir.clone(),
                source,
            })?;
        let dest = dir.join(file_name);

        let (src, target, staging_dir) = (local.to_path_buf(), dest.clone(), dir.clone());
        tokio::task::spawn_blocking(move || -> Result<(), PublishError> {
            let store_err = |source: std::io::Error| PublishError::Store {
                path: target.clone(),
                source,
            };
            let mut staged = tempfile::Builder::new()
                .prefix(".upload")
                .tempfile_in(&staging_dir)
                .map_err(store_err)?;
            let mut input = std::fs::File::open(&src).map_err(store_err)?;
            std::io::copy(&mut input, staged.as_file_mut()).map_err(store_err)?;
            staged.as_file().sync_all().map_err(store_err)?;
            staged
                .persist(&target)
                .map_err(|e| store_err(e.error))?;
            Ok(())
        })
        .await
        .map_err(|e| PublishError::Store {
            path: dest.clone(),
            source: std::io::Error::other(e.to_string()),
        })??;

        let url = self.url_for(ctx.user_id, &dest, file_name);
        info!(run_id = %ctx.run_id, "published {}", url);
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use std::sync::Arc;

    fn ctx(user_id: i64) -> RunContext {
        RunContext::new(5, user_id, Arc::new(PipelineConfig::default()))
    }

    #[tokio::test]
    async fn copies_into_private_area() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("final.mp4");
        std::fs::write(&src, b"video").unwrap();

        let publisher = LocalFilePublisher::new(tmp.path().join("files"));
        let url = publisher.publish(&src, &ctx(9), "out.mp4").await.unwrap();

        let dest = tmp.path().join("files/user_9/private/out.mp4");
        assert_eq!(std::fs::read(&dest).unwrap(), b"video");
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("user_9/private/out.mp4"));
        // the source stays for cleanup to remove
        assert!(src.exists());
    }

    #[tokio::test]
    async fn public_base_url_is_used() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("v.mp4");
        std::fs::write(&src, b"v").unwrap();

        let publisher =
            LocalFilePublisher::new(tmp.path()).with_public_base_url("https://files.example.org/");
        let url = publisher.publish(&src, &ctx(3), "a.mp4").await.unwrap();
        assert_eq!(url, "https://files.example.org/user_3/private/a.mp4");
    }

    #[tokio::test]
    async fn missing_source_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let publisher = LocalFilePublisher::new(tmp.path());
        let err = publisher
            .publish(&tmp.path().join("nope.mp4"), &ctx(1), "x.mp4")
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::SourceMissing { .. }));
    }
}
