//! Per-job scratch directory.
//!
//! Every export job stages its inputs and intermediates in its own temporary
//! directory, so concurrent jobs never share file names and nothing is left
//! behind on any exit path: the directory is removed when the workspace drops.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use super::ExportStage;
use crate::core::fs::validate_path_id_component;
use crate::core::{CoreError, CoreResult};

#[derive(Debug)]
pub struct ExportWorkspace {
    dir: TempDir,
}

impl ExportWorkspace {
    /// Creates a workspace under `parent`, or the system temp dir when `None`.
    pub fn create(job_id: &str, parent: Option<&Path>) -> CoreResult<Self> {
        let prefix = format!("beatreel-{}-", job_id);
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let dir = match parent {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)?
            }
            None => builder.tempdir()?,
        };
        tracing::debug!("Export workspace at {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Absolute path of a workspace file
    pub fn file(&self, name: &str) -> CoreResult<PathBuf> {
        validate_path_id_component(name, "workspace file").map_err(CoreError::ValidationError)?;
        Ok(self.dir.path().join(name))
    }

    /// Writes `bytes` under `name`, fully, before returning.
    pub async fn write(&self, name: &str, bytes: &[u8]) -> CoreResult<PathBuf> {
        let path = self.file(name)?;
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }

    /// Confirms a stage produced a non-empty output file.
    pub async fn require_output(&self, name: &str, stage: ExportStage) -> CoreResult<PathBuf> {
        let path = self.file(name)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(path),
            Ok(_) => Err(CoreError::stage(stage, format!("{} is empty", name))),
            Err(_) => Err(CoreError::stage(stage, format!("{} was not produced", name))),
        }
    }

    /// Removes the directory now, surfacing any cleanup error.
    pub fn close(self) -> CoreResult<()> {
        self.dir.close()?;
        Ok(())
    }
}
