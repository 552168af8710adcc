use crate::deployment::DeploymentId;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
#[error("failed to create workspace {path}: {source}")]
pub struct WorkspaceError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Scratch directory owned by one deployment attempt.
///
/// Call [`release`](Workspace::release) to remove it; if the guard is
/// dropped first, `Drop` removes it synchronously.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    released: bool,
}

impl Workspace {
    /// Create `{root}/{id}`.
    pub async fn acquire(root: &Path, id: &DeploymentId) -> Result<Self, WorkspaceError> {
        let path = root.join(id.as_str());
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|source| WorkspaceError {
                path: path.clone(),
                source,
            })?;
        debug!(path = %path.display(), "Workspace created");
        Ok(Self {
            path,
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the directory. A directory that is already gone counts as
    /// removed.
    pub async fn release(mut self) -> io::Result<()> {
        self.released = true;
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Workspace removed on drop"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to remove workspace on drop")
            }
        }
    }
}
