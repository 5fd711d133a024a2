//! Filesystem artifact store rooted at a directory.

use std::path::{Component, Path, PathBuf};

use tracing::info;

use super::{write_atomic, ArtifactError, ArtifactStore};
use crate::types::ArtifactBlob;

#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `root/path`; absolute paths and `..` are rejected.
    fn resolve(&self, path: &str) -> Result<PathBuf, ArtifactError> {
        let rel = Path::new(path);
        if path.is_empty() || !rel.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir)) {
            return Err(ArtifactError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(rel))
    }
}

impl ArtifactStore for LocalArtifactStore {
    fn location(&self, path: &str) -> String {
        self.root.join(path).display().to_string()
    }

    fn write(&self, path: &str, bytes: &[u8]) -> Result<ArtifactBlob, ArtifactError> {
        let target = self.resolve(path)?;
        write_atomic(&target, bytes)?;
        let blob = ArtifactBlob::describe(target.display().to_string(), bytes);
        info!(location = %blob.location, bytes = blob.size_bytes, md5 = %blob.md5, "Artifact written");
        Ok(blob)
    }

    fn read(&self, path: &str) -> Result<Vec<u8>, ArtifactError> {
        let target = self.resolve(path)?;
        std::fs::read(&target).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ArtifactError::NotFound(target.display().to_string())
            } else {
                ArtifactError::Io {
                    path: target.clone(),
                    source,
                }
            }
        })
    }
}
