use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use crate::error::PipelineError;

/// Resolves dataset names from node parameters to host files.
#[async_trait]
pub trait DatasetProvider: Send + Sync {
    async fn resolve(&self, name: &str) -> Result<PathBuf, PipelineError>;
}

/// Datasets are files under one root directory.
#[derive(Debug, Clone)]
pub struct LocalDatasetProvider {
    root: PathBuf,
}

impl LocalDatasetProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl DatasetProvider for LocalDatasetProvider {
    async fn resolve(&self, name: &str) -> Result<PathBuf, PipelineError> {
        let relative = Path::new(name);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if name.is_empty() || escapes {
            return Err(PipelineError::DatasetNotFound(format!(
                "{} (must be a relative path inside the dataset root)",
                name
            )));
        }

        let not_found = || PipelineError::DatasetNotFound(name.to_string());
        let root = tokio::fs::canonicalize(&self.root).await.map_err(|_| not_found())?;
        let path = tokio::fs::canonicalize(root.join(relative))
            .await
            .map_err(|_| not_found())?;
        // Symlinks may still point outside the root.
        if !path.starts_with(&root) {
            return Err(not_found());
        }
        let meta = tokio::fs::metadata(&path).await.map_err(|_| not_found())?;
        if !meta.is_file() {
            return Err(not_found());
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolves_file_under_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("crypto")).unwrap();
        std::fs::write(dir.path().join("crypto/btc.csv"), "timestamp,close\n").unwrap();
        let provider = LocalDatasetProvider::new(dir.path());
        let path = provider.resolve("crypto/btc.csv").await.unwrap();
        assert!(path.ends_with("crypto/btc.csv"));
    }

    #[tokio::test]
    async fn test_refuses_escape_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalDatasetProvider::new(dir.path());
        for name in ["../etc/passwd", "/etc/passwd", "missing.csv", ""] {
            let err = provider.resolve(name).await.unwrap_err();
            assert!(matches!(err, PipelineError::DatasetNotFound(_)), "{}", name);
        }
    }
}
