//! Exported job results on disk.
//!
//! Collectors write their exports into a single flat directory. This module
//! lists them and resolves client-supplied names safely inside it.

use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use thiserror::Error;
use tokio::fs;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("File not found")]
    NotFound,

    #[error("No data available")]
    Empty,

    #[error("Invalid file name: {0}")]
    InvalidName(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
    extension: String,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        let extension = extension.into();
        Self {
            dir: dir.into(),
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Names of exported files with the configured extension, newest first.
    ///
    /// A missing directory lists as empty.
    pub async fn list(&self) -> Result<Vec<String>, ArtifactError> {
        let mut files = self
            .entries()
            .await?
            .into_iter()
            .filter(|(path, _)| self.has_extension(path))
            .collect::<Vec<_>>();
        files.sort_by(|a, b| b.1.cmp(&a.1));

        Ok(files
            .into_iter()
            .filter_map(|(path, _)| file_name(&path))
            .collect())
    }

    /// Resolve a client-supplied file name to an existing file in the store.
    pub async fn resolve(&self, name: &str) -> Result<PathBuf, ArtifactError> {
        validate_name(name)?;
        let path = self.dir.join(name);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            Ok(_) => Err(ArtifactError::NotFound),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(ArtifactError::NotFound),
            Err(e) => Err(ArtifactError::Io(e)),
        }
    }

    /// Most recently modified file of any extension.
    pub async fn latest(&self) -> Result<PathBuf, ArtifactError> {
        self.entries()
            .await?
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1))
            .map(|(path, _)| path)
            .ok_or(ArtifactError::Empty)
    }

    async fn entries(&self) -> Result<Vec<(PathBuf, SystemTime)>, ArtifactError> {
        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Downloads directory {} does not exist", self.dir.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            entries.push((entry.path(), modified));
        }
        Ok(entries)
    }

    fn has_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(&self.extension))
    }
}

pub fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().to_string())
}

/// Only bare file names are accepted: no separators, no `.`/`..`.
fn validate_name(name: &str) -> Result<(), ArtifactError> {
    if name.is_empty() || name.contains('\0') {
        return Err(ArtifactError::InvalidName(name.to_string()));
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !name.contains(['/', '\\']) => Ok(()),
        _ => Err(ArtifactError::InvalidName(name.to_string())),
    }
}
