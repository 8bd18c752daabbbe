//! File providers
//!
//! The transfer session reads files through [`FileProvider`]; the binary
//! serves a directory, tests and embedded images use memory.

use crate::error::{Result, TftpError};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncRead;
use tracing::{debug, warn};

/// An opened file: a byte stream plus its length when known
pub struct TftpFile {
    pub reader: Box<dyn AsyncRead + Send + Sync + Unpin>,
    /// Reported in the `tsize` option
    pub size: Option<u64>,
}

impl std::fmt::Debug for TftpFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TftpFile")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Trait for providing files to the TFTP server
#[async_trait]
pub trait FileProvider: Send + Sync {
    /// Open `path` as requested by the client.
    ///
    /// Any failure, including a path that escapes the served tree,
    /// is [`TftpError::FileNotFound`].
    async fn open(&self, path: &str) -> Result<TftpFile>;
}

/// Serves files below a root directory
#[derive(Debug, Clone)]
pub struct DirectoryFileProvider {
    root: PathBuf,
}

impl DirectoryFileProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Join a client path onto the root.
    ///
    /// Leading slashes are dropped and backslashes are treated as
    /// separators. Only plain name components are allowed.
    pub fn resolve(&self, path: &str) -> Option<PathBuf> {
        let normalized = path.replace('\\', "/");
        let relative = Path::new(normalized.trim_start_matches('/'));

        let mut resolved = self.root.clone();
        let mut components = 0;
        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    resolved.push(part);
                    components += 1;
                }
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
            }
        }

        (components > 0).then_some(resolved)
    }
}

#[async_trait]
impl FileProvider for DirectoryFileProvider {
    async fn open(&self, path: &str) -> Result<TftpFile> {
        let Some(full_path) = self.resolve(path) else {
            warn!(path = %path, "Blocked path outside served directory");
            return Err(TftpError::FileNotFound(path.to_string()));
        };

        let not_found = |e: std::io::Error| {
            debug!(path = %full_path.display(), error = %e, "File not found");
            TftpError::FileNotFound(path.to_string())
        };

        let file = tokio::fs::File::open(&full_path).await.map_err(not_found)?;
        let metadata = file.metadata().await.map_err(not_found)?;
        if !metadata.is_file() {
            debug!(path = %full_path.display(), "Not a regular file");
            return Err(TftpError::FileNotFound(path.to_string()));
        }

        debug!(path = %full_path.display(), size = metadata.len(), "Opened file");
        Ok(TftpFile {
            reader: Box::new(file),
            size: Some(metadata.len()),
        })
    }
}

/// In-memory file provider for testing and static files
#[derive(Debug, Default)]
pub struct MemoryFileProvider {
    files: HashMap<String, Bytes>,
}

impl MemoryFileProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file
    pub fn add_file(&mut self, path: impl Into<String>, data: impl Into<Bytes>) {
        self.files.insert(path.into(), data.into());
    }
}

#[async_trait]
impl FileProvider for MemoryFileProvider {
    async fn open(&self, path: &str) -> Result<TftpFile> {
        let data = self
            .files
            .get(path.trim_start_matches('/'))
            .cloned()
            .ok_or_else(|| TftpError::FileNotFound(path.to_string()))?;

        Ok(TftpFile {
            size: Some(data.len() as u64),
            reader: Box::new(Cursor::new(data)),
        })
    }
}
