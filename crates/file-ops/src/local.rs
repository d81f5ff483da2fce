//! [`FileHandle`] backed by the local filesystem.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use tracing::debug;

use crate::file::{FileHandle, WriteSeek};

/// A path on the local filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    path: PathBuf,
}

impl LocalFile {
    /// Wraps `path`; relative paths are made absolute against the current
    /// working directory.
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        Self { path }
    }

    /// Wraps `path` as a shareable handle.
    pub fn handle(path: impl AsRef<Path>) -> Arc<dyn FileHandle> {
        Arc::new(Self::new(path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FileHandle for LocalFile {
    fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn absolute_path(&self, resolve_symlinks: bool) -> String {
        if resolve_symlinks {
            if let Ok(canon) = fs::canonicalize(&self.path) {
                return canon.to_string_lossy().into_owned();
            }
        }
        self.path.to_string_lossy().into_owned()
    }

    fn exists(&self) -> bool {
        fs::symlink_metadata(&self.path).is_ok()
    }

    fn is_directory(&self) -> bool {
        self.path.is_dir()
    }

    fn is_symlink(&self) -> bool {
        self.path.is_symlink()
    }

    fn size(&self) -> i64 {
        match fs::metadata(&self.path) {
            Ok(meta) if meta.is_dir() => 0,
            Ok(meta) => meta.len() as i64,
            Err(_) => -1,
        }
    }

    fn modified(&self) -> Option<SystemTime> {
        fs::metadata(&self.path).and_then(|m| m.modified()).ok()
    }

    fn parent(&self) -> Option<Arc<dyn FileHandle>> {
        let parent = self.path.parent()?;
        if parent.as_os_str().is_empty() {
            return None;
        }
        Some(Arc::new(LocalFile {
            path: parent.to_path_buf(),
        }))
    }

    /// Lists children sorted by name, so traversal order is stable.
    fn list(&self) -> io::Result<Vec<Arc<dyn FileHandle>>> {
        let mut paths: Vec<PathBuf> = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            match entry {
                Ok(entry) => paths.push(entry.path()),
                Err(e) => {
                    debug!(dir = %self.path.display(), error = %e, "skipping unreadable entry");
                }
            }
        }
        paths.sort();
        Ok(paths
            .into_iter()
            .map(|path| Arc::new(LocalFile { path }) as Arc<dyn FileHandle>)
            .collect())
    }

    fn open_read(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(fs::File::open(&self.path)?))
    }

    fn open_write(&self) -> io::Result<Box<dyn WriteSeek>> {
        Ok(Box::new(fs::File::create(&self.path)?))
    }
}
