//! Ordered source file sets and entry-key computation.

use std::sync::Arc;

use crate::FileOpsError;
use crate::file::{FileHandle, is_separator};

/// An ordered set of source files sharing a base folder.
#[derive(Debug, Clone, Default)]
pub struct FileSet {
    base_folder: Option<Arc<dyn FileHandle>>,
    files: Vec<Arc<dyn FileHandle>>,
}

impl FileSet {
    /// Creates a set rooted at `base_folder`.
    pub fn new(base_folder: Arc<dyn FileHandle>, files: Vec<Arc<dyn FileHandle>>) -> Self {
        Self {
            base_folder: Some(base_folder),
            files,
        }
    }

    /// Creates a set whose base folder is the parent of the first file.
    pub fn from_files(files: Vec<Arc<dyn FileHandle>>) -> Self {
        let base_folder = files.first().and_then(|f| f.parent());
        Self { base_folder, files }
    }

    pub fn base_folder(&self) -> Option<&Arc<dyn FileHandle>> {
        self.base_folder.as_ref()
    }

    /// Absolute path of the base folder, empty if there is none.
    pub fn base_folder_path(&self) -> String {
        self.base_folder
            .as_ref()
            .map(|f| f.absolute_path(false))
            .unwrap_or_default()
    }

    pub fn files(&self) -> &[Arc<dyn FileHandle>] {
        &self.files
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn FileHandle>> {
        self.files.iter()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Computes the entry key of `path` relative to `base`.
///
/// The base prefix and the single separator following it are stripped, and
/// the result uses `/` separators. Fails if `path` is not strictly below
/// `base`.
pub fn relative_entry_path(base: &str, path: &str) -> Result<String, FileOpsError> {
    let outside = || FileOpsError::OutsideBase {
        path: path.to_string(),
        base: base.to_string(),
    };

    let rest = path.strip_prefix(base).ok_or_else(outside)?;
    let rest = if base.ends_with(is_separator) {
        rest
    } else {
        let mut chars = rest.chars();
        match chars.next() {
            Some(c) if is_separator(c) => chars.as_str(),
            _ => return Err(outside()),
        }
    };
    if rest.is_empty() {
        return Err(outside());
    }

    #[cfg(windows)]
    let rest = rest.replace('\\', "/");
    #[cfg(not(windows))]
    let rest = rest.to_string();

    Ok(rest)
}
