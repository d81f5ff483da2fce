//! Filesystem abstraction consumed by transfer jobs.

use std::fmt;
use std::io::{self, Read, Seek, Write};
use std::sync::Arc;
use std::time::SystemTime;

/// Writable, seekable output stream (archive containers need to seek back).
pub trait WriteSeek: Write + Seek + Send {}

impl<T: Write + Seek + Send> WriteSeek for T {}

/// A file or directory in some filesystem.
///
/// Paths are plain strings so that callers can do prefix arithmetic on them
/// exactly as the filesystem reports them.
pub trait FileHandle: Send + Sync + fmt::Debug {
    /// Last path component.
    fn name(&self) -> String;

    /// Absolute path, without a trailing separator.
    ///
    /// With `resolve_symlinks`, symbolic links in the path are resolved.
    fn absolute_path(&self, resolve_symlinks: bool) -> String;

    /// Canonical path used for identity comparisons.
    fn canonical_path(&self) -> String {
        self.absolute_path(true)
    }

    /// Returns `true` if both handles denote the same canonical file.
    fn canonical_equals(&self, other: &dyn FileHandle) -> bool {
        self.canonical_path() == other.canonical_path()
    }

    fn exists(&self) -> bool;

    /// Returns `true` for directories, following symbolic links.
    fn is_directory(&self) -> bool;

    fn is_symlink(&self) -> bool;

    /// Size in bytes, -1 if unknown.
    fn size(&self) -> i64;

    fn modified(&self) -> Option<SystemTime>;

    fn parent(&self) -> Option<Arc<dyn FileHandle>>;

    /// Lists the children of a directory, in the filesystem's order.
    fn list(&self) -> io::Result<Vec<Arc<dyn FileHandle>>>;

    fn open_read(&self) -> io::Result<Box<dyn Read + Send>>;

    /// Creates or truncates the file for writing.
    fn open_write(&self) -> io::Result<Box<dyn WriteSeek>>;

    /// Returns `true` if `other` lives somewhere below this file.
    fn is_parent_of(&self, other: &dyn FileHandle) -> bool {
        let parent = self.canonical_path();
        let child = other.canonical_path();
        match child.strip_prefix(parent.as_str()) {
            Some(rest) if !rest.is_empty() => {
                parent.ends_with(is_separator) || rest.starts_with(is_separator)
            }
            _ => false,
        }
    }
}

/// Path separators accepted on every platform.
pub fn is_separator(c: char) -> bool {
    c == '/' || c == std::path::MAIN_SEPARATOR
}
