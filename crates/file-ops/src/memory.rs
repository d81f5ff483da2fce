//! In-memory [`FileHandle`] tree, used to drive jobs without touching disk.

use std::collections::BTreeMap;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use crate::file::{FileHandle, WriteSeek};

#[derive(Debug, Clone)]
enum Node {
    Dir,
    File { data: Vec<u8>, modified: SystemTime },
}

type Tree = Arc<Mutex<BTreeMap<String, Node>>>;

/// A shared in-memory filesystem with `/`-separated absolute paths.
#[derive(Debug, Clone, Default)]
pub struct MemoryFs {
    tree: Tree,
}

impl MemoryFs {
    pub fn new() -> Self {
        let fs = Self::default();
        fs.tree
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert("/".into(), Node::Dir);
        fs
    }

    /// Creates a directory and any missing parents.
    pub fn add_dir(&self, path: &str) -> &Self {
        let path = normalize(path);
        let mut tree = self.tree.lock().unwrap_or_else(PoisonError::into_inner);
        for ancestor in ancestors(&path) {
            tree.entry(ancestor).or_insert(Node::Dir);
        }
        tree.insert(path, Node::Dir);
        self
    }

    /// Creates a file with `data`, creating missing parent directories.
    pub fn add_file(&self, path: &str, data: &[u8]) -> &Self {
        let path = normalize(path);
        let mut tree = self.tree.lock().unwrap_or_else(PoisonError::into_inner);
        for ancestor in ancestors(&path) {
            tree.entry(ancestor).or_insert(Node::Dir);
        }
        tree.insert(
            path,
            Node::File {
                data: data.to_vec(),
                modified: SystemTime::now(),
            },
        );
        self
    }

    /// Returns a handle to `path`, whether or not it exists yet.
    pub fn file(&self, path: &str) -> Arc<dyn FileHandle> {
        Arc::new(MemoryFile {
            tree: Arc::clone(&self.tree),
            path: normalize(path),
        })
    }

    /// Returns the content of a file, if it exists.
    pub fn read(&self, path: &str) -> Option<Vec<u8>> {
        let tree = self.tree.lock().unwrap_or_else(PoisonError::into_inner);
        match tree.get(&normalize(path)) {
            Some(Node::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".into()
    } else if trimmed.starts_with('/') {
        trimmed.into()
    } else {
        format!("/{trimmed}")
    }
}

fn parent_of(path: &str) -> Option<String> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/".into()),
        Some(idx) => Some(path[..idx].into()),
        None => None,
    }
}

fn ancestors(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = parent_of(path);
    while let Some(p) = current {
        current = parent_of(&p);
        out.push(p);
    }
    out
}

/// A path inside a [`MemoryFs`].
#[derive(Debug, Clone)]
pub struct MemoryFile {
    tree: Tree,
    path: String,
}

impl MemoryFile {
    fn node(&self) -> Option<Node> {
        self.tree
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&self.path)
            .cloned()
    }
}

impl FileHandle for MemoryFile {
    fn name(&self) -> String {
        self.path.rsplit('/').next().unwrap_or_default().to_string()
    }

    fn absolute_path(&self, _resolve_symlinks: bool) -> String {
        self.path.clone()
    }

    fn exists(&self) -> bool {
        self.node().is_some()
    }

    fn is_directory(&self) -> bool {
        matches!(self.node(), Some(Node::Dir))
    }

    fn is_symlink(&self) -> bool {
        false
    }

    fn size(&self) -> i64 {
        match self.node() {
            Some(Node::File { data, .. }) => data.len() as i64,
            Some(Node::Dir) => 0,
            None => -1,
        }
    }

    fn modified(&self) -> Option<SystemTime> {
        match self.node() {
            Some(Node::File { modified, .. }) => Some(modified),
            _ => None,
        }
    }

    fn parent(&self) -> Option<Arc<dyn FileHandle>> {
        parent_of(&self.path).map(|path| {
            Arc::new(MemoryFile {
                tree: Arc::clone(&self.tree),
                path,
            }) as Arc<dyn FileHandle>
        })
    }

    fn list(&self) -> io::Result<Vec<Arc<dyn FileHandle>>> {
        let tree = self.tree.lock().unwrap_or_else(PoisonError::into_inner);
        match tree.get(&self.path) {
            Some(Node::Dir) => {}
            Some(_) => {
                return Err(io::Error::other(format!("not a directory: {}", self.path)));
            }
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no such directory: {}", self.path),
                ));
            }
        }
        Ok(tree
            .keys()
            .filter(|key| parent_of(key).as_deref() == Some(self.path.as_str()))
            .map(|key| {
                Arc::new(MemoryFile {
                    tree: Arc::clone(&self.tree),
                    path: key.clone(),
                }) as Arc<dyn FileHandle>
            })
            .collect())
    }

    fn open_read(&self) -> io::Result<Box<dyn Read + Send>> {
        match self.node() {
            Some(Node::File { data, .. }) => Ok(Box::new(Cursor::new(data))),
            Some(Node::Dir) => Err(io::Error::other(format!("is a directory: {}", self.path))),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such file: {}", self.path),
            )),
        }
    }

    fn open_write(&self) -> io::Result<Box<dyn WriteSeek>> {
        let parent = parent_of(&self.path).unwrap_or_else(|| "/".into());
        {
            let mut tree = self.tree.lock().unwrap_or_else(PoisonError::into_inner);
            if !matches!(tree.get(&parent), Some(Node::Dir)) {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no such directory: {parent}"),
                ));
            }
            tree.insert(
                self.path.clone(),
                Node::File {
                    data: Vec::new(),
                    modified: SystemTime::now(),
                },
            );
        }
        Ok(Box::new(MemoryWriter {
            tree: Arc::clone(&self.tree),
            path: self.path.clone(),
            buf: Cursor::new(Vec::new()),
        }))
    }
}

/// Buffers writes and publishes them to the tree on flush and drop.
struct MemoryWriter {
    tree: Tree,
    path: String,
    buf: Cursor<Vec<u8>>,
}

impl MemoryWriter {
    fn publish(&self) {
        let mut tree = self.tree.lock().unwrap_or_else(PoisonError::into_inner);
        tree.insert(
            self.path.clone(),
            Node::File {
                data: self.buf.get_ref().clone(),
                modified: SystemTime::now(),
            },
        );
    }
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.publish();
        Ok(())
    }
}

impl Seek for MemoryWriter {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.buf.seek(pos)
    }
}

impl Drop for MemoryWriter {
    fn drop(&mut self) {
        self.publish();
    }
}
