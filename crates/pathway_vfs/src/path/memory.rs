use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use tracing::{debug, instrument};

use pathway_base::{PathwayError, PathwayResult};

use crate::buffer::BufferPool;
use crate::stream::{MemoryFile, MemoryFileTransport, OpenMode, Stream};

use super::backend::{Backend, unsupported};
use super::{FileType, Path, PathKind, PathStat};

enum MemoryNode {
    Directory { modified: SystemTime },
    File(Arc<Mutex<MemoryFile>>),
}

struct MemoryFsInner {
    pool: BufferPool,
    /// Keyed by absolute path without trailing slash; "/" is always present.
    nodes: Mutex<BTreeMap<String, MemoryNode>>,
}

/// An in-process file tree addressed by `memory:` paths.
///
/// Clones share the same tree. File contents live in pool backed buffer chains and every
/// open stream on a file sees the others' writes immediately.
#[derive(Clone)]
pub struct MemoryFs {
    inner: Arc<MemoryFsInner>,
}

fn parent_key(key: &str) -> &str {
    match key.rfind('/') {
        Some(0) | None => "/",
        Some(index) => &key[..index],
    }
}

fn child_prefix(key: &str) -> String {
    if key == "/" {
        "/".to_string()
    } else {
        format!("{}/", key)
    }
}

fn memory_error(key: &str, kind: io::ErrorKind, message: &str) -> Box<PathwayError> {
    debug!(key, ?kind, message, "memory file operation failed");
    Box::new(PathwayError::io(
        format!("memory:{}", key),
        io::Error::new(kind, message.to_string()),
    ))
}

impl MemoryFs {
    pub fn new(pool: BufferPool) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "/".to_string(),
            MemoryNode::Directory {
                modified: SystemTime::now(),
            },
        );
        Self {
            inner: Arc::new(MemoryFsInner {
                pool,
                nodes: Mutex::new(nodes),
            }),
        }
    }

    /// Whether both handles address the same tree.
    pub fn is_same(&self, other: &MemoryFs) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of files and directories, the root included.
    pub fn node_count(&self) -> usize {
        self.inner.nodes.lock().len()
    }

    fn touch_directory(nodes: &mut BTreeMap<String, MemoryNode>, key: &str) {
        if let Some(MemoryNode::Directory { modified }) = nodes.get_mut(key) {
            *modified = SystemTime::now();
        }
    }

    fn require_parent_directory(
        nodes: &BTreeMap<String, MemoryNode>,
        key: &str,
    ) -> PathwayResult<()> {
        match nodes.get(parent_key(key)) {
            Some(MemoryNode::Directory { .. }) => Ok(()),
            Some(MemoryNode::File(_)) => Err(memory_error(
                key,
                io::ErrorKind::NotADirectory,
                "parent is a file",
            )),
            None => Err(memory_error(
                key,
                io::ErrorKind::NotFound,
                "parent directory does not exist",
            )),
        }
    }

    fn has_children(nodes: &BTreeMap<String, MemoryNode>, key: &str) -> bool {
        let prefix = child_prefix(key);
        nodes
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(name, _)| name.starts_with(&prefix))
    }

    fn descendants(nodes: &BTreeMap<String, MemoryNode>, key: &str) -> Vec<String> {
        let prefix = child_prefix(key);
        nodes
            .range(prefix.clone()..)
            .take_while(|(name, _)| name.starts_with(&prefix))
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn file_for_open(&self, key: &str, mode: OpenMode) -> PathwayResult<Arc<Mutex<MemoryFile>>> {
        let mut nodes = self.inner.nodes.lock();
        match nodes.get(key) {
            Some(MemoryNode::File(file)) => Ok(file.clone()),
            Some(MemoryNode::Directory { .. }) => Err(memory_error(
                key,
                io::ErrorKind::IsADirectory,
                "cannot open a directory as a stream",
            )),
            None if matches!(mode, OpenMode::Write | OpenMode::Append) => {
                Self::require_parent_directory(&nodes, key)?;
                let file = Arc::new(Mutex::new(MemoryFile::new(self.inner.pool.clone())));
                nodes.insert(key.to_string(), MemoryNode::File(file.clone()));
                Self::touch_directory(&mut nodes, parent_key(key));
                debug!(key, "created memory file");
                Ok(file)
            }
            None => Err(memory_error(key, io::ErrorKind::NotFound, "no such file")),
        }
    }
}

impl Backend for MemoryFs {
    fn stat(&self, path: &Path) -> PathwayResult<PathStat> {
        let key = path.full_path();
        let nodes = self.inner.nodes.lock();
        Ok(match nodes.get(&key) {
            Some(MemoryNode::Directory { modified }) => PathStat {
                file_type: FileType::Directory,
                length: 0,
                modified: Some(*modified),
                readable: true,
                writable: true,
            },
            Some(MemoryNode::File(file)) => {
                let file = file.lock();
                PathStat {
                    file_type: FileType::File,
                    length: file.len() as u64,
                    modified: Some(file.modified()),
                    readable: true,
                    writable: true,
                }
            }
            None => PathStat::missing(),
        })
    }

    #[instrument(skip(self), fields(path = %path))]
    fn open(&self, path: &Path, mode: OpenMode) -> PathwayResult<Stream> {
        let key = path.full_path();
        let file = self.file_for_open(&key, mode)?;
        let label = path.url();
        let transport = match mode {
            OpenMode::Read => MemoryFileTransport::reader(file, label),
            OpenMode::Write => MemoryFileTransport::writer(file, label),
            OpenMode::Append => MemoryFileTransport::appender(file, label),
            OpenMode::ReadWrite => MemoryFileTransport::read_writer(file, label),
        };
        let context = path.context();
        Ok(Stream::new(
            transport,
            context.pool.clone(),
            context.stream.clone(),
        ))
    }

    fn list(&self, path: &Path) -> PathwayResult<Vec<String>> {
        let key = path.full_path();
        let nodes = self.inner.nodes.lock();
        match nodes.get(&key) {
            Some(MemoryNode::Directory { .. }) => {}
            Some(MemoryNode::File(_)) => {
                return Err(memory_error(&key, io::ErrorKind::NotADirectory, "not a directory"));
            }
            None => return Err(memory_error(&key, io::ErrorKind::NotFound, "no such directory")),
        }
        let prefix = child_prefix(&key);
        Ok(nodes
            .range(prefix.clone()..)
            .take_while(|(name, _)| name.starts_with(&prefix))
            .filter_map(|(name, _)| {
                let rest = &name[prefix.len()..];
                (!rest.contains('/')).then(|| rest.to_string())
            })
            .collect())
    }

    #[instrument(skip(self), fields(path = %path))]
    fn mkdir(&self, path: &Path, parents: bool) -> PathwayResult<bool> {
        let key = path.full_path();
        let mut nodes = self.inner.nodes.lock();
        match nodes.get(&key) {
            Some(MemoryNode::Directory { .. }) => return Ok(false),
            Some(MemoryNode::File(_)) => {
                return Err(memory_error(&key, io::ErrorKind::AlreadyExists, "a file exists"));
            }
            None => {}
        }
        if !parents {
            Self::require_parent_directory(&nodes, &key)?;
        }
        let mut missing = vec![key.clone()];
        let mut ancestor = parent_key(&key);
        while !nodes.contains_key(ancestor) {
            missing.push(ancestor.to_string());
            ancestor = parent_key(ancestor);
        }
        if let Some(MemoryNode::File(_)) = nodes.get(ancestor) {
            return Err(memory_error(&key, io::ErrorKind::NotADirectory, "parent is a file"));
        }
        let now = SystemTime::now();
        for directory in missing.into_iter().rev() {
            nodes.insert(directory, MemoryNode::Directory { modified: now });
        }
        Self::touch_directory(&mut nodes, ancestor);
        debug!("memory directory created");
        Ok(true)
    }

    #[instrument(skip(self), fields(path = %path))]
    fn remove(&self, path: &Path, recursive: bool) -> PathwayResult<bool> {
        let key = path.full_path();
        if key == "/" {
            return Err(memory_error(
                &key,
                io::ErrorKind::PermissionDenied,
                "cannot remove the root",
            ));
        }
        let mut nodes = self.inner.nodes.lock();
        if !nodes.contains_key(&key) {
            return Ok(false);
        }
        if Self::has_children(&nodes, &key) {
            if !recursive {
                return Err(memory_error(
                    &key,
                    io::ErrorKind::DirectoryNotEmpty,
                    "directory is not empty",
                ));
            }
            for descendant in Self::descendants(&nodes, &key) {
                nodes.remove(&descendant);
            }
        }
        nodes.remove(&key);
        Self::touch_directory(&mut nodes, parent_key(&key));
        Ok(true)
    }

    #[instrument(skip(self), fields(from = %from, to = %to))]
    fn rename(&self, from: &Path, to: &Path) -> PathwayResult<()> {
        match to.kind() {
            PathKind::Memory(target) if target.is_same(self) => {}
            _ => return Err(unsupported("rename across memory file systems", from)),
        }
        let source = from.full_path();
        let target = to.full_path();
        if source == target {
            return Ok(());
        }
        let mut nodes = self.inner.nodes.lock();
        if !nodes.contains_key(&source) {
            return Err(memory_error(&source, io::ErrorKind::NotFound, "no such file"));
        }
        if source == "/" || target.starts_with(&child_prefix(&source)) {
            return Err(memory_error(
                &target,
                io::ErrorKind::InvalidInput,
                "cannot move a directory into itself",
            ));
        }
        Self::require_parent_directory(&nodes, &target)?;
        if let Some(MemoryNode::Directory { .. }) = nodes.get(&target) {
            return Err(memory_error(&target, io::ErrorKind::AlreadyExists, "a directory exists"));
        }
        let moved_children: Vec<String> = Self::descendants(&nodes, &source);
        for old in moved_children {
            if let Some(node) = nodes.remove(&old) {
                let new = format!("{}{}", target, &old[source.len()..]);
                nodes.insert(new, node);
            }
        }
        if let Some(node) = nodes.remove(&source) {
            nodes.insert(target.clone(), node);
        }
        Self::touch_directory(&mut nodes, parent_key(&source));
        Self::touch_directory(&mut nodes, parent_key(&target));
        Ok(())
    }

    fn truncate(&self, path: &Path) -> PathwayResult<()> {
        let key = path.full_path();
        let nodes = self.inner.nodes.lock();
        match nodes.get(&key) {
            Some(MemoryNode::File(file)) => {
                let mut file = file.lock();
                file.data.clear();
                file.touch();
                Ok(())
            }
            Some(MemoryNode::Directory { .. }) => {
                Err(memory_error(&key, io::ErrorKind::IsADirectory, "is a directory"))
            }
            None => Err(memory_error(&key, io::ErrorKind::NotFound, "no such file")),
        }
    }

    fn create_new(&self, path: &Path) -> PathwayResult<bool> {
        let key = path.full_path();
        let mut nodes = self.inner.nodes.lock();
        if nodes.contains_key(&key) {
            return Ok(false);
        }
        Self::require_parent_directory(&nodes, &key)?;
        let file = MemoryFile::new(self.inner.pool.clone());
        nodes.insert(key.clone(), MemoryNode::File(Arc::new(Mutex::new(file))));
        Self::touch_directory(&mut nodes, parent_key(&key));
        Ok(true)
    }
}

impl fmt::Debug for MemoryFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryFs")
            .field("nodes", &self.node_count())
            .finish()
    }
}
