/* 📖 # Why one Path value type for every scheme?

Local files, http endpoints, tcp sockets, memory files and unknown schemes all share the same
naming rules: one normalization function, one lookup cache, one sandboxing primitive. What
differs is how a path is opened and stat'ed, and that lives behind the small `Backend` trait
picked by `PathKind`. A Path is a plain value: its identity is the canonical url, clones are
independent, and nothing in it refers back to where it was resolved from except the scheme
map it carries.
*/

mod backend;
mod cache;
mod context;
mod local;
mod memory;
mod net;
mod normalize;
mod resolve;
mod scheme;
mod stat;

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use pathway_base::{PathwayError, PathwayResult};

use crate::depend::PathDependency;
use crate::stream::{OpenMode, Stream};

use backend::{Backend, MissingBackend};
use local::LocalBackend;
use net::NetworkBackend;

pub use cache::{CacheStats, DEFAULT_CACHE_CAPACITY, PathCache};
pub use context::NetworkOptions;
pub use memory::MemoryFs;
pub use net::NetAddress;
pub use normalize::{escape_url, normalize, scan_scheme, split_query, unescape_url};
pub use scheme::SchemeMap;
pub use stat::{FileType, PathStat};

pub(crate) use context::PathContext;

/// The closed set of things a path can address.
#[derive(Debug, Clone)]
pub enum PathKind {
    Local,
    Http(NetAddress),
    Https(NetAddress),
    Tcp(NetAddress),
    Memory(MemoryFs),
    /// A scheme the resolving scheme map does not know. Every predicate reports false.
    NotFound { scheme: String },
}

/// A resolved, scheme-qualified name.
///
/// Equality, ordering and hashing use [`url`](Path::url) only. The display label set with
/// [`set_user_path`](Path::set_user_path) and the cached stat are not part of the identity.
pub struct Path {
    kind: PathKind,
    /// Sandbox prefix in the backing namespace, empty when unrestricted.
    root: Arc<str>,
    /// Canonical hierarchical part as seen from inside the sandbox.
    path: String,
    query: Option<String>,
    user_path: Option<String>,
    attributes: BTreeMap<String, String>,
    schemes: SchemeMap,
    context: Arc<PathContext>,
    stat_cache: Mutex<Option<PathStat>>,
}

impl Path {
    /// Root prototype of a scheme.
    pub(crate) fn prototype(kind: PathKind, context: Arc<PathContext>) -> Path {
        Path {
            kind,
            root: Arc::from(""),
            path: "/".to_string(),
            query: None,
            user_path: None,
            attributes: BTreeMap::new(),
            schemes: SchemeMap::empty(),
            context,
            stat_cache: Mutex::new(None),
        }
    }

    /// Same root, context, attributes and scheme map, new location.
    pub(crate) fn derive(&self, kind: PathKind, path: String, query: Option<String>) -> Path {
        Path {
            kind,
            root: self.root.clone(),
            path,
            query,
            user_path: None,
            attributes: self.attributes.clone(),
            schemes: self.schemes.clone(),
            context: self.context.clone(),
            stat_cache: Mutex::new(None),
        }
    }

    pub(crate) fn with_schemes(mut self, schemes: SchemeMap) -> Path {
        self.schemes = schemes;
        self
    }

    pub(crate) fn context(&self) -> &PathContext {
        &self.context
    }

    pub(crate) fn root(&self) -> &str {
        &self.root
    }

    pub fn kind(&self) -> &PathKind {
        &self.kind
    }

    pub fn scheme(&self) -> &str {
        match &self.kind {
            PathKind::Local => "file",
            PathKind::Http(_) => "http",
            PathKind::Https(_) => "https",
            PathKind::Tcp(_) => "tcp",
            PathKind::Memory(_) => "memory",
            PathKind::NotFound { scheme } => scheme,
        }
    }

    /// Canonical hierarchical part, as seen from inside a sandbox.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Hierarchical part in the backing namespace, with the sandbox prefix applied.
    pub(crate) fn full_path(&self) -> String {
        match (self.root.is_empty(), self.path.as_str()) {
            (true, _) => self.path.clone(),
            (false, "/") => self.root.to_string(),
            (false, path) => format!("{}{}", self.root, path),
        }
    }

    /// Canonical url; this is the identity of the path.
    pub fn url(&self) -> String {
        let full = self.full_path();
        match &self.kind {
            PathKind::Local => format!("file:{}", full),
            PathKind::Memory(_) => format!("memory:{}", full),
            PathKind::Http(address) => format!(
                "http://{}{}{}",
                address.authority(Some(net::HTTP_PORT)),
                escape_url(&full),
                self.query_suffix()
            ),
            PathKind::Https(address) => format!(
                "https://{}{}{}",
                address.authority(Some(net::HTTPS_PORT)),
                escape_url(&full),
                self.query_suffix()
            ),
            PathKind::Tcp(address) => match full.as_str() {
                "/" => format!("tcp://{}", address.authority(None)),
                _ => format!("tcp://{}{}", address.authority(None), full),
            },
            PathKind::NotFound { scheme } => format!("{}:{}", scheme, full),
        }
    }

    fn query_suffix(&self) -> String {
        self.query
            .as_ref()
            .map_or_else(String::new, |query| format!("?{}", query))
    }

    /// Path rendered for host file APIs.
    pub fn native_path(&self) -> PathBuf {
        let full = self.full_path();
        if self.context.windows_paths && matches!(self.kind, PathKind::Local) {
            PathBuf::from(normalize::windows_native(&full))
        } else {
            PathBuf::from(full)
        }
    }

    /// The string this path was resolved from, or its url.
    pub fn user_path(&self) -> String {
        self.user_path.clone().unwrap_or_else(|| self.url())
    }

    /// Replaces the display label. Never affects identity or other copies.
    pub fn set_user_path(&mut self, user_path: impl Into<String>) {
        self.user_path = Some(user_path.into());
    }

    pub(crate) fn set_user_path_opt(&mut self, user_path: Option<String>) {
        self.user_path = user_path;
    }

    fn address(&self) -> Option<&NetAddress> {
        match &self.kind {
            PathKind::Http(address) | PathKind::Https(address) | PathKind::Tcp(address) => {
                Some(address)
            }
            _ => None,
        }
    }

    pub fn host(&self) -> Option<&str> {
        self.address().map(|address| address.host.as_str())
    }

    pub fn port(&self) -> Option<u16> {
        self.address().map(|address| address.port)
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Last segment of the path, empty at the root.
    pub fn tail(&self) -> &str {
        normalize::tail(&self.path)
    }

    /// The enclosing directory. The root is its own parent.
    pub fn parent(&self) -> Path {
        let parent = normalize(&self.path, "..", false);
        let mut path = self.derive(self.kind.clone(), parent, None);
        if matches!(self.kind, PathKind::Local | PathKind::Memory(_)) {
            path.path = resolve::strip_trailing_slash(path.path);
        }
        path
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// The scheme map later lookups from this path consult.
    pub fn schemes(&self) -> &SchemeMap {
        &self.schemes
    }

    /// A path whose apparent root is this location and which knows no schemes.
    ///
    /// Lookups from it, including `..` and absolute paths, stay inside this subtree.
    pub fn create_root(&self) -> Path {
        self.create_root_with(SchemeMap::empty())
    }

    /// Like [`create_root`](Path::create_root) with an explicit scheme map.
    pub fn create_root_with(&self, schemes: SchemeMap) -> Path {
        let full = self.full_path();
        let root = full.trim_end_matches('/');
        debug!(root = %root, schemes = ?schemes.names(), "creating sandbox root");
        Path {
            kind: self.kind.clone(),
            root: Arc::from(root),
            path: "/".to_string(),
            query: None,
            user_path: None,
            attributes: self.attributes.clone(),
            schemes,
            context: self.context.clone(),
            stat_cache: Mutex::new(None),
        }
    }

    fn backend(&self) -> &dyn Backend {
        match &self.kind {
            PathKind::Local => &LocalBackend,
            PathKind::Memory(fs) => fs,
            PathKind::Http(_) | PathKind::Https(_) | PathKind::Tcp(_) => &NetworkBackend,
            PathKind::NotFound { .. } => &MissingBackend,
        }
    }

    /// Windows device names are never readable or writable.
    pub(crate) fn is_reserved(&self) -> bool {
        self.context.windows_paths
            && matches!(self.kind, PathKind::Local)
            && normalize::is_reserved_windows_name(&self.path)
    }

    /// Current stat. A missing resource is not an error.
    #[instrument(skip(self), fields(path = %self))]
    pub fn stat(&self) -> PathwayResult<PathStat> {
        self.backend().stat(self)
    }

    /// Stat that reports failures as a missing resource.
    pub fn try_stat(&self) -> PathStat {
        self.stat().unwrap_or_else(|e| {
            debug!(path = %self, error = %e, "stat failed, treating as missing");
            PathStat::missing()
        })
    }

    pub(crate) fn cached_stat(&self) -> Option<PathStat> {
        self.stat_cache.lock().clone()
    }

    pub(crate) fn store_stat(&self, stat: PathStat) {
        *self.stat_cache.lock() = Some(stat);
    }

    /// Drops a stat remembered from an earlier request.
    pub fn clear_stat_cache(&self) {
        *self.stat_cache.lock() = None;
    }

    pub fn exists(&self) -> bool {
        self.try_stat().exists()
    }

    pub fn is_file(&self) -> bool {
        self.try_stat().is_file()
    }

    pub fn is_directory(&self) -> bool {
        self.try_stat().is_directory()
    }

    pub fn can_read(&self) -> bool {
        self.try_stat().readable
    }

    pub fn can_write(&self) -> bool {
        !self.is_reserved() && !matches!(self.kind, PathKind::NotFound { .. }) && {
            let stat = self.try_stat();
            if stat.exists() {
                stat.writable
            } else {
                self.parent().is_directory()
            }
        }
    }

    pub fn length(&self) -> u64 {
        self.try_stat().length
    }

    pub fn last_modified(&self) -> Option<SystemTime> {
        self.try_stat().modified
    }

    /// Hex SHA-256 of a file's content, or of the sorted child names of a directory.
    /// `None` when the resource is missing or unreadable.
    #[instrument(skip(self), fields(path = %self))]
    pub fn digest(&self) -> Option<String> {
        let stat = self.try_stat();
        let mut hasher = Sha256::new();
        if stat.is_directory() {
            let names = self.list().ok()?;
            for name in names {
                hasher.update(name.as_bytes());
                hasher.update(b"\n");
            }
        } else if stat.exists() {
            let mut stream = self.open_read().ok()?;
            let mut chunk = self.context.pool.allocate();
            loop {
                let n = stream.read(chunk.as_mut_slice()).ok()?;
                if n == 0 {
                    break;
                }
                hasher.update(&chunk.as_mut_slice()[..n]);
            }
        } else {
            return None;
        }
        Some(hex::encode(hasher.finalize()))
    }

    /// Child names, sorted.
    pub fn list(&self) -> PathwayResult<Vec<String>> {
        let mut names = self.backend().list(self)?;
        names.sort();
        Ok(names)
    }

    /// Creates this directory. Returns false when it already existed.
    pub fn mkdir(&self) -> PathwayResult<bool> {
        self.backend().mkdir(self, false)
    }

    /// Creates this directory and any missing parents.
    pub fn mkdirs(&self) -> PathwayResult<bool> {
        self.backend().mkdir(self, true)
    }

    /// Removes a file or an empty directory. Returns false when nothing was there.
    pub fn remove(&self) -> PathwayResult<bool> {
        self.backend().remove(self, false)
    }

    pub fn remove_all(&self) -> PathwayResult<bool> {
        self.backend().remove(self, true)
    }

    pub fn rename_to(&self, target: &Path) -> PathwayResult<()> {
        if std::mem::discriminant(&self.kind) != std::mem::discriminant(&target.kind) {
            return Err(Box::new(PathwayError::unsupported(
                format!("rename to {}", target),
                self.url(),
            )));
        }
        self.backend().rename(self, target)
    }

    pub fn truncate(&self) -> PathwayResult<()> {
        self.backend().truncate(self)
    }

    /// Creates an empty file. Returns false when something already exists there.
    pub fn create_new_file(&self) -> PathwayResult<bool> {
        self.backend().create_new(self)
    }

    /// Local files below this directory whose relative path matches one of `globs`.
    pub fn walk(
        &self,
        globs: &[String],
    ) -> PathwayResult<Box<dyn Iterator<Item = PathwayResult<Path>> + '_>> {
        match self.kind {
            PathKind::Local => local::walk(self, globs),
            _ => Err(Box::new(PathwayError::unsupported("walk", self.url()))),
        }
    }

    pub fn open(&self, mode: OpenMode) -> PathwayResult<Stream> {
        self.backend().open(self, mode)
    }

    pub fn open_read(&self) -> PathwayResult<Stream> {
        self.open(OpenMode::Read)
    }

    /// Opens for writing, replacing existing content.
    pub fn open_write(&self) -> PathwayResult<Stream> {
        self.open(OpenMode::Write)
    }

    pub fn open_append(&self) -> PathwayResult<Stream> {
        self.open(OpenMode::Append)
    }

    /// Opens both directions. For http this is a POST exchange.
    pub fn open_read_write(&self) -> PathwayResult<Stream> {
        self.open(OpenMode::ReadWrite)
    }

    pub fn read_to_string(&self) -> PathwayResult<String> {
        let mut stream = self.open_read()?;
        let text = stream.read_to_string()?;
        stream.close()?;
        Ok(text)
    }

    pub fn write_string(&self, text: &str) -> PathwayResult<()> {
        let mut stream = self.open_write()?;
        stream.print(text)?;
        stream.close()
    }

    /// Tracks this path for changes of length or modification time.
    pub fn create_dependency(&self) -> PathDependency {
        PathDependency::new(self.clone())
    }

    /// Like [`create_dependency`](Path::create_dependency), but a missing resource is never
    /// reported as modified.
    pub fn create_optional_dependency(&self) -> PathDependency {
        PathDependency::optional(self.clone())
    }

    /// Also compares a content digest, catching edits that keep length and time.
    pub fn create_digest_dependency(&self) -> PathDependency {
        PathDependency::with_digest(self.clone())
    }
}

impl Clone for Path {
    fn clone(&self) -> Self {
        Path {
            kind: self.kind.clone(),
            root: self.root.clone(),
            path: self.path.clone(),
            query: self.query.clone(),
            user_path: self.user_path.clone(),
            attributes: self.attributes.clone(),
            schemes: self.schemes.clone(),
            context: self.context.clone(),
            stat_cache: Mutex::new(self.stat_cache.lock().clone()),
        }
    }
}

impl PartialEq for Path {
    fn eq(&self, other: &Self) -> bool {
        self.url() == other.url()
    }
}

impl Eq for Path {}

impl Hash for Path {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.url().hash(state);
    }
}

impl PartialOrd for Path {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Path {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.url().cmp(&other.url())
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Path")
            .field("url", &self.url())
            .field("user_path", &self.user_path)
            .field("sandboxed", &!self.root.is_empty())
            .finish()
    }
}
