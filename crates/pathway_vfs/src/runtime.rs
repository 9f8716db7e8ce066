use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use pathway_base::{PathwayError, PathwayResult};

use crate::buffer::BufferPool;
use crate::config::VfsConfig;
use crate::depend::DependencyContainer;
use crate::path::{
    CacheStats, MemoryFs, NetAddress, Path, PathCache, PathContext, PathKind, SchemeMap,
};
use crate::pipe::pipe;
use crate::stream::{LoopbackTransport, Stream, TlsConnector};

/* 📖 # Why an explicit runtime object instead of globals?

The lookup cache, the buffer pool and the default scheme map are shared state. Owning them
in one value means two runtimes (say two tests) never see each other's cache entries or
memory files, and dropping the runtime releases everything. Paths keep the runtime's services
alive through a shared context, but the cache is only referenced weakly so cached paths do not
keep the cache itself alive.
*/

struct RuntimeInner {
    config: VfsConfig,
    context: Arc<PathContext>,
    cache: Arc<PathCache>,
    schemes: SchemeMap,
    memory: MemoryFs,
}

/// Handle to a path resolution runtime. Clones share the same runtime.
#[derive(Clone)]
pub struct VfsRuntime(Arc<RuntimeInner>);

/// Assembles a [`VfsRuntime`].
#[derive(Default)]
pub struct VfsRuntimeBuilder {
    config: VfsConfig,
    tls: Option<Arc<dyn TlsConnector>>,
}

impl VfsRuntimeBuilder {
    pub fn config(mut self, config: VfsConfig) -> Self {
        self.config = config;
        self
    }

    /// Enables the https scheme.
    pub fn tls_connector(mut self, connector: Arc<dyn TlsConnector>) -> Self {
        self.tls = Some(connector);
        self
    }

    pub fn build(self) -> PathwayResult<VfsRuntime> {
        self.config.validate()?;
        Ok(VfsRuntime::assemble(self.config, self.tls))
    }
}

impl VfsRuntime {
    pub fn builder() -> VfsRuntimeBuilder {
        VfsRuntimeBuilder::default()
    }

    pub fn new(config: VfsConfig) -> PathwayResult<Self> {
        Self::builder().config(config).build()
    }

    fn assemble(config: VfsConfig, tls: Option<Arc<dyn TlsConnector>>) -> Self {
        let pool = BufferPool::new(config.buffer.node_size, config.buffer.max_free_nodes);
        let cache = Arc::new(PathCache::new(config.cache.capacity));
        let context = Arc::new(PathContext {
            pool: pool.clone(),
            stream: config.stream.options(),
            network: config.network.options(),
            tls,
            windows_paths: config.platform.windows_paths,
            cache: Arc::downgrade(&cache),
        });
        let memory = MemoryFs::new(pool);
        let unbound = |port| NetAddress {
            host: String::new(),
            port,
        };

        let mut schemes = SchemeMap::empty();
        schemes.insert("file", Path::prototype(PathKind::Local, context.clone()));
        schemes.insert(
            "http",
            Path::prototype(PathKind::Http(unbound(80)), context.clone()),
        );
        schemes.insert(
            "https",
            Path::prototype(PathKind::Https(unbound(443)), context.clone()),
        );
        schemes.insert(
            "tcp",
            Path::prototype(PathKind::Tcp(unbound(0)), context.clone()),
        );
        schemes.insert(
            "memory",
            Path::prototype(PathKind::Memory(memory.clone()), context.clone()),
        );
        info!(
            schemes = ?schemes.names(),
            node_size = config.buffer.node_size,
            cache_capacity = config.cache.capacity,
            tls = context.tls.is_some(),
            "created path runtime"
        );
        Self(Arc::new(RuntimeInner {
            config,
            context,
            cache,
            schemes,
            memory,
        }))
    }

    /// The local root `/`, resolving with the default scheme map.
    pub fn root(&self) -> Path {
        Path::prototype(PathKind::Local, self.0.context.clone()).with_schemes(self.0.schemes.clone())
    }

    /// Root of the runtime's memory file system.
    pub fn memory_root(&self) -> Path {
        Path::prototype(PathKind::Memory(self.0.memory.clone()), self.0.context.clone())
            .with_schemes(self.0.schemes.clone())
    }

    /// The process working directory.
    pub fn pwd(&self) -> PathwayResult<Path> {
        let current = env::current_dir().map_err(|e| {
            debug!(error = %e, "failed to get current directory");
            Box::new(PathwayError::file("<current_dir>", e))
        })?;
        self.root().lookup(&current.to_string_lossy())
    }

    /// Resolves `user_path` relative to the working directory.
    pub fn lookup(&self, user_path: &str) -> PathwayResult<Path> {
        self.pwd()?.lookup(user_path)
    }

    pub fn resolve(&self, base: &Path, user_path: &str) -> PathwayResult<Path> {
        base.lookup(user_path)
    }

    pub fn resolve_with(
        &self,
        base: &Path,
        user_path: &str,
        attributes: &BTreeMap<String, String>,
    ) -> PathwayResult<Path> {
        base.lookup_with(user_path, Some(attributes))
    }

    /// A connected reader/writer stream pair buffering one pool node.
    pub fn pipe(&self) -> (Stream, Stream) {
        let (reader, writer) = pipe(self.pool().node_size());
        let options = &self.0.context.stream;
        (
            Stream::new(reader, self.pool().clone(), options.clone()),
            Stream::new(writer, self.pool().clone(), options.clone()),
        )
    }

    /// A duplex in-memory stream that reads back what was written to it.
    pub fn temp_stream(&self) -> Stream {
        Stream::new(
            LoopbackTransport::new(self.pool().clone()),
            self.pool().clone(),
            self.0.context.stream.clone(),
        )
    }

    /// An empty container using the configured check interval.
    pub fn dependency_container(&self) -> DependencyContainer {
        DependencyContainer::with_check_interval(self.0.config.dependency.check_interval_ms)
    }

    pub fn pool(&self) -> &BufferPool {
        &self.0.context.pool
    }

    pub fn schemes(&self) -> &SchemeMap {
        &self.0.schemes
    }

    pub fn config(&self) -> &VfsConfig {
        &self.0.config
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.0.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.0.cache.clear();
    }
}

impl Default for VfsRuntime {
    fn default() -> Self {
        Self::assemble(VfsConfig::default(), None)
    }
}

impl fmt::Debug for VfsRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VfsRuntime")
            .field("schemes", &self.0.schemes)
            .field("cache", &self.0.cache)
            .field("context", &self.0.context)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::config::VfsConfig;

    #[test]
    fn test_default_schemes_are_registered() {
        let runtime = VfsRuntime::default();
        assert_eq!(
            runtime.schemes().names(),
            vec!["file", "http", "https", "memory", "tcp"]
        );
        assert_eq!(runtime.root().url(), "file:/");
        assert_eq!(runtime.memory_root().url(), "memory:/");
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = VfsConfig::default();
        config.buffer.node_size = 0;
        assert!(VfsRuntime::new(config).is_err());
    }

    #[test]
    fn test_temp_stream_reads_back_writes() {
        let runtime = VfsRuntime::default();
        let mut stream = runtime.temp_stream();
        stream.print("written then read").unwrap();
        assert_eq!(stream.read_to_string().unwrap(), "written then read");
    }

    #[test]
    fn test_utf8_temp_stream_mixes_lines_and_bytes() {
        let mut config = VfsConfig::default();
        config.stream.encoding = crate::stream::Encoding::Utf8;
        let runtime = VfsRuntime::new(config).unwrap();
        let mut stream = runtime.temp_stream();
        stream.print("héllo\nworld").unwrap();
        assert_eq!(stream.read_line().unwrap().as_deref(), Some("héllo"));
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"world");
    }

    #[test]
    fn test_pipe_streams_cross_threads() {
        let mut config = VfsConfig::default();
        config.buffer.node_size = 16;
        let runtime = VfsRuntime::new(config).unwrap();
        let (mut reader, mut writer) = runtime.pipe();
        let producer = thread::spawn(move || {
            for i in 0..50 {
                writer.println(&format!("line {}", i)).unwrap();
            }
            writer.close().unwrap();
        });
        let mut lines = Vec::new();
        while let Some(line) = reader.read_line().unwrap() {
            lines.push(line);
        }
        producer.join().unwrap();
        assert_eq!(lines.len(), 50);
        assert_eq!(lines[49], "line 49");
    }

    #[test]
    fn test_https_without_connector_is_unsupported() {
        let runtime = VfsRuntime::default();
        let path = runtime.root().lookup("https://127.0.0.1:9/").unwrap();
        let error = path.open_read().unwrap_err();
        assert!(error.is_unsupported(), "{}", error);
    }
}
