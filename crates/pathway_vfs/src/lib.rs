/* 📖 # What is pathway_vfs?

A virtual path layer: strings like `/etc/hosts`, `http://example.com/a?b`, `tcp://host:7`
or `memory:/scratch` resolve to one `Path` type with a uniform stat and open surface. Opened
paths produce a buffered `Stream` drawing its buffers from a shared pool, and paths can be
watched for changes through dependencies.

Layering, leaves first:
- buffer: pooled fixed-size nodes and chains of them
- pipe: bounded in-process reader/writer pair
- stream: buffered I/O over raw transports
- path: resolution, caching, sandboxing and per-scheme backends
- depend: change detection over a path's stat surface
- runtime: owns the pool, cache and scheme map
*/

pub mod buffer;
pub mod config;
pub mod depend;
pub mod path;
pub mod pipe;
pub mod runtime;
pub mod stream;

#[cfg(test)]
mod vfs_tests;

pub use buffer::{BufferChain, BufferNode, BufferPool, PoolStats};
pub use config::{VfsConfig, load_config};
pub use depend::{Dependency, DependencyContainer, PathDependency};
pub use path::{FileType, Path, PathKind, PathStat, SchemeMap};
pub use runtime::{VfsRuntime, VfsRuntimeBuilder};
pub use stream::{Encoding, OpenMode, ReadStatus, Stream, StreamOptions, Transport};
