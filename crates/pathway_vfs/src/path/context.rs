use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::buffer::BufferPool;
use crate::stream::{StreamOptions, TlsConnector};

use super::cache::PathCache;

/// Timeouts and identification used by network schemes.
#[derive(Debug, Clone)]
pub struct NetworkOptions {
    pub connect_timeout: Duration,
    /// `None` blocks without limit.
    pub read_timeout: Option<Duration>,
    pub user_agent: String,
}

impl Default for NetworkOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            read_timeout: Some(Duration::from_secs(30)),
            user_agent: concat!("pathway/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Runtime services every path of one runtime shares.
///
/// The cache is held weakly: cached paths point back at this context, and the runtime
/// owns the cache.
pub(crate) struct PathContext {
    pub pool: BufferPool,
    pub stream: StreamOptions,
    pub network: NetworkOptions,
    pub tls: Option<Arc<dyn TlsConnector>>,
    pub windows_paths: bool,
    pub cache: Weak<PathCache>,
}

impl PathContext {
    pub fn cache(&self) -> Option<Arc<PathCache>> {
        self.cache.upgrade()
    }
}

impl fmt::Debug for PathContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathContext")
            .field("pool", &self.pool)
            .field("windows_paths", &self.windows_paths)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

#[cfg(test)]
impl PathContext {
    /// A context without cache or tls for unit tests.
    pub fn for_tests(windows_paths: bool) -> Arc<Self> {
        Arc::new(Self {
            pool: BufferPool::new(64, 16),
            stream: StreamOptions::default(),
            network: NetworkOptions::default(),
            tls: None,
            windows_paths,
            cache: Weak::new(),
        })
    }
}
