use std::fs;
use std::path::Path as NativePath;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, instrument};

use pathway_base::{PathwayError, PathwayResult, ResultExt, bail};

use crate::depend::DEFAULT_CHECK_INTERVAL_MS;
use crate::path::{DEFAULT_CACHE_CAPACITY, NetworkOptions};
use crate::stream::{DEFAULT_ZERO_COPY_THRESHOLD, Encoding, StreamOptions};

/// Configuration of a [`VfsRuntime`](crate::VfsRuntime).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VfsConfig {
    pub buffer: BufferConfig,
    pub cache: CacheConfig,
    pub stream: StreamConfig,
    pub network: NetworkConfig,
    pub dependency: DependencyConfig,
    pub platform: PlatformConfig,
}

/// Buffer pool sizing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BufferConfig {
    /// Bytes per pool node; also the internal buffer size of every stream.
    pub node_size: usize,
    /// Released nodes kept for reuse.
    pub max_free_nodes: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            node_size: 8192,
            max_free_nodes: 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Lookup cache entries; 0 disables caching.
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StreamConfig {
    pub zero_copy_threshold: usize,
    /// Propagate read errors instead of ending the stream.
    pub strict_reads: bool,
    pub encoding: Encoding,
    pub newline: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            zero_copy_threshold: DEFAULT_ZERO_COPY_THRESHOLD,
            strict_reads: false,
            encoding: Encoding::Latin1,
            newline: "\n".to_string(),
        }
    }
}

impl StreamConfig {
    pub fn options(&self) -> StreamOptions {
        StreamOptions {
            zero_copy_threshold: self.zero_copy_threshold,
            strict_reads: self.strict_reads,
            encoding: self.encoding,
            newline: self.newline.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    pub connect_timeout_ms: u64,
    /// 0 waits without limit.
    pub read_timeout_ms: u64,
    pub user_agent: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        let defaults = NetworkOptions::default();
        Self {
            connect_timeout_ms: defaults.connect_timeout.as_millis() as u64,
            read_timeout_ms: defaults
                .read_timeout
                .map_or(0, |timeout| timeout.as_millis() as u64),
            user_agent: defaults.user_agent,
        }
    }
}

impl NetworkConfig {
    pub fn options(&self) -> NetworkOptions {
        NetworkOptions {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            read_timeout: (self.read_timeout_ms > 0)
                .then(|| Duration::from_millis(self.read_timeout_ms)),
            user_agent: self.user_agent.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DependencyConfig {
    /// Minimum time between checks of a dependency container. 0 always checks, negative
    /// never rechecks.
    pub check_interval_ms: i64,
}

impl Default for DependencyConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: DEFAULT_CHECK_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlatformConfig {
    /// Drive designators, backslash separators and reserved device names.
    pub windows_paths: bool,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            windows_paths: cfg!(windows),
        }
    }
}

impl VfsConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(text: &str) -> PathwayResult<Self> {
        let config: VfsConfig = toml::from_str(text).map_err(|e| {
            debug!(error = %e, "failed to parse configuration");
            Box::new(PathwayError::message(format!(
                "Invalid configuration: {}",
                e
            )))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PathwayResult<()> {
        if self.buffer.node_size == 0 {
            bail!("buffer.node_size must be greater than zero");
        }
        if self.stream.newline.is_empty() {
            bail!("stream.newline must not be empty");
        }
        if self.network.connect_timeout_ms == 0 {
            bail!("network.connect_timeout_ms must be greater than zero");
        }
        Ok(())
    }
}

/// Reads a [`VfsConfig`] from a TOML file.
#[instrument]
pub fn load_config(path: &NativePath) -> PathwayResult<VfsConfig> {
    let text = fs::read_to_string(path).map_err(|e| {
        debug!(error = %e, "failed to read configuration file");
        Box::new(PathwayError::file(path, e))
    })?;
    VfsConfig::from_toml_str(&text).with_context(|| format!("Loading {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = VfsConfig::from_toml_str("").unwrap();
        assert_eq!(config.buffer.node_size, 8192);
        assert_eq!(config.cache.capacity, 8192);
        assert_eq!(config.stream.encoding, Encoding::Latin1);
        assert_eq!(config.dependency.check_interval_ms, 2000);
        assert_eq!(
            config.network.options().read_timeout,
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn test_sections_override_defaults() {
        let config = VfsConfig::from_toml_str(
            r#"
            [buffer]
            node_size = 256

            [stream]
            encoding = "UTF-8"
            strict_reads = true
            newline = "\r\n"

            [network]
            read_timeout_ms = 0

            [dependency]
            check_interval_ms = -1

            [platform]
            windows_paths = true
            "#,
        )
        .unwrap();
        assert_eq!(config.buffer.node_size, 256);
        assert_eq!(config.buffer.max_free_nodes, 1024);
        assert_eq!(config.stream.encoding, Encoding::Utf8);
        assert!(config.stream.options().strict_reads);
        assert_eq!(config.stream.newline, "\r\n");
        assert_eq!(config.network.options().read_timeout, None);
        assert_eq!(config.dependency.check_interval_ms, -1);
        assert!(config.platform.windows_paths);
    }

    #[test]
    fn test_invalid_documents_are_rejected() {
        for text in [
            "[stream]\nencoding = \"ebcdic\"",
            "[buffer]\nnode_size = 0",
            "[cache]\nsize = 3",
            "[stream]\nnewline = \"\"",
        ] {
            assert!(VfsConfig::from_toml_str(text).is_err(), "{}", text);
        }
    }

    #[test]
    fn test_load_config_reports_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let error = load_config(&dir.path().join("pathway.toml")).unwrap_err();
        assert!(error.is_not_found());

        let file = dir.path().join("pathway.toml");
        fs::write(&file, "[cache]\ncapacity = 16\n").unwrap();
        assert_eq!(load_config(&file).unwrap().cache.capacity, 16);
    }
}
