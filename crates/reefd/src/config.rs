//! TOML configuration for the Reef daemon.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reef_engine::EngineConfig;
use reef_types::checksum::HashAlgorithm;
use serde::Deserialize;

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Disk set.
    pub node: NodeSection,
    /// Engine tuning.
    pub storage: StorageSection,
    /// Logging configuration.
    pub log: LogSection,
}

/// `[node]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    /// Export paths of the disk set, in slot order. Must be an even
    /// count between 6 and 16.
    pub disks: Vec<PathBuf>,
}

/// `[storage]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Backend type: `"file"` (default) or `"memory"` (volatile, for
    /// experiments).
    pub backend: Option<String>,
    /// Disk count when the memory backend is selected. Defaults to 6.
    pub memory_disks: Option<usize>,
    /// Erasure block size in bytes. Defaults to 10 MiB.
    pub block_size: Option<u64>,
    /// Bit-rot hash algorithm: `"blake3"` (default) or `"sha256"`.
    pub algorithm: Option<String>,
    /// Byte cap for the metadata cache. 0 disables it.
    pub meta_cache_bytes: Option<u64>,
    /// Walker send timeout in seconds. Defaults to 60.
    pub walker_timeout_secs: Option<u64>,
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`, `"warn"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl CliConfig {
    /// Load config from a TOML file, or defaults if no path is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)?;
                Ok(toml::from_str(&content)?)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse config from a TOML string (used in tests).
    #[cfg(test)]
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Selected storage backend name.
    pub fn backend(&self) -> &str {
        self.storage.backend.as_deref().unwrap_or("file")
    }

    /// Disk count for the memory backend.
    pub fn memory_disks(&self) -> usize {
        self.storage.memory_disks.unwrap_or(6)
    }

    /// Build the engine configuration this file describes.
    pub fn engine_config(&self) -> anyhow::Result<EngineConfig> {
        let mut config = EngineConfig::default();
        if let Some(block_size) = self.storage.block_size {
            anyhow::ensure!(block_size > 0, "block_size must be positive");
            config.block_size = block_size;
        }
        if let Some(algorithm) = self.storage.algorithm.as_deref() {
            config.algorithm = match algorithm {
                "blake3" => HashAlgorithm::Blake3,
                "sha256" => HashAlgorithm::Sha256,
                other => anyhow::bail!("unknown hash algorithm: {other:?}"),
            };
        }
        if let Some(cache) = self.storage.meta_cache_bytes {
            config.meta_cache_bytes = cache;
        }
        if let Some(secs) = self.storage.walker_timeout_secs {
            config.walker_send_timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[node]
disks = ["/mnt/d1", "/mnt/d2", "/mnt/d3", "/mnt/d4", "/mnt/d5", "/mnt/d6"]

[storage]
block_size = 5242880
algorithm = "sha256"
meta_cache_bytes = 1048576
walker_timeout_secs = 30

[log]
level = "debug"
"#;
        let config = CliConfig::from_toml(toml).unwrap();
        assert_eq!(config.node.disks.len(), 6);
        assert_eq!(config.log.level, "debug");

        let engine = config.engine_config().unwrap();
        assert_eq!(engine.block_size, 5 * 1024 * 1024);
        assert_eq!(engine.algorithm, HashAlgorithm::Sha256);
        assert_eq!(engine.meta_cache_bytes, 1048576);
        assert_eq!(engine.walker_send_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_parse_minimal_config() {
        let config = CliConfig::from_toml("").unwrap();
        assert!(config.node.disks.is_empty());
        assert_eq!(config.backend(), "file");
        assert_eq!(config.memory_disks(), 6);
        assert_eq!(config.log.level, "info");
        let engine = config.engine_config().unwrap();
        assert_eq!(engine.block_size, reef_types::DEFAULT_BLOCK_SIZE);
        assert_eq!(engine.algorithm, HashAlgorithm::Blake3);
    }

    #[test]
    fn test_memory_backend_config() {
        let config =
            CliConfig::from_toml("[storage]\nbackend = \"memory\"\nmemory_disks = 8\n").unwrap();
        assert_eq!(config.backend(), "memory");
        assert_eq!(config.memory_disks(), 8);
    }

    #[test]
    fn test_unknown_algorithm_rejected() {
        let config = CliConfig::from_toml("[storage]\nalgorithm = \"md5\"\n").unwrap();
        assert!(config.engine_config().is_err());
    }

    #[test]
    fn test_zero_block_size_rejected() {
        let config = CliConfig::from_toml("[storage]\nblock_size = 0\n").unwrap();
        assert!(config.engine_config().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reef.toml");
        std::fs::write(&path, "[log]\nlevel = \"warn\"\n").unwrap();
        let config = CliConfig::load(Some(&path)).unwrap();
        assert_eq!(config.log.level, "warn");
    }
}
