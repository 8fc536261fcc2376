use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::breaker::BreakerConfig;
use crate::error::{CacheError, CacheResult};

/// Cache configuration.
///
/// Every field has a default so a partial TOML file (or none at all) still
/// yields a usable configuration. Call [`CacheConfig::validate`] before use;
/// `TieredCache` constructors do it for you.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Backing store URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_remote_endpoint")]
    pub remote_endpoint: String,

    /// Backing store connection pool size
    #[serde(default = "default_remote_pool_size")]
    pub remote_pool_size: usize,

    /// Local (L1) cache max entries
    #[serde(default = "default_local_max_entries")]
    pub local_max_entries: u64,

    /// TTL for local entries when none is given or the remote TTL is unknown
    #[serde(default = "default_local_default_ttl_seconds")]
    pub local_default_ttl_seconds: u64,

    /// Serialized payloads longer than this are compressed
    #[serde(default = "default_compression_threshold_bytes")]
    pub compression_threshold_bytes: usize,

    /// Consecutive remote failures before the breaker opens
    #[serde(default = "default_breaker_failure_threshold")]
    pub breaker_failure_threshold: u32,

    /// Delay between the breaker opening and the recovery probe
    #[serde(default = "default_breaker_recovery_delay_seconds")]
    pub breaker_recovery_delay_seconds: u64,

    /// Bound applied to every remote operation
    #[serde(default = "default_remote_operation_timeout_seconds")]
    pub remote_operation_timeout_seconds: u64,

    /// `COUNT` hint per SCAN round during pattern invalidation
    #[serde(default = "default_scan_batch_size")]
    pub scan_batch_size: usize,

    /// Hard cap on SCAN rounds per pattern invalidation
    #[serde(default = "default_scan_max_rounds")]
    pub scan_max_rounds: u32,

    /// Reserved key prefix for the tag index sets
    #[serde(default = "default_index_prefix")]
    pub index_prefix: String,

    /// Pub/sub channel for cross-instance L1 invalidation (disabled when unset)
    #[serde(default)]
    pub invalidation_channel: Option<String>,
}

fn default_remote_endpoint() -> String {
    "redis://localhost:6379".to_string()
}

fn default_remote_pool_size() -> usize {
    10
}

fn default_local_max_entries() -> u64 {
    10_000
}

fn default_local_default_ttl_seconds() -> u64 {
    300
}

fn default_compression_threshold_bytes() -> usize {
    1024
}

fn default_breaker_failure_threshold() -> u32 {
    5
}

fn default_breaker_recovery_delay_seconds() -> u64 {
    30
}

fn default_remote_operation_timeout_seconds() -> u64 {
    2
}

fn default_scan_batch_size() -> usize {
    100
}

fn default_scan_max_rounds() -> u32 {
    10_000
}

fn default_index_prefix() -> String {
    "__tiercache:".to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            remote_endpoint: default_remote_endpoint(),
            remote_pool_size: default_remote_pool_size(),
            local_max_entries: default_local_max_entries(),
            local_default_ttl_seconds: default_local_default_ttl_seconds(),
            compression_threshold_bytes: default_compression_threshold_bytes(),
            breaker_failure_threshold: default_breaker_failure_threshold(),
            breaker_recovery_delay_seconds: default_breaker_recovery_delay_seconds(),
            remote_operation_timeout_seconds: default_remote_operation_timeout_seconds(),
            scan_batch_size: default_scan_batch_size(),
            scan_max_rounds: default_scan_max_rounds(),
            index_prefix: default_index_prefix(),
            invalidation_channel: None,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> CacheResult<()> {
        fn invalid(msg: &str) -> CacheResult<()> {
            Err(CacheError::invalid_configuration(msg))
        }

        if self.remote_endpoint.trim().is_empty() {
            return invalid("remote_endpoint must not be empty");
        }
        if self.remote_pool_size == 0 {
            return invalid("remote_pool_size must be > 0");
        }
        if self.local_max_entries == 0 {
            return invalid("local_max_entries must be > 0");
        }
        if self.local_default_ttl_seconds == 0 {
            return invalid("local_default_ttl_seconds must be > 0");
        }
        if self.breaker_failure_threshold == 0 {
            return invalid("breaker_failure_threshold must be > 0");
        }
        if self.breaker_recovery_delay_seconds == 0 {
            return invalid("breaker_recovery_delay_seconds must be > 0");
        }
        if self.remote_operation_timeout_seconds == 0 {
            return invalid("remote_operation_timeout_seconds must be > 0");
        }
        if self.scan_batch_size == 0 {
            return invalid("scan_batch_size must be > 0");
        }
        if self.scan_max_rounds == 0 {
            return invalid("scan_max_rounds must be > 0");
        }
        if self.index_prefix.is_empty() {
            return invalid("index_prefix must not be empty");
        }
        if self
            .invalidation_channel
            .as_deref()
            .is_some_and(|c| c.trim().is_empty())
        {
            return invalid("invalidation_channel must not be empty when set");
        }
        Ok(())
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(s: &str) -> CacheResult<Self> {
        let cfg: CacheConfig = toml::from_str(s)
            .map_err(|e| CacheError::invalid_configuration(format!("config parse error: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn local_default_ttl(&self) -> Duration {
        Duration::from_secs(self.local_default_ttl_seconds)
    }

    pub fn remote_operation_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_operation_timeout_seconds)
    }

    pub fn breaker(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.breaker_failure_threshold,
            recovery_delay: Duration::from_secs(self.breaker_recovery_delay_seconds),
        }
    }
}

pub mod loader {
    use super::CacheConfig;
    use crate::error::{CacheError, CacheResult};
    use config::{Config, Environment, File};
    use std::path::{Path, PathBuf};

    /// Default configuration file looked up when no path is given.
    pub const DEFAULT_CONFIG_FILE: &str = "tiercache.toml";

    pub fn load_config(path: Option<&str>) -> CacheResult<CacheConfig> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                let pathbuf = PathBuf::from(p);
                if !pathbuf.exists() {
                    return Err(CacheError::invalid_configuration(format!(
                        "config file not found: {p}"
                    )));
                }
                builder = builder.add_source(File::from(pathbuf));
            }
            None => {
                let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        // Environment variable overrides, e.g., TIERCACHE__LOCAL_MAX_ENTRIES=5000
        builder = builder.add_source(
            Environment::with_prefix("TIERCACHE")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| CacheError::invalid_configuration(format!("config build error: {e}")))?;
        let merged: CacheConfig = cfg.try_deserialize().map_err(|e| {
            CacheError::invalid_configuration(format!("config deserialize error: {e}"))
        })?;
        merged.validate()?;
        Ok(merged)
    }

    pub fn load_config_from_path<P: AsRef<Path>>(path: Option<P>) -> CacheResult<CacheConfig> {
        let p = path
            .as_ref()
            .map(|p| p.as_ref().to_string_lossy().to_string());
        load_config(p.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = CacheConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.compression_threshold_bytes, 1024);
        assert_eq!(cfg.breaker_failure_threshold, 5);
        assert_eq!(cfg.breaker_recovery_delay_seconds, 30);
        assert_eq!(cfg.breaker().recovery_delay, Duration::from_secs(30));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let cfg = CacheConfig::from_toml_str(
            r#"
            remote_endpoint = "redis://cache:6380"
            local_max_entries = 500
            invalidation_channel = "tiercache:invalidate"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.remote_endpoint, "redis://cache:6380");
        assert_eq!(cfg.local_max_entries, 500);
        assert_eq!(cfg.scan_batch_size, 100);
        assert_eq!(
            cfg.invalidation_channel.as_deref(),
            Some("tiercache:invalidate")
        );
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        let cases = [
            "local_max_entries = 0",
            "breaker_failure_threshold = 0",
            "breaker_recovery_delay_seconds = 0",
            "remote_operation_timeout_seconds = 0",
            "scan_batch_size = 0",
            "remote_endpoint = \"  \"",
            "invalidation_channel = \"\"",
        ];
        for case in cases {
            let err = CacheConfig::from_toml_str(case).unwrap_err();
            assert!(
                matches!(err, CacheError::InvalidConfiguration(_)),
                "{case} should be rejected"
            );
        }
    }

    #[test]
    fn test_loader_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiercache.toml");
        std::fs::write(
            &path,
            "local_default_ttl_seconds = 42\ncompression_threshold_bytes = 2048\n",
        )
        .unwrap();

        let cfg = loader::load_config_from_path(Some(&path)).unwrap();
        assert_eq!(cfg.local_default_ttl(), Duration::from_secs(42));
        assert_eq!(cfg.compression_threshold_bytes, 2048);
    }

    #[test]
    fn test_loader_missing_explicit_file_is_an_error() {
        let err = loader::load_config(Some("/nonexistent/tiercache.toml")).unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }
}
