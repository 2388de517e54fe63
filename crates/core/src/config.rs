use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use quiverdb_recordstore::{StoreOptions, VolumeKind};

/// Server configuration, deserializable from TOML.
///
/// Every field has a default so a partial (or empty) config file is valid.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// TCP port the RPC transport binds.
    pub port: u16,
    /// Lower bound of the worker pool.
    pub core_threads: usize,
    /// Upper bound of the worker pool.
    pub max_threads: usize,
    /// Idle time after which extra workers exit, in milliseconds.
    pub keep_alive_ms: u64,
    /// Maximum message size in bytes; also the response chunk ceiling.
    pub message_size: usize,
    pub use_tls: bool,
    pub cert_file: Option<PathBuf>,
    pub private_key: Option<PathBuf>,
    /// Data directory.
    pub root: PathBuf,
    /// How long every store open waits for its file lock, in milliseconds.
    pub lock_timeout_ms: u64,
    /// How store files are read back at open time.
    pub volume: VolumeKind,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            port: 1865,
            core_threads: parallelism,
            max_threads: parallelism * 2,
            keep_alive_ms: 60_000,
            message_size: 4 * 1024 * 1024,
            use_tls: false,
            cert_file: None,
            private_key: None,
            root: PathBuf::from("data"),
            lock_timeout_ms: 1_000,
            volume: VolumeKind::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_toml(input: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.core_threads == 0 {
            anyhow::bail!("core_threads must be at least 1");
        }
        if self.max_threads < self.core_threads {
            anyhow::bail!(
                "max_threads ({}) must not be below core_threads ({})",
                self.max_threads,
                self.core_threads
            );
        }
        if self.use_tls && (self.cert_file.is_none() || self.private_key.is_none()) {
            anyhow::bail!("use_tls requires both cert_file and private_key");
        }
        Ok(())
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            volume: self.volume,
            lock_timeout: self.lock_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_config_uses_defaults() {
        let config = ServerConfig::from_toml("").unwrap();
        assert_eq!(config.port, 1865);
        assert_eq!(config.volume, VolumeKind::Mmap);
        assert!(!config.use_tls);
    }

    #[test]
    fn parses_recognized_options() {
        let config = ServerConfig::from_toml(
            r#"
            port = 2077
            core_threads = 2
            max_threads = 8
            keep_alive_ms = 500
            message_size = 65536
            root = "/tmp/quiver"
            lock_timeout_ms = 250
            volume = "heap"
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 2077);
        assert_eq!(config.max_threads, 8);
        assert_eq!(config.volume, VolumeKind::Heap);
        assert_eq!(config.lock_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn tls_requires_key_material() {
        assert!(ServerConfig::from_toml("use_tls = true").is_err());
        assert!(ServerConfig::from_toml(
            r#"
            use_tls = true
            cert_file = "server.crt"
            private_key = "server.key"
            "#
        )
        .is_ok());
    }

    #[test]
    fn unknown_options_are_rejected() {
        assert!(ServerConfig::from_toml("flux_capacitor = true").is_err());
    }
}
