//! Transfer configuration, passed explicitly into the listener and sessions.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::hash::{DEFAULT_HASH_CHUNK_SIZE, HashAlgorithm};

/// Default TCP port for the listener and for senders.
pub const DEFAULT_PORT: u16 = 8888;

/// Default chunk size for socket and disk I/O: 32 KB.
pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

/// Default per-poll socket timeout. Blocking accept/read/write calls wake up
/// this often to check for cancellation.
pub const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(1);

/// Default time a peer may go silent mid-session before the session fails.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

pub const DEFAULT_RECEIVED_DIR: &str = "received_files";

/// Default observer polling interval (50 ms).
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(50);

/// Upper bound on the descriptor payload (10 MB).
pub const DEFAULT_MAX_METADATA_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct TransferConfig {
    pub port: u16,
    pub buffer_size: usize,
    pub socket_timeout: Duration,
    pub idle_timeout: Duration,
    pub received_dir: PathBuf,
    pub hash_chunk_size: usize,
    pub hash_algorithm: HashAlgorithm,
    pub progress_interval: Duration,
    pub max_metadata_size: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            buffer_size: DEFAULT_BUFFER_SIZE,
            socket_timeout: DEFAULT_SOCKET_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            received_dir: PathBuf::from(DEFAULT_RECEIVED_DIR),
            hash_chunk_size: DEFAULT_HASH_CHUNK_SIZE,
            hash_algorithm: HashAlgorithm::default(),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            max_metadata_size: DEFAULT_MAX_METADATA_SIZE,
        }
    }
}

impl TransferConfig {
    /// Defaults overlaid with any `LANXFER_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with whatever `lookup` returns for each `LANXFER_*` key.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("LANXFER_PORT") {
            config.port = parse("LANXFER_PORT", &v)?;
        }
        if let Some(v) = lookup("LANXFER_BUFFER_SIZE") {
            config.buffer_size = parse("LANXFER_BUFFER_SIZE", &v)?;
        }
        if let Some(v) = lookup("LANXFER_SOCKET_TIMEOUT_MS") {
            config.socket_timeout = Duration::from_millis(parse("LANXFER_SOCKET_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = lookup("LANXFER_IDLE_TIMEOUT_SECS") {
            config.idle_timeout = Duration::from_secs(parse("LANXFER_IDLE_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = lookup("LANXFER_RECEIVED_DIR") {
            config.received_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("LANXFER_HASH_CHUNK_SIZE") {
            config.hash_chunk_size = parse("LANXFER_HASH_CHUNK_SIZE", &v)?;
        }
        if let Some(v) = lookup("LANXFER_HASH_ALGORITHM") {
            config.hash_algorithm = parse("LANXFER_HASH_ALGORITHM", &v)?;
        }
        if let Some(v) = lookup("LANXFER_PROGRESS_INTERVAL_MS") {
            config.progress_interval =
                Duration::from_millis(parse("LANXFER_PROGRESS_INTERVAL_MS", &v)?);
        }
        if let Some(v) = lookup("LANXFER_MAX_METADATA_SIZE") {
            config.max_metadata_size = parse("LANXFER_MAX_METADATA_SIZE", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &'static str, value: String| Err(ConfigError::Invalid { key, value });

        if self.buffer_size == 0 {
            return invalid("buffer_size", "0".into());
        }
        if self.hash_chunk_size == 0 {
            return invalid("hash_chunk_size", "0".into());
        }
        if self.socket_timeout.is_zero() {
            return invalid("socket_timeout", "0".into());
        }
        if self.idle_timeout < self.socket_timeout {
            return invalid("idle_timeout", format!("{:?}", self.idle_timeout));
        }
        if self.progress_interval.is_zero() {
            return invalid("progress_interval", "0".into());
        }
        if self.max_metadata_size == 0 || self.max_metadata_size > u32::MAX as usize {
            return invalid("max_metadata_size", self.max_metadata_size.to_string());
        }
        Ok(())
    }
}

fn parse<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = TransferConfig::default();
        assert_eq!(config.port, 8888);
        assert_eq!(config.buffer_size, 32 * 1024);
        assert_eq!(config.socket_timeout, Duration::from_secs(1));
        assert_eq!(config.received_dir, PathBuf::from("received_files"));
        assert_eq!(config.hash_chunk_size, 8192);
        assert_eq!(config.hash_algorithm, HashAlgorithm::Sha256);
        assert_eq!(config.progress_interval, Duration::from_millis(50));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let config = TransferConfig::from_lookup(lookup(&[
            ("LANXFER_PORT", "9999"),
            ("LANXFER_BUFFER_SIZE", "65536"),
            ("LANXFER_SOCKET_TIMEOUT_MS", "250"),
            ("LANXFER_RECEIVED_DIR", "/tmp/inbox"),
            ("LANXFER_HASH_ALGORITHM", "sha512"),
        ]))
        .unwrap();
        assert_eq!(config.port, 9999);
        assert_eq!(config.buffer_size, 65536);
        assert_eq!(config.socket_timeout, Duration::from_millis(250));
        assert_eq!(config.received_dir, PathBuf::from("/tmp/inbox"));
        assert_eq!(config.hash_algorithm, HashAlgorithm::Sha512);
        // Untouched keys keep their defaults.
        assert_eq!(config.hash_chunk_size, 8192);
    }

    #[test]
    fn test_rejects_bad_values() {
        let err = TransferConfig::from_lookup(lookup(&[("LANXFER_PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "LANXFER_PORT", .. }));

        let err =
            TransferConfig::from_lookup(lookup(&[("LANXFER_HASH_ALGORITHM", "crc32")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "LANXFER_HASH_ALGORITHM", .. }));

        let err = TransferConfig::from_lookup(lookup(&[("LANXFER_BUFFER_SIZE", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "buffer_size", .. }));
    }
}
