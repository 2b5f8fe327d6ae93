use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::error::{DbError, Result};

/// Which index structure `create_index` builds and `IndexInfo::open` opens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IndexKind {
    #[default]
    BTree,
    Hash,
}

/// Engine configuration. Every knob is explicit so that two databases can live
/// in one process with different settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    pub db_directory: PathBuf,
    pub block_size: usize,
    pub buffer_pool_size: usize,
    #[serde(with = "millis")]
    pub buffer_pin_timeout: Duration,
    #[serde(with = "millis")]
    pub lock_timeout: Duration,
    pub log_file_name: String,
    /// Number of `get_stat_info` calls between two full statistics rescans
    pub stat_refresh_threshold: usize,
    pub index_kind: IndexKind,
}

impl DbConfig {
    pub const DEFAULT_BLOCK_SIZE: usize = 4096;
    pub const DEFAULT_BUFFER_POOL_SIZE: usize = 20;
    pub const DEFAULT_BUFFER_PIN_TIMEOUT: Duration = Duration::from_millis(10_000);
    pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(10_000);
    pub const DEFAULT_LOG_FILE_NAME: &'static str = "logfile";
    pub const DEFAULT_STAT_REFRESH_THRESHOLD: usize = 100;

    pub fn new<P: AsRef<Path>>(db_directory: P) -> Self {
        Self {
            db_directory: db_directory.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_buffer_pool_size(mut self, buffer_pool_size: usize) -> Self {
        self.buffer_pool_size = buffer_pool_size;
        self
    }

    pub fn with_buffer_pin_timeout(mut self, timeout: Duration) -> Self {
        self.buffer_pin_timeout = timeout;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_log_file_name(mut self, log_file_name: &str) -> Self {
        self.log_file_name = log_file_name.to_string();
        self
    }

    pub fn with_stat_refresh_threshold(mut self, threshold: usize) -> Self {
        self.stat_refresh_threshold = threshold;
        self
    }

    pub fn with_index_kind(mut self, index_kind: IndexKind) -> Self {
        self.index_kind = index_kind;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(DbError::InvalidArgument(
                "block size must be positive".to_string(),
            ));
        }
        if self.buffer_pool_size == 0 {
            return Err(DbError::InvalidArgument(
                "buffer pool needs at least one buffer".to_string(),
            ));
        }
        if self.buffer_pin_timeout.is_zero() {
            return Err(DbError::InvalidArgument(
                "buffer pin timeout must be positive".to_string(),
            ));
        }
        if self.lock_timeout.is_zero() {
            return Err(DbError::InvalidArgument(
                "lock timeout must be positive".to_string(),
            ));
        }
        if self.log_file_name.is_empty() {
            return Err(DbError::InvalidArgument(
                "log file name must not be empty".to_string(),
            ));
        }
        if self.stat_refresh_threshold == 0 {
            return Err(DbError::InvalidArgument(
                "stat refresh threshold must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            db_directory: PathBuf::from("simpledb"),
            block_size: Self::DEFAULT_BLOCK_SIZE,
            buffer_pool_size: Self::DEFAULT_BUFFER_POOL_SIZE,
            buffer_pin_timeout: Self::DEFAULT_BUFFER_PIN_TIMEOUT,
            lock_timeout: Self::DEFAULT_LOCK_TIMEOUT,
            log_file_name: Self::DEFAULT_LOG_FILE_NAME.to_string(),
            stat_refresh_threshold: Self::DEFAULT_STAT_REFRESH_THRESHOLD,
            index_kind: IndexKind::default(),
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod config_tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = DbConfig::new("/tmp/somewhere");
        assert_eq!(config.block_size, 4096);
        assert_eq!(config.buffer_pool_size, 20);
        assert_eq!(config.log_file_name, "logfile");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let base = DbConfig::new("/tmp/somewhere");
        assert!(base.clone().with_block_size(0).validate().is_err());
        assert!(base.clone().with_buffer_pool_size(0).validate().is_err());
        assert!(base
            .clone()
            .with_lock_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(base
            .clone()
            .with_buffer_pin_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(base.with_log_file_name("").validate().is_err());
    }

    #[test]
    fn test_config_serde_round_trip() {
        let config = DbConfig::new("/tmp/db")
            .with_lock_timeout(Duration::from_millis(250))
            .with_index_kind(IndexKind::Hash);
        let bytes = bincode::serde::encode_to_vec(&config, bincode::config::standard()).unwrap();
        let (decoded, _): (DbConfig, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard()).unwrap();
        assert_eq!(decoded.lock_timeout, Duration::from_millis(250));
        assert_eq!(decoded.index_kind, IndexKind::Hash);
        assert_eq!(decoded.db_directory, PathBuf::from("/tmp/db"));
    }
}
