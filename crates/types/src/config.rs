//! Configuration for the indexing system.
//!
//! Loaded from the `IndexingSystem` root section of the host's config
//! file. All structs validate their values after deserialization via
//! `validate()`; programmatic construction goes through `bon` builders.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use snafu::Snafu;

/// Hard ceiling on every fan-out parallelism setting.
///
/// Exceeding it is a configuration error, never silently relaxed.
pub const MAX_FANOUT_PARALLELISM: u32 = 10;

/// Configuration validation error.
#[derive(Debug, Snafu)]
pub enum ConfigError {
    /// A configuration value is invalid.
    #[snafu(display("invalid config: {message}"))]
    Validation {
        /// Description of the validation failure.
        message: String,
    },
}

/// Date-time partition bin granularity for sorted indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionBin {
    /// One partition per UTC year (`yyyy`).
    Year,
    /// One partition per UTC month (`yyyyMM`).
    Month,
}

/// Root configuration section `IndexingSystem`.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// Partition count for hash indexes that do not name a scheme.
    /// 0 means one partition per key.
    #[serde(default = "default_max_hash_partitions")]
    #[builder(default = default_max_hash_partitions())]
    pub default_max_hash_index_partitions: u32,

    /// Default bin granularity for sorted date-time indexes.
    #[serde(default = "default_partition_bin")]
    #[builder(default = default_partition_bin())]
    pub default_date_time_partition_bin: PartitionBin,

    /// Name of the storage provider backing indexing-queue state.
    #[serde(default = "default_queue_storage_provider")]
    #[builder(default = default_queue_storage_provider(), into)]
    pub queue_storage_provider: String,

    /// Parallel index applications per queue batch (serial within one
    /// index, parallel across indexes).
    #[serde(default = "default_parallelism")]
    #[builder(default = default_parallelism())]
    pub index_update_parallelism: u32,

    /// Concurrent per-interface enqueues during a grain commit.
    #[serde(default = "default_parallelism")]
    #[builder(default = default_parallelism())]
    pub enqueue_parallelism: u32,

    /// Capacity of the queue processor's in-memory input channel.
    #[serde(default = "default_buffer_size")]
    #[builder(default = default_buffer_size())]
    pub queue_input_buffer_size: u32,

    /// Actions per processed batch; a batch also completes on timeout.
    #[serde(default = "default_buffer_size")]
    #[builder(default = default_buffer_size())]
    pub queue_output_buffer_size: u32,

    /// Maximum time a partial batch waits before processing.
    #[serde(default = "default_buffer_timeout")]
    #[serde(with = "humantime_serde")]
    #[builder(default = default_buffer_timeout())]
    pub queue_output_buffer_timeout: Duration,

    /// Storage-bridge retry policy for optimistic-concurrency conflicts.
    #[serde(default)]
    #[builder(default)]
    pub storage_retry: StorageRetryConfig,
}

/// Retry policy for persistence writes.
///
/// Conflicts retry with a linearly increasing delay
/// (`base_delay * attempt`); other failures surface immediately.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
pub struct StorageRetryConfig {
    /// Total attempts before the conflict surfaces to the caller.
    #[serde(default = "default_retry_attempts")]
    #[builder(default = default_retry_attempts())]
    pub max_attempts: u32,

    /// Delay after the first failed attempt.
    #[serde(default = "default_retry_base_delay")]
    #[serde(with = "humantime_serde")]
    #[builder(default = default_retry_base_delay())]
    pub base_delay: Duration,
}

impl IndexingConfig {
    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if a parallelism value is
    /// zero or exceeds [`MAX_FANOUT_PARALLELISM`], a buffer size is
    /// zero, or the batch timeout is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("index_update_parallelism", self.index_update_parallelism),
            ("enqueue_parallelism", self.enqueue_parallelism),
        ] {
            if value == 0 || value > MAX_FANOUT_PARALLELISM {
                return Err(ConfigError::Validation {
                    message: format!(
                        "{name} must be 1-{MAX_FANOUT_PARALLELISM}, got {value}"
                    ),
                });
            }
        }
        for (name, value) in [
            ("queue_input_buffer_size", self.queue_input_buffer_size),
            ("queue_output_buffer_size", self.queue_output_buffer_size),
        ] {
            if value == 0 {
                return Err(ConfigError::Validation {
                    message: format!("{name} must be > 0"),
                });
            }
        }
        if self.queue_output_buffer_timeout.is_zero() {
            return Err(ConfigError::Validation {
                message: "queue_output_buffer_timeout must be > 0".to_string(),
            });
        }
        self.storage_retry.validate()
    }
}

impl StorageRetryConfig {
    /// Validates the retry policy.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if `max_attempts` is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Validation {
                message: "max_attempts must be > 0".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            default_max_hash_index_partitions: default_max_hash_partitions(),
            default_date_time_partition_bin: default_partition_bin(),
            queue_storage_provider: default_queue_storage_provider(),
            index_update_parallelism: default_parallelism(),
            enqueue_parallelism: default_parallelism(),
            queue_input_buffer_size: default_buffer_size(),
            queue_output_buffer_size: default_buffer_size(),
            queue_output_buffer_timeout: default_buffer_timeout(),
            storage_retry: StorageRetryConfig::default(),
        }
    }
}

impl Default for StorageRetryConfig {
    fn default() -> Self {
        Self { max_attempts: default_retry_attempts(), base_delay: default_retry_base_delay() }
    }
}

/// Host configuration root; the indexing section lives under the
/// `IndexingSystem` key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RootConfig {
    /// Indexing system configuration.
    #[serde(rename = "IndexingSystem", default)]
    pub indexing: IndexingConfig,
}

fn default_max_hash_partitions() -> u32 {
    0
}

fn default_partition_bin() -> PartitionBin {
    PartitionBin::Year
}

fn default_queue_storage_provider() -> String {
    "memory".to_string()
}

fn default_parallelism() -> u32 {
    10
}

fn default_buffer_size() -> u32 {
    10
}

fn default_buffer_timeout() -> Duration {
    Duration::from_millis(100)
}

fn default_retry_attempts() -> u32 {
    10
}

fn default_retry_base_delay() -> Duration {
    Duration::from_millis(20)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = IndexingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.index_update_parallelism, 10);
        assert_eq!(config.queue_output_buffer_timeout, Duration::from_millis(100));
        assert_eq!(config.default_max_hash_index_partitions, 0);
    }

    #[test]
    fn test_parallelism_above_cap_is_rejected() {
        let config = IndexingConfig::builder().index_update_parallelism(11).build();
        let err = config.validate().expect_err("cap exceeded");
        assert!(err.to_string().contains("index_update_parallelism"));
    }

    #[test]
    fn test_zero_parallelism_is_rejected() {
        let config = IndexingConfig::builder().enqueue_parallelism(0).build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder_partial_override() {
        let config = IndexingConfig::builder()
            .default_max_hash_index_partitions(4)
            .queue_output_buffer_size(25)
            .build();
        assert_eq!(config.default_max_hash_index_partitions, 4);
        assert_eq!(config.queue_output_buffer_size, 25);
        assert_eq!(config.enqueue_parallelism, 10);
    }

    #[test]
    fn test_root_config_defaults_validate() {
        let root = RootConfig::default();
        assert!(root.indexing.validate().is_ok());
    }

    #[test]
    fn test_retry_defaults() {
        let retry = StorageRetryConfig::default();
        assert_eq!(retry.max_attempts, 10);
        assert_eq!(retry.base_delay, Duration::from_millis(20));
    }
}
