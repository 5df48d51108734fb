//! Engine Configuration
//!
//! One configuration record covers everything the data plane needs to know:
//! cluster shape, block sizing, and reduce-table tuning. Fields all have
//! serde defaults so a partial config file works, and `Default` produces a
//! single-host single-worker engine suitable for tests.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::pool::DEFAULT_BLOCK_SIZE;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of hosts participating in the job.
    #[serde(default = "default_num_hosts")]
    pub num_hosts: usize,

    /// Worker threads per host.
    #[serde(default = "default_workers_per_host")]
    pub workers_per_host: usize,

    /// Size of newly allocated byte blocks.
    #[serde(default = "default_block_size")]
    pub default_block_size: usize,

    /// First TCP port of the host mesh; host `h` listens on `base_port + h`.
    #[serde(default = "default_base_port")]
    pub base_port: u16,

    /// Reduce table: initial slots (or buckets) per partition.
    #[serde(default = "default_table_init_scale")]
    pub reduce_table_init_scale: usize,

    /// Reduce table: growth factor applied on resize.
    #[serde(default = "default_table_resize_scale")]
    pub reduce_table_resize_scale: usize,

    /// Reduce table: item count that triggers flushing the largest partition.
    #[serde(default = "default_max_table_items")]
    pub reduce_table_max_items: usize,

    /// Reduce table: probe distance that triggers a resize (probing variant).
    #[serde(default = "default_max_probe_distance")]
    pub reduce_table_max_probe: usize,

    /// Reduce table: partition fill ratio that triggers a resize.
    #[serde(default = "default_max_fill_ratio")]
    pub reduce_table_max_fill_ratio: f64,
}

fn default_num_hosts() -> usize {
    1
}

fn default_workers_per_host() -> usize {
    1
}

fn default_block_size() -> usize {
    DEFAULT_BLOCK_SIZE
}

fn default_base_port() -> u16 {
    10080
}

fn default_table_init_scale() -> usize {
    10
}

fn default_table_resize_scale() -> usize {
    2
}

fn default_max_table_items() -> usize {
    1 << 20
}

fn default_max_probe_distance() -> usize {
    10
}

fn default_max_fill_ratio() -> f64 {
    0.9
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            num_hosts: default_num_hosts(),
            workers_per_host: default_workers_per_host(),
            default_block_size: default_block_size(),
            base_port: default_base_port(),
            reduce_table_init_scale: default_table_init_scale(),
            reduce_table_resize_scale: default_table_resize_scale(),
            reduce_table_max_items: default_max_table_items(),
            reduce_table_max_probe: default_max_probe_distance(),
            reduce_table_max_fill_ratio: default_max_fill_ratio(),
        }
    }
}

impl EngineConfig {
    /// Total workers across all hosts.
    pub fn num_workers(&self) -> usize {
        self.num_hosts * self.workers_per_host
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_hosts == 0 {
            return Err(Error::InvalidArgument("num_hosts must be > 0".into()));
        }
        if self.workers_per_host == 0 {
            return Err(Error::InvalidArgument(
                "workers_per_host must be > 0".into(),
            ));
        }
        if self.default_block_size == 0 || self.default_block_size > u32::MAX as usize {
            return Err(Error::InvalidArgument(format!(
                "default_block_size {} outside (0, 2^32)",
                self.default_block_size
            )));
        }
        if self.reduce_table_init_scale == 0 {
            return Err(Error::InvalidArgument(
                "reduce_table_init_scale must be > 0".into(),
            ));
        }
        if self.reduce_table_resize_scale < 2 {
            return Err(Error::InvalidArgument(
                "reduce_table_resize_scale must be >= 2".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.reduce_table_max_fill_ratio)
            || self.reduce_table_max_fill_ratio == 0.0
        {
            return Err(Error::InvalidArgument(format!(
                "reduce_table_max_fill_ratio {} outside (0, 1]",
                self.reduce_table_max_fill_ratio
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.num_workers(), 1);
        assert_eq!(config.default_block_size, 2 * 1024 * 1024);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"num_hosts": 4, "workers_per_host": 8}"#).unwrap();
        assert_eq!(config.num_workers(), 32);
        assert_eq!(config.reduce_table_resize_scale, 2);
        assert_eq!(config.base_port, 10080);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = EngineConfig::default();
        config.num_hosts = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.reduce_table_max_fill_ratio = 1.5;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.default_block_size = 0;
        assert!(config.validate().is_err());
    }
}
