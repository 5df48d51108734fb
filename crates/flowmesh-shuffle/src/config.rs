//! Reduce table tuning knobs.
//!
//! Shared by both table variants. `num_partitions` equals the number of
//! shuffle destination workers; the remaining knobs trade memory for flush
//! frequency and probe cost.

use flowmesh_core::{EngineConfig, Error, Result};

#[derive(Debug, Clone)]
pub struct ReduceTableConfig {
    /// Number of partitions; one emitter and one storage stripe each.
    pub num_partitions: usize,
    /// Slots (probing) or bucket heads (chaining) per partition at birth.
    pub init_scale: usize,
    /// Growth factor on resize.
    pub resize_scale: usize,
    /// Probe distance that triggers a resize (probing variant only).
    pub max_probe_distance: usize,
    /// Partition fill ratio that triggers a resize.
    pub max_partition_fill_ratio: f64,
    /// Table item count that triggers flushing the largest partition.
    pub max_table_items: usize,
}

impl ReduceTableConfig {
    pub fn new(num_partitions: usize) -> Self {
        Self::from_engine(&EngineConfig::default(), num_partitions)
    }

    /// Table knobs from the engine configuration.
    pub fn from_engine(config: &EngineConfig, num_partitions: usize) -> Self {
        Self {
            num_partitions,
            init_scale: config.reduce_table_init_scale,
            resize_scale: config.reduce_table_resize_scale,
            max_probe_distance: config.reduce_table_max_probe,
            max_partition_fill_ratio: config.reduce_table_max_fill_ratio,
            max_table_items: config.reduce_table_max_items,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_partitions == 0 {
            return Err(Error::InvalidArgument(
                "reduce table needs at least one partition".into(),
            ));
        }
        if self.init_scale == 0 {
            return Err(Error::InvalidArgument("init_scale must be > 0".into()));
        }
        if self.resize_scale < 2 {
            return Err(Error::InvalidArgument("resize_scale must be >= 2".into()));
        }
        if !(self.max_partition_fill_ratio > 0.0 && self.max_partition_fill_ratio <= 1.0) {
            return Err(Error::InvalidArgument(format!(
                "max_partition_fill_ratio {} outside (0, 1]",
                self.max_partition_fill_ratio
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_engine_config() {
        let table = ReduceTableConfig::new(4);
        let engine = EngineConfig::default();
        assert_eq!(table.init_scale, engine.reduce_table_init_scale);
        assert_eq!(table.max_table_items, engine.reduce_table_max_items);
        table.validate().unwrap();
    }

    #[test]
    fn test_zero_partitions_rejected() {
        assert!(ReduceTableConfig::new(0).validate().is_err());
    }
}
