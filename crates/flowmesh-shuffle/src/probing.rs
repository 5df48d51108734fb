//! Linear-Probing Reduce Table
//!
//! A flat array of `num_partitions × slots_per_partition` key/value slots.
//! Empty slots hold a caller-provided sentinel key, which therefore must
//! never occur in real data; an insert of the sentinel key is a
//! [`SentinelViolation`](flowmesh_core::Error::SentinelViolation).
//!
//! ## Placement
//!
//! An entry's partition is `hash(key) % P`; its home slot within the
//! partition is `hash(key) % S`. Collisions probe linearly forward,
//! wrapping within the partition. A probe run longer than
//! `max_probe_distance` (or a full wrap) resizes the table instead of
//! degrading further.
//!
//! ## Spill policy
//!
//! Crossing `max_table_items` flushes the fullest partition to its emitter
//! (a partial spill that frees memory without growing). Crossing the
//! partition fill ratio grows the whole table by `resize_scale` and
//! rehashes.

use std::hash::Hash;

use tracing::{debug, trace};

use flowmesh_core::{Error, Item, Result};
use flowmesh_data::BlockSink;

use crate::config::ReduceTableConfig;
use crate::emit::Emitter;
use crate::stable_hash;

pub struct ProbingReduceTable<K, V, KeyFn, ReduceFn, S>
where
    K: Item + Clone + Eq + Hash,
    V: Item + Clone,
    KeyFn: Fn(&V) -> K,
    ReduceFn: Fn(V, V) -> V,
    S: BlockSink,
{
    config: ReduceTableConfig,
    key_fn: KeyFn,
    reduce_fn: ReduceFn,
    emitters: Vec<Emitter<K, V, S>>,
    /// Sentinel entry cloned into empty slots; its key marks "empty".
    sentinel: (K, V),
    slots: Vec<(K, V)>,
    slots_per_partition: usize,
    items_per_partition: Vec<usize>,
    num_items: usize,
}

impl<K, V, KeyFn, ReduceFn, S> ProbingReduceTable<K, V, KeyFn, ReduceFn, S>
where
    K: Item + Clone + Eq + Hash,
    V: Item + Clone,
    KeyFn: Fn(&V) -> K,
    ReduceFn: Fn(V, V) -> V,
    S: BlockSink,
{
    pub fn new(
        config: ReduceTableConfig,
        sentinel: (K, V),
        key_fn: KeyFn,
        reduce_fn: ReduceFn,
        emitters: Vec<Emitter<K, V, S>>,
    ) -> Result<Self> {
        config.validate()?;
        if emitters.len() != config.num_partitions {
            return Err(Error::InvalidArgument(format!(
                "{} emitters for {} partitions",
                emitters.len(),
                config.num_partitions
            )));
        }

        let slots_per_partition = config.init_scale;
        let slots = vec![sentinel.clone(); config.num_partitions * slots_per_partition];
        let items_per_partition = vec![0; config.num_partitions];
        Ok(Self {
            config,
            key_fn,
            reduce_fn,
            emitters,
            sentinel,
            slots,
            slots_per_partition,
            items_per_partition,
            num_items: 0,
        })
    }

    /// Insert one value, combining with an existing entry of equal key.
    /// May spill the largest partition or resize the table.
    pub fn insert(&mut self, value: V) -> Result<()> {
        let key = (self.key_fn)(&value);
        if key == self.sentinel.0 {
            return Err(Error::SentinelViolation);
        }

        let partition = self.insert_entry(key, value)?;

        if self.num_items > self.config.max_table_items {
            trace!(num_items = self.num_items, "table over budget, spilling");
            self.flush_largest_partition()?;
        }
        if self.items_per_partition[partition] as f64
            > self.config.max_partition_fill_ratio * self.slots_per_partition as f64
        {
            self.resize()?;
        }
        Ok(())
    }

    /// Emit every partition to its emitter, in partition order.
    pub fn flush(&mut self) -> Result<()> {
        for partition in 0..self.config.num_partitions {
            self.flush_partition(partition)?;
        }
        Ok(())
    }

    /// Emit and clear the partition currently holding the most entries.
    pub fn flush_largest_partition(&mut self) -> Result<()> {
        let largest = self
            .items_per_partition
            .iter()
            .enumerate()
            .max_by_key(|(_, count)| **count)
            .map(|(partition, _)| partition)
            .expect("at least one partition");
        self.flush_partition(largest)
    }

    /// Emit and clear one partition, in slot order.
    pub fn flush_partition(&mut self, partition: usize) -> Result<()> {
        let base = partition * self.slots_per_partition;
        for index in base..base + self.slots_per_partition {
            if self.slots[index].0 != self.sentinel.0 {
                let (key, value) =
                    std::mem::replace(&mut self.slots[index], self.sentinel.clone());
                self.emitters[partition].emit(&key, &value)?;
            }
        }
        self.num_items -= self.items_per_partition[partition];
        self.items_per_partition[partition] = 0;
        self.emitters[partition].flush()?;
        trace!(partition, "partition flushed");
        Ok(())
    }

    /// Flush everything, then close all emitters.
    pub fn close_emitters(&mut self) -> Result<()> {
        self.flush()?;
        for emitter in &mut self.emitters {
            emitter.close()?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.num_items
    }

    pub fn is_empty(&self) -> bool {
        self.num_items == 0
    }

    pub fn num_partitions(&self) -> usize {
        self.config.num_partitions
    }

    pub fn partition_len(&self, partition: usize) -> usize {
        self.items_per_partition[partition]
    }

    pub fn slots_per_partition(&self) -> usize {
        self.slots_per_partition
    }

    /// Place `(key, value)` without running the spill/resize policy.
    /// Returns the partition the entry landed in.
    fn insert_entry(&mut self, key: K, value: V) -> Result<usize> {
        let hash = stable_hash(&key);
        let partitions = self.config.num_partitions;
        let per_partition = self.slots_per_partition;

        let partition = (hash % partitions as u64) as usize;
        let home = (hash % per_partition as u64) as usize;
        let base = partition * per_partition;

        let mut probes = 0usize;
        loop {
            let index = base + (home + probes) % per_partition;

            if self.slots[index].0 == key {
                let (slot_key, old_value) =
                    std::mem::replace(&mut self.slots[index], self.sentinel.clone());
                self.slots[index] = (slot_key, (self.reduce_fn)(old_value, value));
                return Ok(partition);
            }
            if self.slots[index].0 == self.sentinel.0 {
                self.slots[index] = (key, value);
                self.num_items += 1;
                self.items_per_partition[partition] += 1;
                return Ok(partition);
            }

            probes += 1;
            if probes > self.config.max_probe_distance || probes >= per_partition {
                self.resize()?;
                return self.insert_entry(key, value);
            }
        }
    }

    /// Grow every partition by `resize_scale` and rehash all live entries.
    fn resize(&mut self) -> Result<()> {
        let grown = self.slots_per_partition * self.config.resize_scale;
        debug!(
            from = self.slots_per_partition,
            to = grown,
            "resizing probing table"
        );

        let old_slots = std::mem::replace(
            &mut self.slots,
            vec![self.sentinel.clone(); self.config.num_partitions * grown],
        );
        self.slots_per_partition = grown;
        self.num_items = 0;
        self.items_per_partition.iter_mut().for_each(|count| *count = 0);

        for (key, value) in old_slots {
            if key != self.sentinel.0 {
                self.insert_entry(key, value)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::EmitKind;
    use flowmesh_core::BlockPool;
    use flowmesh_data::{BlockFile, BlockWriter};

    type Table = ProbingReduceTable<
        u64,
        (u64, u64),
        fn(&(u64, u64)) -> u64,
        fn((u64, u64), (u64, u64)) -> (u64, u64),
        BlockFile,
    >;

    fn table_with_files(config: ReduceTableConfig) -> (Table, Vec<BlockFile>) {
        let pool = BlockPool::new();
        let files: Vec<BlockFile> = (0..config.num_partitions)
            .map(|_| BlockFile::new())
            .collect();
        let emitters = files
            .iter()
            .map(|file| {
                Emitter::new(
                    BlockWriter::new(file.clone(), pool.clone(), 512).unwrap(),
                    EmitKind::ValueOnly,
                )
            })
            .collect();

        let key_fn: fn(&(u64, u64)) -> u64 = |pair| pair.0;
        let reduce_fn: fn((u64, u64), (u64, u64)) -> (u64, u64) =
            |a, b| (a.0, a.1 + b.1);
        let table =
            ProbingReduceTable::new(config, (u64::MAX, (0, 0)), key_fn, reduce_fn, emitters)
                .unwrap();
        (table, files)
    }

    fn emitted_pairs(files: &[BlockFile]) -> Vec<(u64, u64)> {
        let mut out = Vec::new();
        for file in files {
            out.extend(file.reader().read_remaining::<(u64, u64)>().unwrap());
        }
        out
    }

    #[test]
    fn test_insert_combines_equal_keys() {
        let (mut table, files) = table_with_files(ReduceTableConfig::new(2));
        for _ in 0..10 {
            table.insert((7, 1)).unwrap();
        }
        assert_eq!(table.len(), 1);
        table.close_emitters().unwrap();
        assert_eq!(emitted_pairs(&files), vec![(7, 10)]);
    }

    #[test]
    fn test_overflow_spills_largest_partition() {
        let mut config = ReduceTableConfig::new(2);
        config.max_table_items = 4;
        config.init_scale = 8;
        let (mut table, files) = table_with_files(config);

        for key in 0..5u64 {
            table.insert((key, 1)).unwrap();
        }
        // the fifth insert pushed the table over budget: one partition is
        // already on its way out
        assert!(table.len() < 5);

        table.flush().unwrap();
        assert_eq!(table.len(), 0);

        let mut keys: Vec<u64> = emitted_pairs(&files).iter().map(|p| p.0).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_resize_keeps_all_entries() {
        let mut config = ReduceTableConfig::new(3);
        config.init_scale = 2;
        config.max_probe_distance = 2;
        let (mut table, files) = table_with_files(config);

        for key in 0..500u64 {
            table.insert((key, key)).unwrap();
        }
        assert_eq!(table.len(), 500);
        assert!(table.slots_per_partition() > 2);

        let per_partition: usize =
            (0..table.num_partitions()).map(|p| table.partition_len(p)).sum();
        assert_eq!(per_partition, 500);

        table.close_emitters().unwrap();
        let mut pairs = emitted_pairs(&files);
        pairs.sort_unstable();
        assert_eq!(pairs, (0..500u64).map(|k| (k, k)).collect::<Vec<_>>());
    }

    #[test]
    fn test_sentinel_key_in_data_is_fatal() {
        let (mut table, _files) = table_with_files(ReduceTableConfig::new(2));
        assert!(matches!(
            table.insert((u64::MAX, 1)),
            Err(Error::SentinelViolation)
        ));
    }

    #[test]
    fn test_emitter_count_must_match_partitions() {
        let pool = BlockPool::new();
        let file = BlockFile::new();
        let emitters = vec![Emitter::new(
            BlockWriter::new(file.clone(), pool, 512).unwrap(),
            EmitKind::ValueOnly,
        )];
        let key_fn: fn(&(u64, u64)) -> u64 = |pair| pair.0;
        let reduce_fn: fn((u64, u64), (u64, u64)) -> (u64, u64) = |a, _| a;
        let result: Result<Table> = ProbingReduceTable::new(
            ReduceTableConfig::new(2),
            (u64::MAX, (0, 0)),
            key_fn,
            reduce_fn,
            emitters,
        );
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }
}
