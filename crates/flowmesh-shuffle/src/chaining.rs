//! Chained-Frame Reduce Table
//!
//! The separate-chaining alternative to the probing table. Each partition
//! owns a stripe of bucket heads; colliding entries chain through *frames*,
//! small arena-allocated batches of up to [`FRAME_CAPACITY`] entries. New
//! frames are pushed at the chain head, and frames freed by a flush are
//! recycled through a free list, so steady-state inserts allocate nothing.
//!
//! No sentinel key is needed: emptiness is structural. The spill and resize
//! policy matches the probing variant, with partition capacity counted as
//! `bucket_heads × FRAME_CAPACITY`.

use std::hash::Hash;

use tracing::{debug, trace};

use flowmesh_core::{Error, Item, Result};
use flowmesh_data::BlockSink;

use crate::config::ReduceTableConfig;
use crate::emit::Emitter;
use crate::stable_hash;

/// Entries per chain frame.
pub const FRAME_CAPACITY: usize = 128;

struct Frame<K, V> {
    items: Vec<(K, V)>,
    next: Option<usize>,
}

pub struct ChainingReduceTable<K, V, KeyFn, ReduceFn, S>
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
    /// Chain heads, `num_partitions × buckets_per_partition` of them,
    /// indexing into `frames`.
    buckets: Vec<Option<usize>>,
    frames: Vec<Frame<K, V>>,
    free_frames: Vec<usize>,
    buckets_per_partition: usize,
    items_per_partition: Vec<usize>,
    num_items: usize,
}

impl<K, V, KeyFn, ReduceFn, S> ChainingReduceTable<K, V, KeyFn, ReduceFn, S>
where
    K: Item + Clone + Eq + Hash,
    V: Item + Clone,
    KeyFn: Fn(&V) -> K,
    ReduceFn: Fn(V, V) -> V,
    S: BlockSink,
{
    pub fn new(
        config: ReduceTableConfig,
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

        let buckets_per_partition = config.init_scale;
        let buckets = vec![None; config.num_partitions * buckets_per_partition];
        let items_per_partition = vec![0; config.num_partitions];
        Ok(Self {
            config,
            key_fn,
            reduce_fn,
            emitters,
            buckets,
            frames: Vec::new(),
            free_frames: Vec::new(),
            buckets_per_partition,
            items_per_partition,
            num_items: 0,
        })
    }

    /// Insert one value, combining with an existing entry of equal key.
    pub fn insert(&mut self, value: V) -> Result<()> {
        let key = (self.key_fn)(&value);
        let partition = self.insert_entry(key, value)?;

        if self.num_items > self.config.max_table_items {
            trace!(num_items = self.num_items, "table over budget, spilling");
            self.flush_largest_partition()?;
        }
        let capacity = self.buckets_per_partition * FRAME_CAPACITY;
        if self.items_per_partition[partition] as f64
            > self.config.max_partition_fill_ratio * capacity as f64
        {
            self.resize()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        for partition in 0..self.config.num_partitions {
            self.flush_partition(partition)?;
        }
        Ok(())
    }

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

    /// Emit and clear one partition: buckets in order, each chain from its
    /// newest frame backwards, entries within a frame in insertion order.
    pub fn flush_partition(&mut self, partition: usize) -> Result<()> {
        let base = partition * self.buckets_per_partition;
        for bucket in base..base + self.buckets_per_partition {
            let mut cursor = self.buckets[bucket].take();
            while let Some(frame_index) = cursor {
                let items = std::mem::take(&mut self.frames[frame_index].items);
                for (key, value) in &items {
                    self.emitters[partition].emit(key, value)?;
                }
                cursor = self.frames[frame_index].next.take();
                self.free_frames.push(frame_index);
            }
        }
        self.num_items -= self.items_per_partition[partition];
        self.items_per_partition[partition] = 0;
        self.emitters[partition].flush()?;
        trace!(partition, "partition flushed");
        Ok(())
    }

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

    pub fn buckets_per_partition(&self) -> usize {
        self.buckets_per_partition
    }

    fn insert_entry(&mut self, key: K, value: V) -> Result<usize> {
        let hash = stable_hash(&key);
        let partition = (hash % self.config.num_partitions as u64) as usize;
        let bucket = partition * self.buckets_per_partition
            + (hash % self.buckets_per_partition as u64) as usize;

        // combine with an existing entry of equal key
        let mut cursor = self.buckets[bucket];
        while let Some(frame_index) = cursor {
            for slot in 0..self.frames[frame_index].items.len() {
                if self.frames[frame_index].items[slot].0 == key {
                    let old = self.frames[frame_index].items[slot].1.clone();
                    self.frames[frame_index].items[slot].1 =
                        (self.reduce_fn)(old, value);
                    return Ok(partition);
                }
            }
            cursor = self.frames[frame_index].next;
        }

        // append to the head frame, opening a new one when it is full
        let head = self.buckets[bucket];
        let target = match head {
            Some(frame_index)
                if self.frames[frame_index].items.len() < FRAME_CAPACITY =>
            {
                frame_index
            }
            _ => {
                let frame_index = self.allocate_frame(head);
                self.buckets[bucket] = Some(frame_index);
                frame_index
            }
        };
        self.frames[target].items.push((key, value));
        self.num_items += 1;
        self.items_per_partition[partition] += 1;
        Ok(partition)
    }

    fn allocate_frame(&mut self, next: Option<usize>) -> usize {
        match self.free_frames.pop() {
            Some(recycled) => {
                self.frames[recycled].items.clear();
                self.frames[recycled].next = next;
                recycled
            }
            None => {
                self.frames.push(Frame {
                    items: Vec::with_capacity(FRAME_CAPACITY),
                    next,
                });
                self.frames.len() - 1
            }
        }
    }

    /// Double (by `resize_scale`) the bucket heads per partition and
    /// rehash every live entry.
    fn resize(&mut self) -> Result<()> {
        let grown = self.buckets_per_partition * self.config.resize_scale;
        debug!(
            from = self.buckets_per_partition,
            to = grown,
            "resizing chaining table"
        );

        let old_frames = std::mem::take(&mut self.frames);
        self.free_frames.clear();
        self.buckets = vec![None; self.config.num_partitions * grown];
        self.buckets_per_partition = grown;
        self.num_items = 0;
        self.items_per_partition.iter_mut().for_each(|count| *count = 0);

        for frame in old_frames {
            for (key, value) in frame.items {
                self.insert_entry(key, value)?;
            }
        }
        Ok(())
    }
}
