//! Flow-control collectives over channels.
//!
//! Prefix sum, all-reduce, broadcast, and barrier for worker-level
//! coordination. Each call allocates fresh channels, which works because
//! every worker issues its collective calls in the same program order, the
//! same discipline that keeps channel ids aligned for data exchanges.
//!
//! The algorithms are root-based: values gather at global worker 0, the
//! root combines, results fan back out. With the cluster sizes these
//! collectives coordinate (tens of workers), simplicity beats log-depth.

use tracing::trace;

use flowmesh_core::{Item, Result};

use crate::context::WorkerContext;

/// Small blocks are plenty for single-value exchanges.
const COLLECTIVE_BLOCK_SIZE: usize = 4096;

/// Collective operations bound to one worker.
pub struct FlowControl<'a> {
    ctx: &'a WorkerContext,
}

impl<'a> FlowControl<'a> {
    pub(crate) fn new(ctx: &'a WorkerContext) -> Self {
        Self { ctx }
    }

    /// Inclusive or exclusive prefix sum of `value` over global worker
    /// rank, folded with `op` starting from `initial`.
    pub fn prefix_sum<T, F>(&self, value: T, initial: T, op: F, inclusive: bool) -> Result<T>
    where
        T: Item + Clone,
        F: Fn(T, T) -> T,
    {
        let rank = self.ctx.global_rank();
        trace!(rank, inclusive, "prefix sum");

        let gathered = self.gather_to_root(&value)?;
        let results = gathered.map(|values| {
            let mut out = Vec::with_capacity(values.len());
            let mut acc = initial;
            for value in values {
                let exclusive = acc.clone();
                acc = op(acc, value);
                out.push(if inclusive { acc.clone() } else { exclusive });
            }
            out
        });
        self.scatter_from_root(results)
    }

    /// Fold every worker's `value` with `op`; all workers observe the
    /// result. The fold runs in rank order, so `op` need not be
    /// commutative, only associative.
    pub fn all_reduce<T, F>(&self, value: T, op: F) -> Result<T>
    where
        T: Item + Clone,
        F: Fn(T, T) -> T,
    {
        let gathered = self.gather_to_root(&value)?;
        let result = gathered.map(|values| {
            let mut iter = values.into_iter();
            let first = iter.next().expect("at least one worker");
            let folded = iter.fold(first, &op);
            vec![folded; self.ctx.num_workers()]
        });
        self.scatter_from_root(result)
    }

    /// Global worker 0's `value`, on every worker.
    pub fn broadcast<T>(&self, value: T) -> Result<T>
    where
        T: Item + Clone,
    {
        let root_copy = if self.ctx.global_rank() == 0 {
            Some(vec![value; self.ctx.num_workers()])
        } else {
            None
        };
        self.scatter_from_root(root_copy)
    }

    /// Fold every worker's `value` with `op` on global worker 0 alone.
    /// Returns `Some(result)` there and `None` everywhere else.
    pub fn reduce_to_root<T, F>(&self, value: T, op: F) -> Result<Option<T>>
    where
        T: Item + Clone,
        F: Fn(T, T) -> T,
    {
        let gathered = self.gather_to_root(&value)?;
        Ok(gathered.map(|values| {
            let mut iter = values.into_iter();
            let first = iter.next().expect("at least one worker");
            iter.fold(first, op)
        }))
    }

    /// Wait until every worker arrived here.
    pub fn barrier(&self) -> Result<()> {
        self.all_reduce(0u8, |a, b| a | b)?;
        Ok(())
    }

    /// Everyone sends `value` to global worker 0, which receives them in
    /// rank order. Returns `Some(values)` on the root, `None` elsewhere.
    fn gather_to_root<T: Item + Clone>(&self, value: &T) -> Result<Option<Vec<T>>> {
        let channel = self.ctx.allocate_channel();
        let mut writers = channel.open_writers_with(COLLECTIVE_BLOCK_SIZE)?;
        writers[0].put_item(value)?;
        for writer in &mut writers {
            writer.close()?;
        }

        let values = if self.ctx.global_rank() == 0 {
            let mut readers = channel.open_readers();
            let mut values = Vec::with_capacity(readers.len());
            for reader in &mut readers {
                values.push(reader.next::<T>()?);
            }
            Some(values)
        } else {
            None
        };

        channel.close()?;
        Ok(values)
    }

    /// Global worker 0 sends `values[rank]` to each worker; every worker
    /// returns its slot. `values` must be `Some` exactly on the root.
    fn scatter_from_root<T: Item + Clone>(&self, values: Option<Vec<T>>) -> Result<T> {
        let channel = self.ctx.allocate_channel();
        let mut writers = channel.open_writers_with(COLLECTIVE_BLOCK_SIZE)?;
        if let Some(values) = values {
            for (writer, value) in writers.iter_mut().zip(&values) {
                writer.put_item(value)?;
            }
        }
        for writer in &mut writers {
            writer.close()?;
        }

        let mut readers = channel.open_readers();
        let result = readers[0].next::<T>()?;
        channel.close()?;
        Ok(result)
    }
}
