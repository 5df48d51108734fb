//! Block sinks: endpoints that accept finished blocks.
//!
//! A [`BlockSink`] is anything a [`BlockWriter`](crate::writer::BlockWriter)
//! can emit into: a block file, a block queue, a channel sink bound for
//! another worker, or a discard sink for benchmarks. Sinks take `&self` and
//! handle their own synchronization, so writers, tables, and channels can
//! share them freely.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use flowmesh_core::{Block, Result};

/// An endpoint accepting blocks and a close signal.
///
/// `close` is terminal: appends after it must fail with
/// [`Error::Closed`](flowmesh_core::Error::Closed).
pub trait BlockSink: Send + Sync {
    fn append_block(&self, block: Block) -> Result<()>;

    fn close(&self) -> Result<()>;
}

impl<T: BlockSink + ?Sized> BlockSink for Arc<T> {
    fn append_block(&self, block: Block) -> Result<()> {
        (**self).append_block(block)
    }

    fn close(&self) -> Result<()> {
        (**self).close()
    }
}

/// Counts blocks and bytes, then drops them. Used to measure the write path
/// without a consumer.
#[derive(Debug, Default)]
pub struct DiscardSink {
    blocks: AtomicU64,
    bytes: AtomicU64,
    items: AtomicUsize,
}

impl DiscardSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blocks(&self) -> u64 {
        self.blocks.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn items(&self) -> usize {
        self.items.load(Ordering::Relaxed)
    }
}

impl BlockSink for DiscardSink {
    fn append_block(&self, block: Block) -> Result<()> {
        self.blocks.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(block.len() as u64, Ordering::Relaxed);
        self.items.fetch_add(block.num_items(), Ordering::Relaxed);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
