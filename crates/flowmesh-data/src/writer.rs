//! Block Writer
//!
//! A [`BlockWriter`] serializes typed items into fixed-size byte blocks and
//! emits each finished block to an attached [`BlockSink`] (a file, a block
//! queue, or a channel sink to another worker). It tracks how many items
//! begin in the current block and where the first of them starts, which is
//! exactly the bookkeeping a [`Block`](flowmesh_core::Block) carries, and it
//! transparently splits items that do not fit the remaining space across
//! block boundaries.
//!
//! Writers never wait: emitting to a sink is an enqueue, so the only pause
//! on the append path is allocating the next buffer.

use flowmesh_core::{
    type_fingerprint, Block, BlockPool, Error, Item, ItemWriter, PooledBuffer, Result,
};

use crate::sink::BlockSink;

/// Cursor-based writer of typed items into a block sequence.
pub struct BlockWriter<S: BlockSink> {
    sink: S,
    pool: BlockPool,
    buffer: Option<PooledBuffer>,
    /// Write position in the current buffer.
    pos: usize,
    /// Items begun in the current buffer.
    num_items: usize,
    /// Offset of the first item begun in the current buffer.
    first_item: usize,
    block_size: usize,
    self_verify: bool,
    closed: bool,
}

impl<S: BlockSink> BlockWriter<S> {
    pub fn new(sink: S, pool: BlockPool, block_size: usize) -> Result<Self> {
        if block_size == 0 {
            return Err(Error::InvalidArgument("block_size must be > 0".into()));
        }
        let buffer = pool.allocate(block_size)?;
        Ok(Self {
            sink,
            pool,
            buffer: Some(buffer),
            pos: 0,
            num_items: 0,
            first_item: 0,
            block_size,
            self_verify: false,
            closed: false,
        })
    }

    /// Prefix every item with a type fingerprint that readers check. Costs
    /// four bytes per item; intended for debugging pipelines.
    pub fn with_self_verify(mut self) -> Self {
        self.self_verify = true;
        self
    }

    /// Mark the beginning of an item at the current position.
    pub fn mark_item(&mut self) -> Result<()> {
        self.check_open()?;
        if self.pos == self.block_size {
            self.flush()?;
        }
        if self.num_items == 0 {
            self.first_item = self.pos;
        }
        self.num_items += 1;
        Ok(())
    }

    /// Serialize one item, splitting across blocks as needed.
    pub fn put_item<T: Item>(&mut self, item: &T) -> Result<()> {
        self.mark_item()?;
        if self.self_verify {
            let fingerprint = type_fingerprint::<T>();
            self.append_raw(&fingerprint.to_le_bytes())?;
        }
        item.encode(self)
    }

    /// Copy raw bytes without touching the item bookkeeping.
    pub fn append_raw(&mut self, data: &[u8]) -> Result<()> {
        self.check_open()?;
        let mut data = data;
        while self.pos + data.len() > self.block_size {
            let fits = self.block_size - self.pos;
            let buffer = self.buffer.as_mut().expect("open writer has a buffer");
            buffer[self.pos..self.pos + fits].copy_from_slice(&data[..fits]);
            self.pos += fits;
            data = &data[fits..];
            self.flush()?;
        }
        let buffer = self.buffer.as_mut().expect("open writer has a buffer");
        buffer[self.pos..self.pos + data.len()].copy_from_slice(data);
        self.pos += data.len();
        Ok(())
    }

    /// Emit the current block if it holds any data, then start a fresh one.
    /// Safe to call at any time.
    pub fn flush(&mut self) -> Result<()> {
        self.check_open()?;
        if self.pos == 0 && self.num_items == 0 {
            return Ok(());
        }
        let buffer = self.buffer.take().expect("open writer has a buffer");
        let block = Block::new(
            buffer.freeze(),
            0,
            self.pos,
            self.first_item,
            self.num_items,
        )?;
        self.sink.append_block(block)?;

        self.buffer = Some(self.pool.allocate(self.block_size)?);
        self.pos = 0;
        self.num_items = 0;
        self.first_item = 0;
        Ok(())
    }

    /// Hand pre-built blocks straight to the sink, preserving order with
    /// anything buffered so far. This is the zero-copy path used by scatter.
    pub fn append_blocks(&mut self, blocks: Vec<Block>) -> Result<()> {
        self.flush()?;
        for block in blocks {
            if block.is_empty() && block.num_items() == 0 {
                continue;
            }
            self.sink.append_block(block)?;
        }
        Ok(())
    }

    /// Flush the partial block and close the sink. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.flush()?;
        self.closed = true;
        self.buffer = None;
        self.sink.close()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Closed("block writer"));
        }
        Ok(())
    }
}

impl<S: BlockSink> ItemWriter for BlockWriter<S> {
    fn put_slice(&mut self, data: &[u8]) -> Result<()> {
        self.append_raw(data)
    }
}

impl<S: BlockSink> Drop for BlockWriter<S> {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(error) = self.close() {
                tracing::warn!(%error, "closing block writer on drop failed");
            }
        }
    }
}
