//! Block File - Seekable In-Memory Container of Blocks
//!
//! A [`BlockFile`] is an ordered sequence of blocks plus an inclusive prefix
//! sum over their item counts. The prefix sum turns "give me item `i`" into
//! a binary search for the covering block followed by a short in-block skip,
//! so readers can be opened at any item position in `log(blocks)` time.
//!
//! Files are handles: cloning shares the underlying sequence, which is how a
//! writer (appending through the [`BlockSink`] impl) and any number of
//! readers coexist. Readers hold references to the blocks they traverse, so
//! appends never invalidate a reader that is already running.
//!
//! Once closed, a file is frozen; further appends or closes fail.

use std::fmt;
use std::sync::{Arc, Mutex};

use flowmesh_core::{Block, BlockPool, Error, Item, Result};

use crate::reader::BlockReader;
use crate::sink::BlockSink;
use crate::source::BlockSource;
use crate::writer::BlockWriter;

#[derive(Clone, Default)]
pub struct BlockFile {
    inner: Arc<Mutex<FileInner>>,
}

#[derive(Default)]
struct FileInner {
    blocks: Vec<Block>,
    /// `psum[i]` is the number of items starting in blocks `0..=i`.
    psum: Vec<usize>,
    closed: bool,
}

impl BlockFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a file over existing blocks, e.g. an item-range extraction.
    pub fn from_blocks(blocks: Vec<Block>) -> Result<Self> {
        let file = Self::new();
        for block in blocks {
            file.append_block(block)?;
        }
        Ok(file)
    }

    pub fn num_blocks(&self) -> usize {
        self.inner.lock().unwrap().blocks.len()
    }

    /// Number of items starting in this file.
    pub fn num_items(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.psum.last().copied().unwrap_or(0)
    }

    /// Total bytes covered by the file's blocks.
    pub fn total_bytes(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.blocks.iter().map(Block::len).sum()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }

    pub fn block(&self, index: usize) -> Option<Block> {
        self.inner.lock().unwrap().blocks.get(index).cloned()
    }

    /// Number of items starting in block `index`.
    pub fn items_starting_in(&self, index: usize) -> usize {
        let inner = self.inner.lock().unwrap();
        let before = if index == 0 { 0 } else { inner.psum[index - 1] };
        inner.psum[index] - before
    }

    /// A writer appending to this file.
    pub fn writer(&self, pool: BlockPool, block_size: usize) -> Result<BlockWriter<BlockFile>> {
        BlockWriter::new(self.clone(), pool, block_size)
    }

    /// A reader starting at the first block.
    pub fn reader(&self) -> BlockReader<FileBlockSource> {
        BlockReader::new(self.reader_source())
    }

    /// The raw block source behind [`reader`](Self::reader), for callers
    /// composing their own reader stacks.
    pub fn reader_source(&self) -> FileBlockSource {
        FileBlockSource::new(self.clone(), 0, 0)
    }

    /// A reader positioned on item `index`. For fixed-size items the
    /// in-block skip is arithmetic; otherwise items are decoded and
    /// discarded. Assumes the file was written without self-verify.
    pub fn reader_at<T: Item>(&self, index: usize) -> Result<BlockReader<FileBlockSource>> {
        let (block_index, first_offset, items_before) = {
            let inner = self.inner.lock().unwrap();
            let block_index = inner.psum.partition_point(|&sum| sum <= index);
            if block_index >= inner.blocks.len() {
                // at or past the end: an exhausted reader
                (inner.blocks.len(), 0, index)
            } else {
                let before = if block_index == 0 {
                    0
                } else {
                    inner.psum[block_index - 1]
                };
                (
                    block_index,
                    inner.blocks[block_index].first_item(),
                    before,
                )
            }
        };

        let mut reader =
            BlockReader::new(FileBlockSource::new(self.clone(), block_index, first_offset));
        reader.skip_items::<T>(index - items_before)?;
        Ok(reader)
    }

    /// The blocks covering items `[begin, end)`, trimmed at both ends.
    pub fn item_range<T: Item>(&self, begin: usize, end: usize) -> Result<Vec<Block>> {
        if begin > end {
            return Err(Error::InvalidArgument(format!(
                "item range {begin}..{end} is reversed"
            )));
        }
        let mut reader = self.reader_at::<T>(begin)?;
        reader.item_range::<T>(end - begin)
    }
}

impl BlockSink for BlockFile {
    fn append_block(&self, block: Block) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return Err(Error::Closed("block file"));
        }
        if block.is_empty() && block.num_items() == 0 {
            return Ok(());
        }
        let total = inner.psum.last().copied().unwrap_or(0) + block.num_items();
        inner.psum.push(total);
        inner.blocks.push(block);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return Err(Error::Closed("block file"));
        }
        inner.closed = true;
        Ok(())
    }
}

impl fmt::Debug for BlockFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("BlockFile")
            .field("blocks", &inner.blocks.len())
            .field("items", &inner.psum.last().copied().unwrap_or(0))
            .field("closed", &inner.closed)
            .finish()
    }
}

/// [`BlockSource`] walking a file front to back, optionally trimming the
/// first delivered block to a given offset.
pub struct FileBlockSource {
    file: BlockFile,
    next_index: usize,
    first_index: usize,
    first_offset: usize,
}

impl FileBlockSource {
    fn new(file: BlockFile, first_index: usize, first_offset: usize) -> Self {
        Self {
            file,
            next_index: first_index,
            first_index,
            first_offset,
        }
    }
}

impl BlockSource for FileBlockSource {
    fn next_block(&mut self) -> Result<Option<Block>> {
        let inner = self.file.inner.lock().unwrap();
        let Some(block) = inner.blocks.get(self.next_index) else {
            return Ok(None);
        };
        let block = if self.next_index == self.first_index && self.first_offset > block.begin()
        {
            block.with_begin(self.first_offset)?
        } else {
            block.clone()
        };
        self.next_index += 1;
        Ok(Some(block))
    }
}
