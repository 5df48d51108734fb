//! Virtual blocks: a byte range of a shared buffer plus item bookkeeping.
//!
//! A [`Block`] never owns bytes itself; it references a frozen
//! [`BufferRef`](crate::pool::BufferRef) together with a valid byte range and
//! two pieces of item metadata: the offset of the first item that *begins*
//! inside the range, and the count of items beginning inside the range.
//! Several blocks may share one buffer with different bookkeeping, which is
//! what makes item-range extraction and scatter zero-copy.
//!
//! ```text
//!     +--+---------+---------+-------------+---------+-----+
//!     |  |item 1   |item 2   |item 3       |item 4   |item5|(spills over)
//!     +--+---------+---------+-------------+---------+-----+
//!        ^         ^                                       ^
//!        begin     first_item      num_items = 5           end
//! ```
//!
//! Bytes in `[begin, first_item)` are the tail of an item that began in an
//! earlier block of the same stream.

use std::fmt;

use crate::error::{Error, Result};
use crate::pool::BufferRef;

/// An immutable slice of a shared byte buffer with item metadata.
#[derive(Clone)]
pub struct Block {
    buffer: BufferRef,
    begin: usize,
    end: usize,
    first_item: usize,
    num_items: usize,
}

impl Block {
    /// Create a block over `buffer[begin..end]` whose first fully contained
    /// item begins at absolute offset `first_item` and in which `num_items`
    /// items begin.
    pub fn new(
        buffer: BufferRef,
        begin: usize,
        end: usize,
        first_item: usize,
        num_items: usize,
    ) -> Result<Self> {
        if begin > first_item || first_item > end || end > buffer.len() {
            return Err(Error::InvalidArgument(format!(
                "bad block ranges: begin={begin} first_item={first_item} end={end} \
                 buffer_len={}",
                buffer.len()
            )));
        }
        Ok(Self {
            buffer,
            begin,
            end,
            first_item,
            num_items,
        })
    }

    /// The bytes covered by this block, i.e. `buffer[begin..end]`.
    pub fn data(&self) -> &[u8] {
        &self.buffer[self.begin..self.end]
    }

    /// The whole backing buffer. Cursors held by readers are absolute
    /// offsets into this slice.
    pub fn buffer_data(&self) -> &[u8] {
        &self.buffer
    }

    pub fn buffer(&self) -> &BufferRef {
        &self.buffer
    }

    pub fn begin(&self) -> usize {
        self.begin
    }

    pub fn end(&self) -> usize {
        self.end
    }

    /// Number of payload bytes in this block.
    pub fn len(&self) -> usize {
        self.end - self.begin
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Absolute offset of the first item beginning in this block. Only
    /// meaningful when `num_items() > 0`.
    pub fn first_item(&self) -> usize {
        self.first_item
    }

    /// First-item offset relative to `begin`, as carried on the wire.
    pub fn first_item_relative(&self) -> usize {
        self.first_item - self.begin
    }

    /// Number of items whose serialization begins inside this block.
    pub fn num_items(&self) -> usize {
        self.num_items
    }

    /// A copy of this block with the range shortened from the front. Bytes
    /// before `begin` are dropped; the first-item offset is clamped into the
    /// new range.
    pub fn with_begin(&self, begin: usize) -> Result<Self> {
        Block::new(
            self.buffer.clone(),
            begin,
            self.end,
            self.first_item.max(begin),
            self.num_items,
        )
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("begin", &self.begin)
            .field("end", &self.end)
            .field("first_item", &self.first_item)
            .field("num_items", &self.num_items)
            .finish()
    }
}
