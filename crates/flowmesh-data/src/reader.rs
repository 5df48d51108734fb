//! Block Reader
//!
//! A [`BlockReader`] reconstructs typed items from the block sequence of a
//! [`BlockSource`]. It keeps a byte cursor inside the current block, fetches
//! the next block on underflow, and reassembles items that were split across
//! block boundaries by the writer.
//!
//! Besides plain `next::<T>()` decoding, the reader offers
//! [`item_range`](BlockReader::item_range): extracting the blocks covering
//! the next `n` items *without* materializing them. Only the boundary blocks
//! need per-item delimitation (by decoding, or arithmetic for fixed-size
//! types); whole interior blocks pass through untouched. Repartitioning and
//! scatter are built on this path.

use flowmesh_core::{type_fingerprint, Block, Error, Item, ItemReader, Result};

use crate::source::BlockSource;

/// Cursor-based reader of typed items from a block sequence.
pub struct BlockReader<S: BlockSource> {
    source: S,
    block: Option<Block>,
    /// Read position, absolute within the current block's buffer.
    pos: usize,
    /// End of valid data, absolute within the current block's buffer.
    end: usize,
    /// First item offset of the current block.
    first_item: usize,
    /// Items beginning in the current block that were not yet consumed.
    num_items: usize,
    self_verify: bool,
}

impl<S: BlockSource> BlockReader<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            block: None,
            pos: 0,
            end: 0,
            first_item: 0,
            num_items: 0,
            self_verify: false,
        }
    }

    /// Expect a type fingerprint before every item, written by a
    /// self-verifying writer.
    pub fn with_self_verify(mut self) -> Self {
        self.self_verify = true;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// True while at least one more byte is available.
    pub fn has_next(&mut self) -> Result<bool> {
        while self.pos == self.end {
            if !self.fetch_block()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Decode the next item. Running out of data mid-stream is
    /// [`Error::UnexpectedEndOfStream`].
    pub fn next<T: Item>(&mut self) -> Result<T> {
        if !self.align_to_item()? {
            return Err(Error::UnexpectedEndOfStream);
        }
        self.num_items -= 1;

        if self.self_verify {
            let mut bytes = [0u8; 4];
            self.read_slice(&mut bytes)?;
            let found = u32::from_le_bytes(bytes);
            let expected = type_fingerprint::<T>();
            if found != expected {
                return Err(Error::TypeMismatch { expected, found });
            }
        }
        T::decode(self)
    }

    /// Drain the stream into a vector. Only sensible when the remainder is
    /// known to fit in memory.
    pub fn read_remaining<T: Item>(&mut self) -> Result<Vec<T>> {
        let mut out = Vec::new();
        while self.has_next()? {
            out.push(self.next::<T>()?);
        }
        Ok(out)
    }

    /// Skip `n` items. Fixed-size items inside one block are skipped
    /// arithmetically; everything else is decoded and discarded.
    pub fn skip_items<T: Item>(&mut self, mut n: usize) -> Result<()> {
        if let (Some(size), false) = (T::FIXED_SIZE, self.self_verify) {
            while n > 0 {
                if !self.align_to_item()? {
                    return Err(Error::UnexpectedEndOfStream);
                }
                let in_block = n.min(self.num_items);
                if self.pos + in_block * size <= self.end {
                    self.pos += in_block * size;
                    self.num_items -= in_block;
                    n -= in_block;
                } else {
                    // the next item spans into the following block
                    self.next::<T>()?;
                    n -= 1;
                }
            }
            return Ok(());
        }
        for _ in 0..n {
            self.next::<T>()?;
        }
        Ok(())
    }

    /// Advance past the next `n` items and return blocks whose union holds
    /// exactly those items. Every returned block carries a first-item offset
    /// that lets a fresh reader skip straight to a true item boundary.
    ///
    /// Returns fewer items' worth of blocks if the stream ends early.
    pub fn item_range<T: Item>(&mut self, mut n: usize) -> Result<Vec<Block>> {
        let mut out = Vec::new();

        if !self.align_to_item()? {
            // no items left at all
            return Ok(out);
        }

        let mut range_begin = self.pos;
        let mut range_first_item = self.pos;

        if n >= self.num_items {
            // Emit the remainder of the current block. The cursor sits on an
            // item boundary, so it doubles as the first-item offset.
            let block = self.current_block();
            out.push(Block::new(
                block.buffer().clone(),
                self.pos,
                self.end,
                self.pos,
                self.num_items,
            )?);
            n -= self.num_items;
            self.num_items = 0;
            self.pos = self.end;

            if !self.fetch_block()? {
                return Ok(out);
            }

            // Pass whole blocks through while their items are all wanted.
            while n >= self.num_items {
                out.push(self.current_block().clone());
                n -= self.num_items;
                self.num_items = 0;
                self.pos = self.end;

                if !self.fetch_block()? {
                    return Ok(out);
                }
            }

            // The final block starts with the tail of an item emitted above;
            // keep those bytes in the range but resume decoding at the first
            // item boundary.
            range_begin = self.pos;
            range_first_item = self.first_item;
            self.pos = self.first_item;
        }

        let wanted = n;
        while n > 0 {
            self.next::<T>()?;
            n -= 1;
        }
        debug_assert!(self.pos <= self.end, "trailing items stay in one block");

        let block = self.current_block();
        out.push(Block::new(
            block.buffer().clone(),
            range_begin,
            self.pos,
            range_first_item,
            wanted,
        )?);
        Ok(out)
    }

    fn current_block(&self) -> &Block {
        self.block.as_ref().expect("reader holds a block")
    }

    /// Position the cursor on the start of the next item, skipping blocks
    /// that only carry the tail of an item emitted elsewhere. Returns false
    /// when the stream holds no further item.
    fn align_to_item(&mut self) -> Result<bool> {
        loop {
            if !self.has_next()? {
                return Ok(false);
            }
            if self.num_items == 0 {
                self.pos = self.end;
                continue;
            }
            if self.pos < self.first_item {
                self.pos = self.first_item;
            }
            return Ok(true);
        }
    }

    fn fetch_block(&mut self) -> Result<bool> {
        match self.source.next_block()? {
            None => Ok(false),
            Some(block) => {
                self.pos = block.begin();
                self.end = block.end();
                self.first_item = block.first_item();
                self.num_items = block.num_items();
                self.block = Some(block);
                Ok(true)
            }
        }
    }
}

impl<S: BlockSource> ItemReader for BlockReader<S> {
    fn read_slice(&mut self, out: &mut [u8]) -> Result<()> {
        let mut written = 0;
        loop {
            let available = self.end - self.pos;
            let needed = out.len() - written;
            if needed <= available {
                let data = self.current_block().buffer_data();
                out[written..].copy_from_slice(&data[self.pos..self.pos + needed]);
                self.pos += needed;
                return Ok(());
            }

            if available > 0 {
                let data = self.current_block().buffer_data();
                out[written..written + available]
                    .copy_from_slice(&data[self.pos..self.end]);
                written += available;
                self.pos = self.end;
            }

            if !self.fetch_block()? {
                return Err(Error::UnexpectedEndOfStream);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::VecSource;
    use crate::writer::BlockWriter;
    use crate::file::BlockFile;
    use flowmesh_core::BlockPool;

    fn write_strings(pool: &BlockPool, block_size: usize, values: &[&str]) -> BlockFile {
        let file = BlockFile::new();
        let mut writer = BlockWriter::new(file.clone(), pool.clone(), block_size).unwrap();
        for value in values {
            writer.put_item(&value.to_string()).unwrap();
        }
        writer.close().unwrap();
        file
    }

    #[test]
    fn test_split_item_reassembly() {
        let pool = BlockPool::new();
        // block size far below the item size forces every item to span
        let file = write_strings(&pool, 8, &["a long string item", "and another one"]);

        let mut reader = file.reader();
        assert_eq!(reader.next::<String>().unwrap(), "a long string item");
        assert_eq!(reader.next::<String>().unwrap(), "and another one");
        assert!(!reader.has_next().unwrap());
    }

    #[test]
    fn test_next_past_end_is_error() {
        let pool = BlockPool::new();
        let file = write_strings(&pool, 64, &["only"]);
        let mut reader = file.reader();
        reader.next::<String>().unwrap();
        assert!(matches!(
            reader.next::<String>(),
            Err(Error::UnexpectedEndOfStream)
        ));
    }

    #[test]
    fn test_self_verify_catches_type_confusion() {
        let pool = BlockPool::new();
        let file = BlockFile::new();
        let mut writer = BlockWriter::new(file.clone(), pool.clone(), 64)
            .unwrap()
            .with_self_verify();
        writer.put_item(&7u64).unwrap();
        writer.close().unwrap();

        let mut ok = file.reader().with_self_verify();
        assert_eq!(ok.next::<u64>().unwrap(), 7);

        let mut bad = file.reader().with_self_verify();
        assert!(matches!(
            bad.next::<i64>(),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_item_range_blocks_replay() {
        let pool = BlockPool::new();
        let file = BlockFile::new();
        let mut writer = BlockWriter::new(file.clone(), pool.clone(), 32).unwrap();
        for i in 0..100u64 {
            writer.put_item(&i).unwrap();
        }
        writer.close().unwrap();

        let mut reader = file.reader();
        reader.skip_items::<u64>(10).unwrap();
        let blocks = reader.item_range::<u64>(25).unwrap();

        let mut replay = BlockReader::new(VecSource::new(blocks));
        let items = replay.read_remaining::<u64>().unwrap();
        assert_eq!(items, (10..35).collect::<Vec<u64>>());

        // the original reader continues where the range ended
        assert_eq!(reader.next::<u64>().unwrap(), 35);
    }

    #[test]
    fn test_item_range_with_variable_sized_items() {
        let pool = BlockPool::new();
        let values: Vec<String> = (0..60).map(|i| format!("value-{i:03}")).collect();
        let refs: Vec<&str> = values.iter().map(String::as_str).collect();
        let file = write_strings(&pool, 48, &refs);

        let mut reader = file.reader();
        reader.skip_items::<String>(7).unwrap();
        let blocks = reader.item_range::<String>(40).unwrap();

        let mut replay = BlockReader::new(VecSource::new(blocks));
        let items = replay.read_remaining::<String>().unwrap();
        assert_eq!(items, values[7..47].to_vec());
    }

    #[test]
    fn test_item_range_past_end_returns_short() {
        let pool = BlockPool::new();
        let file = write_strings(&pool, 32, &["a", "b", "c"]);
        let mut reader = file.reader();
        let blocks = reader.item_range::<String>(10).unwrap();
        let total: usize = blocks.iter().map(Block::num_items).sum();
        assert_eq!(total, 3);
    }
}
