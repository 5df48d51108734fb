//! Block sources: where readers pull their block sequence from.
//!
//! A [`BlockSource`] yields blocks one at a time until exhausted. Sources
//! over queues block the calling thread until a block arrives or the queue
//! is write-closed; in-memory sources never block. Dynamic dispatch happens
//! at most once per block boundary, never per item.

use flowmesh_core::{Block, Result};

/// A pull-based sequence of blocks. `Ok(None)` means exhausted.
pub trait BlockSource: Send {
    fn next_block(&mut self) -> Result<Option<Block>>;
}

impl<S: BlockSource + ?Sized> BlockSource for Box<S> {
    fn next_block(&mut self) -> Result<Option<Block>> {
        (**self).next_block()
    }
}

/// Replays an in-memory block vector, e.g. the result of an item-range
/// extraction.
pub struct VecSource {
    blocks: std::vec::IntoIter<Block>,
}

impl VecSource {
    pub fn new(blocks: Vec<Block>) -> Self {
        Self {
            blocks: blocks.into_iter(),
        }
    }
}

impl BlockSource for VecSource {
    fn next_block(&mut self) -> Result<Option<Block>> {
        Ok(self.blocks.next())
    }
}

/// Presents several sources as one stream, draining them fully in vector
/// order. At the channel layer the vector is ordered by source worker rank,
/// which makes concatenated reads deterministic.
pub struct ConcatSource<S: BlockSource> {
    sources: Vec<S>,
    current: usize,
}

impl<S: BlockSource> ConcatSource<S> {
    pub fn new(sources: Vec<S>) -> Self {
        Self {
            sources,
            current: 0,
        }
    }
}

impl<S: BlockSource> BlockSource for ConcatSource<S> {
    fn next_block(&mut self) -> Result<Option<Block>> {
        while self.current < self.sources.len() {
            if let Some(block) = self.sources[self.current].next_block()? {
                return Ok(Some(block));
            }
            self.current += 1;
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowmesh_core::BlockPool;

    fn block_with_items(pool: &BlockPool, num_items: usize) -> Block {
        let buffer = pool.allocate(16).unwrap().freeze();
        Block::new(buffer, 0, 16, 0, num_items).unwrap()
    }

    #[test]
    fn test_vec_source_drains() {
        let pool = BlockPool::new();
        let mut source = VecSource::new(vec![
            block_with_items(&pool, 1),
            block_with_items(&pool, 2),
        ]);
        assert_eq!(source.next_block().unwrap().unwrap().num_items(), 1);
        assert_eq!(source.next_block().unwrap().unwrap().num_items(), 2);
        assert!(source.next_block().unwrap().is_none());
    }

    #[test]
    fn test_concat_source_order() {
        let pool = BlockPool::new();
        let first = VecSource::new(vec![block_with_items(&pool, 1)]);
        let empty = VecSource::new(vec![]);
        let second = VecSource::new(vec![
            block_with_items(&pool, 2),
            block_with_items(&pool, 3),
        ]);

        let mut concat = ConcatSource::new(vec![first, empty, second]);
        let mut seen = Vec::new();
        while let Some(block) = concat.next_block().unwrap() {
            seen.push(block.num_items());
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }
}
