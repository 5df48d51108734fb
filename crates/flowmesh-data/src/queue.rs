//! Block Queue - Thread-Safe Hand-Off Between Producer and Consumer
//!
//! A [`BlockQueue`] ferries blocks from one producer (a local writer or the
//! multiplexer's receive path) to one consumer (a reader on a worker
//! thread). The consumer blocks on an empty queue until either a block
//! arrives or the producer signals end-of-stream by write-closing; after a
//! write-close the consumer drains whatever is left and then sees the end.
//!
//! Each queue owns one mutex and one condvar; the producer side never
//! blocks.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use flowmesh_core::{Block, Result};

use crate::file::BlockFile;
use crate::sink::BlockSink;
use crate::source::BlockSource;

#[derive(Default)]
pub struct BlockQueue {
    state: Mutex<QueueState>,
    condvar: Condvar,
}

#[derive(Default)]
struct QueueState {
    blocks: VecDeque<Block>,
    write_closed: bool,
}

impl BlockQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next block, waiting if none is queued yet. `None` once the
    /// queue is write-closed and drained.
    pub fn pop(&self) -> Option<Block> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(block) = state.blocks.pop_front() {
                return Some(block);
            }
            if state.write_closed {
                return None;
            }
            state = self.condvar.wait(state).unwrap();
        }
    }

    pub fn is_write_closed(&self) -> bool {
        self.state.lock().unwrap().write_closed
    }

    /// True once the producer has closed and the consumer has drained.
    pub fn is_drained(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.write_closed && state.blocks.is_empty()
    }

    /// Block until the producer write-closes the queue.
    pub fn wait_write_closed(&self) {
        let mut state = self.state.lock().unwrap();
        while !state.write_closed {
            state = self.condvar.wait(state).unwrap();
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().unwrap().blocks.is_empty()
    }
}

impl BlockSink for BlockQueue {
    fn append_block(&self, block: Block) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.write_closed {
            return Err(flowmesh_core::Error::Closed("block queue"));
        }
        state.blocks.push_back(block);
        drop(state);
        self.condvar.notify_one();
        Ok(())
    }

    /// Signal end-of-stream. Idempotent: duplicate closes from sink and
    /// channel teardown are tolerated.
    fn close(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.write_closed = true;
        drop(state);
        self.condvar.notify_all();
        Ok(())
    }
}

/// Consuming [`BlockSource`] over a queue. Each block is delivered exactly
/// once; a second source on the same queue sees only what the first left.
pub struct QueueSource {
    queue: Arc<BlockQueue>,
}

impl QueueSource {
    pub fn new(queue: Arc<BlockQueue>) -> Self {
        Self { queue }
    }
}

impl BlockSource for QueueSource {
    fn next_block(&mut self) -> Result<Option<Block>> {
        Ok(self.queue.pop())
    }
}

/// A queue source that also records every delivered block into a cache
/// file. If the queue was already drained when the source is created, the
/// cache file is replayed instead, so consumers can read the stream again.
pub struct CachingQueueSource {
    queue: Arc<BlockQueue>,
    cache: BlockFile,
    replay: Option<Box<dyn BlockSource + Send>>,
}

impl CachingQueueSource {
    pub fn new(queue: Arc<BlockQueue>, cache: BlockFile) -> Self {
        let replay: Option<Box<dyn BlockSource + Send>> = if queue.is_drained() {
            Some(Box::new(cache.reader_source()))
        } else {
            None
        };
        Self {
            queue,
            cache,
            replay,
        }
    }
}

impl BlockSource for CachingQueueSource {
    fn next_block(&mut self) -> Result<Option<Block>> {
        if let Some(replay) = &mut self.replay {
            return replay.next_block();
        }
        match self.queue.pop() {
            Some(block) => {
                self.cache.append_block(block.clone())?;
                Ok(Some(block))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowmesh_core::BlockPool;
    use std::thread;
    use std::time::Duration;

    fn some_block(pool: &BlockPool, num_items: usize) -> Block {
        let buffer = pool.allocate(32).unwrap().freeze();
        Block::new(buffer, 0, 32, 0, num_items).unwrap()
    }

    #[test]
    fn test_pop_returns_none_after_close_and_drain() {
        let pool = BlockPool::new();
        let queue = BlockQueue::new();
        queue.append_block(some_block(&pool, 1)).unwrap();
        queue.close().unwrap();

        assert!(queue.pop().is_some());
        assert!(queue.pop().is_none());
        assert!(queue.is_drained());
    }

    #[test]
    fn test_append_after_close_fails() {
        let pool = BlockPool::new();
        let queue = BlockQueue::new();
        queue.close().unwrap();
        assert!(queue.append_block(some_block(&pool, 1)).is_err());
        // but closing again is fine
        queue.close().unwrap();
    }

    #[test]
    fn test_consumer_wakes_on_push_and_close() {
        let pool = BlockPool::new();
        let queue = Arc::new(BlockQueue::new());

        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let mut count = 0;
                while queue.pop().is_some() {
                    count += 1;
                }
                count
            })
        };

        for _ in 0..5 {
            thread::sleep(Duration::from_millis(1));
            queue.append_block(some_block(&pool, 1)).unwrap();
        }
        queue.close().unwrap();
        assert_eq!(consumer.join().unwrap(), 5);
    }

    #[test]
    fn test_wait_write_closed_blocks_until_close() {
        let queue = Arc::new(BlockQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.wait_write_closed())
        };
        thread::sleep(Duration::from_millis(5));
        queue.close().unwrap();
        waiter.join().unwrap();
    }

    #[test]
    fn test_caching_source_replays_from_file() {
        let pool = BlockPool::new();
        let queue = Arc::new(BlockQueue::new());
        for items in [1usize, 2, 3] {
            queue.append_block(some_block(&pool, items)).unwrap();
        }
        queue.close().unwrap();

        let cache = BlockFile::new();
        let mut first = CachingQueueSource::new(Arc::clone(&queue), cache.clone());
        let mut counts = Vec::new();
        while let Some(block) = first.next_block().unwrap() {
            counts.push(block.num_items());
        }
        assert_eq!(counts, vec![1, 2, 3]);

        // queue is drained now; the second pass reads the cache file
        let mut second = CachingQueueSource::new(queue, cache);
        let mut replayed = Vec::new();
        while let Some(block) = second.next_block().unwrap() {
            replayed.push(block.num_items());
        }
        assert_eq!(replayed, counts);
    }
}
