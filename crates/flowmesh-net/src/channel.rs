//! Channels: one logical all-to-all block exchange.
//!
//! A [`Channel`] gives its owning worker `W` outbound sinks (one per
//! destination worker, loopback included) and `W` inbound block queues (one
//! per source worker). Writers opened on the channel serialize items block
//! by block; each finished block either hops straight into the destination
//! queue (same host) or is framed and handed to the peer's send task.
//!
//! A channel is *closed* once every inbound queue has seen its end-of-stream
//! marker, i.e. once every worker in the cluster has closed its sink towards
//! this one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tracing::{debug, trace};

use flowmesh_core::{Block, BlockPool, Error, Item, Result};
use flowmesh_data::{
    BlockFile, BlockQueue, BlockReader, BlockSink, BlockWriter, CachingQueueSource,
    ConcatSource, QueueSource,
};

use crate::frame::FrameHeader;
use crate::multiplexer::{ChannelId, Frame, MuxInner};

/// Reader over one source worker's stream.
pub type SourceReader = BlockReader<QueueSource>;
/// Reader over all source workers, drained in rank order.
pub type ConcatReader = BlockReader<ConcatSource<QueueSource>>;
/// Re-readable variant of [`ConcatReader`].
pub type CachingConcatReader = BlockReader<ConcatSource<CachingQueueSource>>;

pub struct Channel {
    id: ChannelId,
    local_worker: usize,
    num_workers: usize,
    default_block_size: usize,
    pool: BlockPool,
    /// Inbound queues, indexed by global source worker rank.
    queues: Vec<Arc<BlockQueue>>,
    /// Caches backing `open_caching_reader`, parallel to `queues`.
    cache_files: Vec<BlockFile>,
    /// Outbound sinks, indexed by global destination worker rank.
    sinks: Vec<ChannelSink>,
}

impl Channel {
    pub(crate) fn new(mux: &Arc<MuxInner>, id: ChannelId, local_worker: usize) -> Self {
        let num_workers = mux.num_hosts * mux.workers_per_host;
        let sender_worker = mux.host_rank * mux.workers_per_host + local_worker;

        let queues = (0..num_workers)
            .map(|_| Arc::new(BlockQueue::new()))
            .collect();
        let cache_files = (0..num_workers).map(|_| BlockFile::new()).collect();

        let outbound = mux.outbound.lock().unwrap();
        let sinks = (0..num_workers)
            .map(|dest| {
                let dest_host = dest / mux.workers_per_host;
                let dest_local = dest % mux.workers_per_host;
                let kind = if dest_host == mux.host_rank {
                    SinkKind::Loopback {
                        mux: Arc::downgrade(mux),
                        target_local_worker: dest_local,
                    }
                } else {
                    let tx = outbound[dest_host]
                        .as_ref()
                        .expect("mesh connection to remote host")
                        .clone();
                    SinkKind::Remote { tx }
                };
                ChannelSink {
                    state: Arc::new(SinkState {
                        kind,
                        channel_id: id,
                        sender_worker: sender_worker as u32,
                        receiver_local_worker: dest_local as u32,
                        closed: AtomicBool::new(false),
                    }),
                }
            })
            .collect();

        trace!(id, local_worker, num_workers, "channel created");
        Self {
            id,
            local_worker,
            num_workers,
            default_block_size: mux.default_block_size,
            pool: mux.pool.clone(),
            queues,
            cache_files,
            sinks,
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn local_worker(&self) -> usize {
        self.local_worker
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// One block writer per destination worker, in rank order. Open the
    /// writers only once per channel: a second set would interleave block
    /// sequences on the wire.
    pub fn open_writers(&self) -> Result<Vec<BlockWriter<ChannelSink>>> {
        self.open_writers_with(self.default_block_size)
    }

    pub fn open_writers_with(
        &self,
        block_size: usize,
    ) -> Result<Vec<BlockWriter<ChannelSink>>> {
        self.sinks
            .iter()
            .map(|sink| BlockWriter::new(sink.clone(), self.pool.clone(), block_size))
            .collect()
    }

    /// One reader per source worker, in rank order.
    pub fn open_readers(&self) -> Vec<SourceReader> {
        self.queues
            .iter()
            .map(|queue| BlockReader::new(QueueSource::new(Arc::clone(queue))))
            .collect()
    }

    /// A single reader over all sources, drained in source rank order.
    pub fn open_concat_reader(&self) -> ConcatReader {
        let sources = self
            .queues
            .iter()
            .map(|queue| QueueSource::new(Arc::clone(queue)))
            .collect();
        BlockReader::new(ConcatSource::new(sources))
    }

    /// Like [`open_concat_reader`](Self::open_concat_reader), but every
    /// delivered block is cached, so the call can be repeated to re-read
    /// the whole stream.
    pub fn open_caching_reader(&self) -> CachingConcatReader {
        let sources = self
            .queues
            .iter()
            .zip(&self.cache_files)
            .map(|(queue, cache)| {
                CachingQueueSource::new(Arc::clone(queue), cache.clone())
            })
            .collect();
        BlockReader::new(ConcatSource::new(sources))
    }

    /// Send `source`'s items out by rank: destination `w` receives items
    /// `[offsets[w-1], offsets[w])` (right-exclusive, `offsets[-1] == 0`).
    /// Prefers whole-block hand-off over re-serialization, then closes all
    /// writers.
    pub fn scatter<T: Item>(&self, source: &BlockFile, offsets: &[usize]) -> Result<()> {
        if offsets.len() != self.num_workers {
            return Err(Error::InvalidArgument(format!(
                "scatter needs one offset per worker: got {} for {}",
                offsets.len(),
                self.num_workers
            )));
        }

        let mut writers = self.open_writers()?;
        let mut reader = source.reader();
        let mut current = 0usize;

        for (dest, writer) in writers.iter_mut().enumerate() {
            let limit = offsets[dest];
            if limit < current {
                return Err(Error::InvalidArgument(format!(
                    "scatter offsets must be non-decreasing: offsets[{dest}] = {limit} < {current}"
                )));
            }
            if limit > current {
                let blocks = reader.item_range::<T>(limit - current)?;
                writer.append_blocks(blocks)?;
                current = limit;
            }
            writer.close()?;
        }
        debug!(id = self.id, items = current, "scatter complete");
        Ok(())
    }

    /// Close all outbound sinks (idempotently), then wait until every
    /// inbound stream has delivered its end-of-stream marker.
    pub fn close(&self) -> Result<()> {
        for sink in &self.sinks {
            sink.close()?;
        }
        for (source, queue) in self.queues.iter().enumerate() {
            trace!(id = self.id, source, "waiting for inbound close");
            queue.wait_write_closed();
        }
        debug!(id = self.id, local_worker = self.local_worker, "channel closed");
        Ok(())
    }

    /// True once every inbound stream is write-closed.
    pub fn is_closed(&self) -> bool {
        self.queues.iter().all(|queue| queue.is_write_closed())
    }

    pub(crate) fn push_inbound(&self, source: usize, block: Block) -> Result<()> {
        self.queues[source].append_block(block)
    }

    pub(crate) fn write_close_inbound(&self, source: usize) -> Result<()> {
        self.queues[source].close()
    }
}

/// Outbound endpoint of a channel towards one destination worker. Cheap to
/// clone; the channel and its writers share one closed flag per
/// destination.
#[derive(Clone)]
pub struct ChannelSink {
    state: Arc<SinkState>,
}

struct SinkState {
    kind: SinkKind,
    channel_id: ChannelId,
    sender_worker: u32,
    receiver_local_worker: u32,
    closed: AtomicBool,
}

enum SinkKind {
    /// Destination worker lives on this host: enqueue directly into its
    /// channel object, creating it if the receiver has not shown up yet.
    Loopback {
        mux: Weak<MuxInner>,
        target_local_worker: usize,
    },
    /// Destination worker lives elsewhere: frame and hand to the peer's
    /// send task.
    Remote { tx: tokio::sync::mpsc::UnboundedSender<Frame> },
}

impl ChannelSink {
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }

    fn target_queue(&self, mux: &Weak<MuxInner>, target_local_worker: usize) -> Result<Arc<BlockQueue>> {
        let mux = mux
            .upgrade()
            .ok_or(Error::Closed("multiplexer"))?;
        let channel = mux.get_or_create(self.state.channel_id, target_local_worker);
        Ok(Arc::clone(&channel.queues[self.state.sender_worker as usize]))
    }
}

impl BlockSink for ChannelSink {
    fn append_block(&self, block: Block) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed("channel sink"));
        }
        if block.is_empty() && block.num_items() == 0 {
            return Ok(());
        }
        match &self.state.kind {
            SinkKind::Loopback {
                mux,
                target_local_worker,
            } => self
                .target_queue(mux, *target_local_worker)?
                .append_block(block),
            SinkKind::Remote { tx } => {
                let header = FrameHeader::for_block(
                    self.state.channel_id,
                    self.state.sender_worker,
                    self.state.receiver_local_worker,
                    &block,
                );
                tx.send(Frame {
                    header,
                    payload: Some(block),
                })
                .map_err(|_| Error::Transport("outbound frame queue is gone".into()))
            }
        }
    }

    fn close(&self) -> Result<()> {
        if self
            .state
            .closed
            .swap(true, Ordering::AcqRel)
        {
            return Ok(());
        }
        match &self.state.kind {
            SinkKind::Loopback {
                mux,
                target_local_worker,
            } => self.target_queue(mux, *target_local_worker)?.close(),
            SinkKind::Remote { tx } => {
                let header = FrameHeader::end_of_stream(
                    self.state.channel_id,
                    self.state.sender_worker,
                    self.state.receiver_local_worker,
                );
                tx.send(Frame {
                    header,
                    payload: None,
                })
                .map_err(|_| Error::Transport("outbound frame queue is gone".into()))
            }
        }
    }
}
