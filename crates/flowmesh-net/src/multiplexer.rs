//! Channel Multiplexer
//!
//! The multiplexer carries every logical channel of a host over the few
//! physical connections of its [`Group`]. Per peer host it runs:
//!
//! - one **send task**, draining an unbounded frame queue and writing
//!   header + payload to the connection. This is the only writer of that
//!   connection, so outbound frames are never interleaved.
//! - one **receive task**, reading headers, allocating a pooled buffer for
//!   each payload, and dispatching the resulting block into the inbound
//!   queue of the addressed channel. A block may arrive before the local
//!   worker asked for its channel: channels are created lazily on first
//!   touch, from either side.
//!
//! Channel ids are allocated per local worker as a monotonically increasing
//! sequence. All workers allocate in the same deterministic order (the same
//! discipline collective calls require), so equal positions in the sequence
//! name the same logical exchange on every host.
//!
//! A short read anywhere is a transport failure: the engine does not retry,
//! it logs and lets the job die.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

use flowmesh_core::{Block, BlockPool, WorkerStats};

use crate::channel::Channel;
use crate::frame::FrameHeader;
use crate::group::Group;

pub type ChannelId = u64;

/// One outbound unit: a header and, unless it is an end marker, a block.
pub(crate) struct Frame {
    pub(crate) header: FrameHeader,
    pub(crate) payload: Option<Block>,
}

/// Per-host many-to-many block exchange over one group transport.
#[derive(Clone)]
pub struct Multiplexer {
    inner: Arc<MuxInner>,
}

pub(crate) struct MuxInner {
    pub(crate) host_rank: usize,
    pub(crate) num_hosts: usize,
    pub(crate) workers_per_host: usize,
    pub(crate) default_block_size: usize,
    pub(crate) pool: BlockPool,
    pub(crate) stats: WorkerStats,
    /// Registry of live channels, keyed by (id, local worker).
    channels: Mutex<HashMap<(ChannelId, usize), Arc<Channel>>>,
    /// Next channel id, one counter per local worker.
    next_channel_id: Mutex<Vec<ChannelId>>,
    /// Frame queues of the per-peer send tasks, indexed by host rank.
    pub(crate) outbound: Mutex<Vec<Option<mpsc::UnboundedSender<Frame>>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Multiplexer {
    /// Take over the group's connections and start the per-peer tasks.
    /// Must be called within a tokio runtime.
    pub fn new(
        group: Group,
        pool: BlockPool,
        workers_per_host: usize,
        default_block_size: usize,
    ) -> Self {
        let (host_rank, peers) = group.into_parts();
        let num_hosts = peers.len();

        let mut outbound: Vec<Option<mpsc::UnboundedSender<Frame>>> = Vec::new();
        let mut connections = Vec::new();
        for (peer, connection) in peers.into_iter().enumerate() {
            match connection {
                None => outbound.push(None),
                Some(connection) => {
                    let (tx, rx) = mpsc::unbounded_channel();
                    outbound.push(Some(tx));
                    connections.push((peer, connection, rx));
                }
            }
        }

        let inner = Arc::new(MuxInner {
            host_rank,
            num_hosts,
            workers_per_host,
            default_block_size,
            pool,
            stats: WorkerStats::new(),
            channels: Mutex::new(HashMap::new()),
            next_channel_id: Mutex::new(vec![0; workers_per_host]),
            outbound: Mutex::new(outbound),
            tasks: Mutex::new(Vec::new()),
        });

        for (peer, connection, rx) in connections {
            let send = tokio::spawn(send_loop(peer, connection.writer, rx, Arc::clone(&inner)));
            let recv = tokio::spawn(recv_loop(peer, connection.reader, Arc::clone(&inner)));
            inner.tasks.lock().unwrap().extend([send, recv]);
        }

        Self { inner }
    }

    pub fn host_rank(&self) -> usize {
        self.inner.host_rank
    }

    pub fn num_hosts(&self) -> usize {
        self.inner.num_hosts
    }

    pub fn workers_per_host(&self) -> usize {
        self.inner.workers_per_host
    }

    pub fn num_workers(&self) -> usize {
        self.inner.num_hosts * self.inner.workers_per_host
    }

    pub fn pool(&self) -> &BlockPool {
        &self.inner.pool
    }

    pub fn default_block_size(&self) -> usize {
        self.inner.default_block_size
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.inner.stats
    }

    /// Next channel id for `local_worker`. Workers on every host must
    /// allocate in the same order; equal positions then yield equal ids.
    pub fn allocate_channel_id(&self, local_worker: usize) -> ChannelId {
        let mut next = self.inner.next_channel_id.lock().unwrap();
        let id = next[local_worker];
        next[local_worker] += 1;
        id
    }

    /// Look up or lazily create the channel `(id, local_worker)`. All
    /// callers share one channel object per key.
    pub fn get_or_create_channel(&self, id: ChannelId, local_worker: usize) -> Arc<Channel> {
        self.inner.get_or_create(id, local_worker)
    }

    /// Drop all channels, stop the per-peer tasks, and wait for them.
    /// Peers shut down collectively; call this on every host concurrently.
    pub async fn shutdown(&self) {
        let channels: Vec<_> = {
            let mut registry = self.inner.channels.lock().unwrap();
            registry.drain().collect()
        };
        for ((id, local_worker), channel) in channels {
            if !channel.is_closed() {
                debug!(id, local_worker, "dropping channel that never fully closed");
            }
        }

        for slot in self.inner.outbound.lock().unwrap().iter_mut() {
            slot.take();
        }

        let tasks: Vec<_> = {
            let mut tasks = self.inner.tasks.lock().unwrap();
            tasks.drain(..).collect()
        };
        for task in tasks {
            if let Err(error) = task.await {
                if error.is_panic() {
                    std::panic::resume_unwind(error.into_panic());
                }
            }
        }
        debug!(host_rank = self.inner.host_rank, "multiplexer stopped");
    }
}

impl MuxInner {
    pub(crate) fn get_or_create(self: &Arc<Self>, id: ChannelId, local_worker: usize) -> Arc<Channel> {
        let mut channels = self.channels.lock().unwrap();
        Arc::clone(
            channels
                .entry((id, local_worker))
                .or_insert_with(|| Arc::new(Channel::new(self, id, local_worker))),
        )
    }
}

/// Drain the outbound frame queue of one peer connection.
async fn send_loop(
    peer: usize,
    mut writer: Box<dyn AsyncWrite + Send + Unpin>,
    mut frames: mpsc::UnboundedReceiver<Frame>,
    inner: Arc<MuxInner>,
) {
    let mut header_buf = BytesMut::with_capacity(FrameHeader::WIRE_SIZE);
    while let Some(frame) = frames.recv().await {
        header_buf.clear();
        frame.header.encode(&mut header_buf);
        if let Err(error) = writer.write_all(&header_buf).await {
            error!(peer, %error, "transport failure writing frame header");
            return;
        }
        if let Some(block) = frame.payload {
            if let Err(error) = writer.write_all(block.data()).await {
                error!(peer, %error, "transport failure writing block payload");
                return;
            }
            inner
                .stats
                .add_sent(1, (FrameHeader::WIRE_SIZE + block.len()) as u64);
        } else {
            inner.stats.add_sent(0, FrameHeader::WIRE_SIZE as u64);
        }
    }
    // queue closed: all sinks of this peer are gone, say goodbye
    let _ = writer.shutdown().await;
    trace!(peer, "send loop finished");
}

/// Read frames from one peer connection and dispatch them into inbound
/// channel queues.
async fn recv_loop(
    peer: usize,
    mut reader: Box<dyn AsyncRead + Send + Unpin>,
    inner: Arc<MuxInner>,
) {
    loop {
        let mut header_bytes = [0u8; FrameHeader::WIRE_SIZE];
        match reader.read_exact(&mut header_bytes).await {
            Ok(_) => {}
            Err(error) if error.kind() == std::io::ErrorKind::UnexpectedEof => {
                trace!(peer, "peer closed its send side");
                return;
            }
            Err(error) => {
                error!(peer, %error, "transport failure reading frame header");
                return;
            }
        }

        let header = match FrameHeader::decode(&header_bytes) {
            Ok(header) => header,
            Err(error) => {
                error!(peer, %error, "undecodable frame header");
                return;
            }
        };

        let channel = inner.get_or_create(
            header.channel_id,
            header.receiver_local_worker as usize,
        );
        let sender = header.sender_worker as usize;

        if header.is_end() {
            trace!(
                peer,
                channel_id = header.channel_id,
                sender,
                "inbound stream closed"
            );
            let _ = channel.write_close_inbound(sender);
            continue;
        }

        let num_bytes = header.num_bytes as usize;
        let mut buffer = match inner.pool.allocate(num_bytes) {
            Ok(buffer) => buffer,
            Err(error) => {
                error!(peer, %error, num_bytes, "cannot buffer inbound block");
                return;
            }
        };
        if let Err(error) = reader.read_exact(&mut buffer[..]).await {
            error!(peer, %error, "transport failure reading block payload");
            return;
        }

        let block = match Block::new(
            buffer.freeze(),
            0,
            num_bytes,
            header.first_item as usize,
            header.num_items as usize,
        ) {
            Ok(block) => block,
            Err(error) => {
                error!(peer, %error, "inbound frame with impossible bookkeeping");
                return;
            }
        };

        inner.stats.add_received(1, num_bytes as u64);
        trace!(
            peer,
            channel_id = header.channel_id,
            sender,
            num_bytes,
            num_items = header.num_items,
            "inbound block"
        );
        if let Err(error) = channel.push_inbound(sender, block) {
            error!(peer, %error, "inbound queue rejected block");
            return;
        }
    }
}
