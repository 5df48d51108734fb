//! Stream-block frame header
//!
//! Every block travelling between hosts is preceded by one fixed-size
//! header naming the channel, the global sender worker, the receiving
//! host-local worker, and the block's byte/item bookkeeping.
//!
//! Wire layout (little-endian, packed, 28 bytes):
//!
//! ```text
//! +------------+---------------+----------------------+-----------+-----------+------------+
//! | channel_id | sender_worker | receiver_local_worker| num_bytes | num_items | first_item |
//! |    u64     |      u32      |         u32          |    u32    |    u32    |    u32     |
//! +------------+---------------+----------------------+-----------+-----------+------------+
//! ```
//!
//! A header with `num_bytes == 0 && num_items == 0` carries no payload and
//! marks end-of-stream for its (channel, sender, receiver) triple.

use bytes::{Buf, BufMut, BytesMut};

use flowmesh_core::{Block, Error, Result};

use crate::multiplexer::ChannelId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub channel_id: ChannelId,
    pub sender_worker: u32,
    pub receiver_local_worker: u32,
    pub num_bytes: u32,
    pub num_items: u32,
    pub first_item: u32,
}

impl FrameHeader {
    pub const WIRE_SIZE: usize = 28;

    /// Header describing `block` on `channel_id` from `sender_worker` to
    /// `receiver_local_worker`.
    pub fn for_block(
        channel_id: ChannelId,
        sender_worker: u32,
        receiver_local_worker: u32,
        block: &Block,
    ) -> Self {
        Self {
            channel_id,
            sender_worker,
            receiver_local_worker,
            num_bytes: block.len() as u32,
            num_items: block.num_items() as u32,
            first_item: block.first_item_relative() as u32,
        }
    }

    /// The end-of-stream marker for a (channel, sender, receiver) triple.
    pub fn end_of_stream(
        channel_id: ChannelId,
        sender_worker: u32,
        receiver_local_worker: u32,
    ) -> Self {
        Self {
            channel_id,
            sender_worker,
            receiver_local_worker,
            num_bytes: 0,
            num_items: 0,
            first_item: 0,
        }
    }

    pub fn is_end(&self) -> bool {
        self.num_bytes == 0 && self.num_items == 0
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(Self::WIRE_SIZE);
        buf.put_u64_le(self.channel_id);
        buf.put_u32_le(self.sender_worker);
        buf.put_u32_le(self.receiver_local_worker);
        buf.put_u32_le(self.num_bytes);
        buf.put_u32_le(self.num_items);
        buf.put_u32_le(self.first_item);
    }

    pub fn decode(mut data: &[u8]) -> Result<Self> {
        if data.len() < Self::WIRE_SIZE {
            return Err(Error::Transport(format!(
                "short frame header: {} of {} bytes",
                data.len(),
                Self::WIRE_SIZE
            )));
        }
        Ok(Self {
            channel_id: data.get_u64_le(),
            sender_worker: data.get_u32_le(),
            receiver_local_worker: data.get_u32_le(),
            num_bytes: data.get_u32_le(),
            num_items: data.get_u32_le(),
            first_item: data.get_u32_le(),
        })
    }
}
