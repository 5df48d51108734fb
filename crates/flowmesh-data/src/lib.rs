//! Block-level data plane for flowmesh.
//!
//! Items flow through this crate in fixed-size blocks:
//!
//! ```text
//! put_item(x)          pop / next_block()
//!     |                        |
//! BlockWriter --(Block)--> BlockSink ... BlockSource --(Block)--> BlockReader
//!     |                                                               |
//!   splits items over block boundaries               reassembles them, next::<T>()
//! ```
//!
//! - [`writer::BlockWriter`] / [`reader::BlockReader`]: cursor machinery
//! - [`file::BlockFile`]: seekable, re-readable block container
//! - [`queue::BlockQueue`]: blocking producer/consumer hand-off
//! - [`sink`] / [`source`]: the endpoints both sides are generic over

pub mod file;
pub mod queue;
pub mod reader;
pub mod sink;
pub mod source;
pub mod writer;

pub use file::{BlockFile, FileBlockSource};
pub use queue::{BlockQueue, CachingQueueSource, QueueSource};
pub use reader::BlockReader;
pub use sink::{BlockSink, DiscardSink};
pub use source::{BlockSource, ConcatSource, VecSource};
pub use writer::BlockWriter;
