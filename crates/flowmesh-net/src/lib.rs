//! Worker-to-worker block exchange for flowmesh.
//!
//! All logical channels between workers are multiplexed over one physical
//! connection per host pair:
//!
//! ```text
//!  worker threads                 tokio tasks                    peer host
//!  --------------                 -----------                    ---------
//!  BlockWriter --(Block)--> ChannelSink --(Frame)--> send task --> TCP/pipe
//!  BlockReader <--(Block)-- BlockQueue  <-- dispatch <-- recv task <-- ...
//! ```
//!
//! The worker side stays synchronous: sink appends are enqueues, reads park
//! on a queue condvar. Only the per-peer send/receive tasks are async.
//!
//! - [`group`]: the transport mesh (in-process pipes or TCP)
//! - [`frame`]: the 28-byte stream-block wire header
//! - [`multiplexer`]: per-host channel registry and peer tasks
//! - [`channel`]: writers, readers, scatter, and close for one exchange
//! - [`flow`]: prefix-sum / all-reduce / broadcast / barrier collectives
//! - [`context`]: host/worker handles and the local run harness

pub mod channel;
pub mod context;
pub mod flow;
pub mod frame;
pub mod group;
pub mod multiplexer;

pub use channel::{CachingConcatReader, Channel, ChannelSink, ConcatReader, SourceReader};
pub use context::{run_local, run_local_with, HostContext, WorkerContext};
pub use flow::FlowControl;
pub use frame::FrameHeader;
pub use group::{Group, PeerConnection};
pub use multiplexer::{ChannelId, Multiplexer};
