//! Core types shared by the flowmesh data plane.
//!
//! This crate holds the pieces everything else builds on:
//!
//! - [`error`]: the single fatal-error enum and `Result` alias
//! - [`config`]: the engine configuration record
//! - [`pool`]: byte-block allocation with live-byte accounting
//! - [`block`]: virtual blocks (a buffer slice plus item bookkeeping)
//! - [`item`]: cursor-based typed item serialization
//! - [`stats`]: per-worker transfer counters

pub mod block;
pub mod config;
pub mod error;
pub mod item;
pub mod pool;
pub mod stats;

pub use block::Block;
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use item::{type_fingerprint, Item, ItemReader, ItemWriter, SliceReader};
pub use pool::{BlockPool, BufferRef, PooledBuffer, DEFAULT_BLOCK_SIZE};
pub use stats::{StatsSnapshot, WorkerStats};
