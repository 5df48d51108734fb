//! Error Types for Flowmesh
//!
//! One error enum is shared by every crate in the workspace. The engine has
//! no in-band retry or partial-failure recovery: every variant below is fatal
//! to the stage that observes it, and the first error of any worker thread
//! decides the process exit code.
//!
//! ## Error Categories
//!
//! ### Resource Errors
//! - `OutOfMemory`: the block pool could not obtain backing memory
//!
//! ### Stream Errors
//! - `Transport`: a peer connection failed mid-frame (short read/write)
//! - `UnexpectedEndOfStream`: a reader ran dry in the middle of an item
//! - `TypeMismatch`: a self-verifying reader found a foreign type fingerprint
//!
//! ### Usage Errors
//! - `Closed`: an append or close on an already-closed file, sink, or queue
//! - `InvalidArgument`: a constructor was handed an impossible configuration
//! - `SentinelViolation`: user data collided with the probing table sentinel
//! - `Unsupported`: a feature that is recognized but not provided (e.g. `.lzo`)

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("out of memory allocating {requested} bytes")]
    OutOfMemory { requested: usize },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("unexpected end of stream")]
    UnexpectedEndOfStream,

    #[error("item type mismatch: expected fingerprint {expected:#010x}, found {found:#010x}")]
    TypeMismatch { expected: u32, found: u32 },

    #[error("{0} is closed")]
    Closed(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("sentinel key collided with user data")]
    SentinelViolation,

    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    /// True for errors that indicate a programming error rather than an
    /// environment failure.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Error::TypeMismatch { .. }
                | Error::Closed(_)
                | Error::InvalidArgument(_)
                | Error::SentinelViolation
        )
    }
}
