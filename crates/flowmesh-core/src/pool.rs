//! Block Pool and Memory Accounting
//!
//! All serialized item data lives in fixed-size byte buffers handed out by a
//! [`BlockPool`]. The pool keeps a running total of bytes currently held by
//! live buffers. The counter is advisory: it exists for observability and for
//! eventual back-pressure decisions, not as a hard cap.
//!
//! ## Lifecycle
//!
//! ```text
//! pool.allocate(size)        -> PooledBuffer   (mutable, exclusively owned)
//! buffer.freeze()            -> BufferRef      (immutable, Arc-shared)
//! drop(last BufferRef clone) -> counter -= size
//! ```
//!
//! A writer owns the `PooledBuffer` while filling it; freezing transfers the
//! bytes into a shared read-only reference that blocks, files, queues, and
//! readers can all hold concurrently without copying.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

/// Default size of blocks in files, channels, and block queues: 2 MiB.
pub const DEFAULT_BLOCK_SIZE: usize = 2 * 1024 * 1024;

/// Allocates fixed-size byte buffers and tracks the byte total of all
/// buffers still alive. Cloning the pool shares the counter.
#[derive(Clone, Default)]
pub struct BlockPool {
    bytes_in_use: Arc<AtomicUsize>,
}

impl BlockPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a zeroed buffer of `size` bytes.
    ///
    /// Allocation failure surfaces as [`Error::OutOfMemory`] instead of
    /// aborting, so the caller decides how the stage dies.
    pub fn allocate(&self, size: usize) -> Result<PooledBuffer> {
        let mut data = Vec::new();
        data.try_reserve_exact(size)
            .map_err(|_| Error::OutOfMemory { requested: size })?;
        data.resize(size, 0u8);

        self.bytes_in_use.fetch_add(size, Ordering::Relaxed);
        Ok(PooledBuffer {
            data: data.into_boxed_slice(),
            bytes_in_use: Arc::clone(&self.bytes_in_use),
        })
    }

    /// Total bytes currently held by live buffers of this pool.
    pub fn total_bytes(&self) -> usize {
        self.bytes_in_use.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for BlockPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockPool")
            .field("bytes_in_use", &self.total_bytes())
            .finish()
    }
}

/// A mutable, exclusively-owned byte buffer from a [`BlockPool`].
pub struct PooledBuffer {
    data: Box<[u8]>,
    bytes_in_use: Arc<AtomicUsize>,
}

impl PooledBuffer {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Convert into an immutable shared reference. The accounting charge
    /// moves with the bytes and is released when the last clone drops.
    pub fn freeze(self) -> BufferRef {
        BufferRef(Arc::new(self))
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.bytes_in_use.fetch_sub(self.data.len(), Ordering::Relaxed);
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.data.len())
            .finish()
    }
}

/// Immutable shared reference to a frozen buffer.
#[derive(Clone)]
pub struct BufferRef(Arc<PooledBuffer>);

impl BufferRef {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Deref for BufferRef {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for BufferRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferRef")
            .field("len", &self.len())
            .field("refs", &Arc::strong_count(&self.0))
            .finish()
    }
}
